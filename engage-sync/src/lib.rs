//! # Engagement State Synchronization Engine
//!
//! Keeps like/dislike/save/share/report state of posts and comments
//! consistent across every mounted view, applies user actions optimistically,
//! and reconciles or rolls back once the server answers.
//!
//! Components, leaves first:
//! - [`normalizer`]: raw payload → canonical [`EngagementRecord`]
//! - [`store`]: keyed record cache with per-entity subscribers
//! - [`gate`]: per (entity, action) in-flight lock
//! - [`coordinator`]: optimistic apply / commit / rollback state machine
//! - [`binder`]: view subscriptions and coalesced background refresh
//! - [`event_source`]: merges pushed updates into the store
//! - [`session`]: owns all of the above for one signed-in session

pub mod binder;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod event_source;
pub mod gate;
pub mod normalizer;
pub mod notify;
pub mod record;
pub mod session;
pub mod store;
pub mod transport;

pub use binder::{Refresher, ViewBinder, ViewBinding};
pub use coordinator::{MutationCoordinator, MutationOutcome, MutationPhase, Rejection};
pub use error::SyncError;
pub use gate::{DebounceGate, GateGuard};
pub use normalizer::{normalize, normalize_partial};
pub use notify::{CollectingNotifier, LogNotifier, Notice, NoticeLevel, Notifier};
pub use record::{EngagementPatch, EngagementRecord, InteractionState, Metrics};
pub use session::EngagementSession;
pub use store::{EngagementStore, Subscription};
pub use transport::{ActionRequest, EngagementTransport, HttpTransport, TransportError};
