//! Event types for the engagement event system
//!
//! Provides the shared event definitions and the EventBus used by the
//! synchronization engine. Incoming pushes from an event source arrive as
//! [`EngagementEvent::EntityUpdated`]; the engine itself emits the remaining
//! variants as lifecycle notifications.

use crate::entity::{Action, EntityRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engagement event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// over an event-source connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngagementEvent {
    /// Fresh engagement data pushed by the server for one entity
    ///
    /// `payload` has the same loose shape as a fetch response (nested or
    /// flattened fields); only the fields present are merged.
    EntityUpdated {
        entity: EntityRef,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// An optimistic mutation was confirmed by the server
    MutationCommitted {
        mutation_id: Uuid,
        entity: EntityRef,
        action: Action,
        timestamp: DateTime<Utc>,
    },

    /// An optimistic mutation failed and its patch was reverted
    MutationRolledBack {
        mutation_id: Uuid,
        entity: EntityRef,
        action: Action,
        /// Failure description
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A background refresh merged authoritative data into the store
    RefreshCompleted {
        entity: EntityRef,
        timestamp: DateTime<Utc>,
    },

    /// The session lost authorization; all viewer-specific state was cleared
    SessionInvalidated {
        timestamp: DateTime<Utc>,
    },
}

impl EngagementEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            EngagementEvent::EntityUpdated { .. } => "EntityUpdated",
            EngagementEvent::MutationCommitted { .. } => "MutationCommitted",
            EngagementEvent::MutationRolledBack { .. } => "MutationRolledBack",
            EngagementEvent::RefreshCompleted { .. } => "RefreshCompleted",
            EngagementEvent::SessionInvalidated { .. } => "SessionInvalidated",
        }
    }

    /// Entity the event concerns, if it concerns a single entity
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            EngagementEvent::EntityUpdated { entity, .. }
            | EngagementEvent::MutationCommitted { entity, .. }
            | EngagementEvent::MutationRolledBack { entity, .. }
            | EngagementEvent::RefreshCompleted { entity, .. } => Some(*entity),
            EngagementEvent::SessionInvalidated { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast for one-to-many event distribution.
/// Multiple components can subscribe and receive all events independently.
///
/// # Examples
///
/// ```
/// use engage_common::events::{EventBus, EngagementEvent};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
///
/// bus.emit(EngagementEvent::SessionInvalidated {
///     timestamp: chrono::Utc::now(),
/// }).ok();
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngagementEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers
    ///   start dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngagementEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngagementEvent,
    ) -> Result<usize, broadcast::error::SendError<EngagementEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Lifecycle notifications use this; nobody is required to listen.
    pub fn emit_lossy(&self, event: EngagementEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
