//! Collaborators shared by the coordinator and the refresher

use crate::error::SyncError;
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::store::EngagementStore;
use crate::transport::{ActionRequest, EngagementTransport};
use engage_common::auth::AuthProvider;
use engage_common::events::{EngagementEvent, EventBus};
use engage_common::EntityRef;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Handles to everything the engine talks to
#[derive(Clone)]
pub struct EngineContext {
    store: EngagementStore,
    transport: Arc<dyn EngagementTransport>,
    auth: Arc<dyn AuthProvider>,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    request_timeout: Duration,
    /// Set on the first 401 of an expiry episode, cleared on the next success
    session_expired: Arc<AtomicBool>,
}

impl EngineContext {
    pub fn new(
        store: EngagementStore,
        transport: Arc<dyn EngagementTransport>,
        auth: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
        events: EventBus,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            auth,
            notifier,
            events,
            request_timeout,
            session_expired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &EngagementStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.notifier.notify(notice);
    }

    pub(crate) async fn perform(&self, entity: EntityRef, request: &ActionRequest) -> Result<Value, SyncError> {
        match tokio::time::timeout(self.request_timeout, self.transport.perform(entity, request)).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.request_timeout)),
        }
    }

    pub(crate) async fn fetch(&self, entity: EntityRef) -> Result<Value, SyncError> {
        match tokio::time::timeout(self.request_timeout, self.transport.fetch(entity)).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.request_timeout)),
        }
    }

    /// A transport call succeeded with the current credentials
    pub(crate) fn mark_authorized(&self) {
        self.session_expired.store(false, Ordering::SeqCst);
    }

    /// Global invalidation after a 401
    ///
    /// Viewer-specific state is cleared on every 401. The auth collaborator,
    /// the notice and the event fire once per expiry episode, so a burst of
    /// concurrent 401s yields a single notification.
    pub(crate) fn expire_session(&self) {
        self.store.clear_viewer_state();
        if self.session_expired.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Session unauthorized; cleared viewer-specific engagement state");
        self.auth.on_unauthorized();
        self.notify(Notice::new(
            NoticeLevel::Warning,
            "Your session has expired. Please sign in again.",
        ));
        self.events.emit_lossy(EngagementEvent::SessionInvalidated {
            timestamp: engage_common::time::now(),
        });
    }
}
