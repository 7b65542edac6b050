//! Engagement session
//!
//! One [`EngagementSession`] lives from sign-in to sign-out. It owns the
//! store, the debounce gate, the fetch coalescer, the coordinator and the
//! lifecycle EventBus, and hands out cheap clones of them to views.

use crate::binder::{Refresher, ViewBinder, ViewBinding};
use crate::context::EngineContext;
use crate::coordinator::{MutationCoordinator, MutationOutcome, MutationPhase};
use crate::error::SyncError;
use crate::event_source;
use crate::gate::DebounceGate;
use crate::notify::Notifier;
use crate::record::EngagementRecord;
use crate::store::EngagementStore;
use crate::transport::{ActionRequest, EngagementTransport, HttpTransport};
use engage_common::auth::AuthProvider;
use engage_common::config::SyncConfig;
use engage_common::events::{EngagementEvent, EventBus};
use engage_common::{Action, EntityRef};
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Facade over one viewer's engagement engine
#[derive(Clone)]
pub struct EngagementSession {
    ctx: EngineContext,
    refresher: Refresher,
    binder: ViewBinder,
    coordinator: MutationCoordinator,
    retention: Duration,
}

impl EngagementSession {
    /// Assemble a session around an arbitrary transport
    pub fn new(
        config: &SyncConfig,
        transport: Arc<dyn EngagementTransport>,
        auth: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ctx = EngineContext::new(
            EngagementStore::new(),
            transport,
            auth,
            notifier,
            EventBus::new(config.event_bus_capacity),
            config.request_timeout(),
        );
        let refresher = Refresher::new(ctx.clone());
        let binder = ViewBinder::new(refresher.clone(), config.staleness());
        let coordinator = MutationCoordinator::new(ctx.clone(), DebounceGate::new(), refresher.clone());

        info!(
            base_url = %config.base_url,
            staleness_secs = config.staleness_secs,
            request_timeout_secs = config.request_timeout_secs,
            "Engagement session started"
        );

        Self {
            ctx,
            refresher,
            binder,
            coordinator,
            retention: config.retention(),
        }
    }

    /// Session talking HTTP to `config.base_url`
    pub fn connect(
        config: &SyncConfig,
        auth: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, SyncError> {
        let transport = HttpTransport::new(&config.base_url, Arc::clone(&auth), config.request_timeout())?;
        Ok(Self::new(config, Arc::new(transport), auth, notifier))
    }

    pub fn store(&self) -> &EngagementStore {
        self.ctx.store()
    }

    pub fn events(&self) -> &EventBus {
        self.ctx.events()
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn binder(&self) -> &ViewBinder {
        &self.binder
    }

    pub fn mount(&self, entity: EntityRef) -> ViewBinding {
        self.binder.mount(entity)
    }

    pub async fn invoke(&self, entity: EntityRef, request: ActionRequest) -> MutationOutcome {
        self.coordinator.invoke(entity, request).await
    }

    pub fn phase(&self, entity: EntityRef, action: Action) -> MutationPhase {
        self.coordinator.phase(entity, action)
    }

    /// Fetch `entity` now, joining any fetch already in flight
    pub async fn refresh(&self, entity: EntityRef) -> Result<EngagementRecord, SyncError> {
        self.refresher.refresh(entity).await
    }

    pub fn apply_event(&self, event: &EngagementEvent) -> Option<EngagementRecord> {
        event_source::apply_event(self.store(), event)
    }

    /// Merge pushed updates from `events` until the stream ends
    pub async fn pump(&self, events: impl Stream<Item = EngagementEvent>) -> usize {
        event_source::pump_stream(self.store().clone(), events).await
    }

    /// Merge pushed updates arriving on an event-source bus
    pub fn spawn_event_pump(&self, rx: broadcast::Receiver<EngagementEvent>) -> JoinHandle<usize> {
        event_source::spawn_bus_listener(self.store().clone(), rx)
    }

    /// Periodically drop records nobody has watched for the retention window
    pub fn spawn_eviction(&self, every: Duration) -> JoinHandle<()> {
        let store = self.store().clone();
        let retention = self.retention;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_idle(retention);
                if evicted > 0 {
                    debug!(evicted, remaining = store.len(), "Evicted idle engagement records");
                }
            }
        })
    }

    /// Clear every cached record and the viewer's token
    pub fn sign_out(&self) {
        self.store().clear();
        self.ctx.auth().end_session();
        info!("Engagement session signed out");
    }
}
