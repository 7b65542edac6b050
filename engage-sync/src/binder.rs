//! View binder
//!
//! Connects a mounted view (feed card, detail view, comment row) to one
//! store entry. Mounting subscribes and, when the cached record is missing or
//! stale, starts one background fetch. Concurrent fetches for the same
//! entity are coalesced by the [`Refresher`] into a single transport call.
//!
//! Unmounting only drops the subscription. In-flight fetches and mutations
//! keep running because their eventual store write is still valid for any
//! other live view.

use crate::context::EngineContext;
use crate::error::SyncError;
use crate::normalizer::normalize;
use crate::record::{EngagementPatch, EngagementRecord};
use crate::store::{EngagementStore, Subscription};
use engage_common::events::EngagementEvent;
use engage_common::EntityRef;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

type SharedFetch = Shared<BoxFuture<'static, Result<EngagementRecord, SyncError>>>;

/// Fetch-and-merge with per-entity coalescing
#[derive(Clone)]
pub struct Refresher {
    ctx: EngineContext,
    in_flight: Arc<Mutex<HashMap<EntityRef, SharedFetch>>>,
}

impl Refresher {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityRef, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &EngagementStore {
        self.ctx.store()
    }

    /// Fetch `entity` and merge the result into the store
    ///
    /// Joins the in-flight fetch for `entity` if there is one. A new fetch is
    /// also driven by its own task, so it completes and leaves the in-flight
    /// table even if every caller drops the returned future.
    pub fn refresh(&self, entity: EntityRef) -> SharedFetch {
        let mut in_flight = self.lock();
        if let Some(fetch) = in_flight.get(&entity) {
            debug!(entity = %entity, "Joining in-flight fetch");
            return fetch.clone();
        }

        let this = self.clone();
        let fetch = async move {
            let result = this.fetch_and_merge(entity).await;
            this.lock().remove(&entity);
            result
        }
        .boxed()
        .shared();
        in_flight.insert(entity, fetch.clone());
        drop(in_flight);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let driver = fetch.clone();
                handle.spawn(async move {
                    let _ = driver.await;
                });
            }
            Err(_) => debug!(entity = %entity, "No async runtime; fetch runs only while awaited"),
        }
        fetch
    }

    /// Start a refresh on the current runtime unless one is already running
    ///
    /// Returns whether a new fetch was started.
    pub fn refresh_in_background(&self, entity: EntityRef) -> bool {
        if self.is_in_flight(entity) {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(entity = %entity, "No async runtime; skipping background refresh");
            return false;
        }
        // Driven by the task `refresh` spawns
        let _ = self.refresh(entity);
        true
    }

    pub fn is_in_flight(&self, entity: EntityRef) -> bool {
        self.lock().contains_key(&entity)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    async fn fetch_and_merge(&self, entity: EntityRef) -> Result<EngagementRecord, SyncError> {
        debug!(entity = %entity, "Fetching engagement");
        match self.ctx.fetch(entity).await {
            Ok(raw) => {
                self.ctx.mark_authorized();
                let fetched = normalize(&raw, entity.entity_type);
                let now = engage_common::time::now();
                let record = self.ctx.store().merge_authoritative(
                    entity,
                    EngagementPatch::from_record(&fetched),
                    now,
                );
                self.ctx
                    .events()
                    .emit_lossy(EngagementEvent::RefreshCompleted { entity, timestamp: now });
                info!(
                    entity = %entity,
                    like = record.metrics.like,
                    dislike = record.metrics.dislike,
                    "Refreshed engagement"
                );
                Ok(record)
            }
            Err(SyncError::Auth) => {
                self.ctx.expire_session();
                Err(SyncError::Auth)
            }
            Err(err) => {
                warn!(entity = %entity, error = %err, "Background refresh failed");
                Err(err)
            }
        }
    }
}

/// Mounts views onto store entries
#[derive(Clone)]
pub struct ViewBinder {
    refresher: Refresher,
    staleness: Duration,
}

impl ViewBinder {
    /// # Arguments
    ///
    /// * `refresher` - shared fetch coalescer
    /// * `staleness` - age after which a cached record is refetched on mount
    pub fn new(refresher: Refresher, staleness: Duration) -> Self {
        Self {
            refresher,
            staleness,
        }
    }

    /// Subscribe a view to `entity`, refreshing in the background if needed
    pub fn mount(&self, entity: EntityRef) -> ViewBinding {
        let store = self.refresher.store();
        let (tx, mut rx) = watch::channel(None);
        let tx = Arc::new(tx);

        let listener_tx = Arc::clone(&tx);
        let subscription = store.subscribe(entity, move |record| {
            listener_tx.send_replace(Some(record.clone()));
        });

        // Seed with the cached record unless a notification already arrived
        let cached = store.get(entity);
        tx.send_if_modified(|current| {
            if current.is_none() && cached.is_some() {
                *current = cached;
                true
            } else {
                false
            }
        });
        // `changed()` waits for the first write after mount
        rx.borrow_and_update();

        if store.needs_refresh(entity, self.staleness) {
            let started = self.refresher.refresh_in_background(entity);
            debug!(entity = %entity, started, "Mounted view needs refresh");
        } else {
            debug!(entity = %entity, "Mounted view from cache");
        }

        ViewBinding {
            entity,
            subscription,
            rx,
            refresher: self.refresher.clone(),
        }
    }
}

/// One mounted view's live handle on an entity
///
/// Dropping the binding unmounts it.
pub struct ViewBinding {
    entity: EntityRef,
    subscription: Subscription,
    rx: watch::Receiver<Option<EngagementRecord>>,
    refresher: Refresher,
}

impl ViewBinding {
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// Latest record delivered to this view
    pub fn current(&self) -> Option<EngagementRecord> {
        self.rx.borrow().clone()
    }

    /// Wait for the next store notification
    ///
    /// Returns `None` once the subscription is gone (store cleared).
    pub async fn changed(&mut self) -> Option<EngagementRecord> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    /// Explicit refresh, e.g. pull-to-refresh
    pub async fn refresh(&self) -> Result<EngagementRecord, SyncError> {
        self.refresher.refresh(self.entity).await
    }

    pub fn unmount(mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::CollectingNotifier;
    use crate::transport::{ActionRequest, EngagementTransport, TransportError};
    use async_trait::async_trait;
    use engage_common::auth::Anonymous;
    use engage_common::events::EventBus;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl EngagementTransport for CountingTransport {
        async fn perform(&self, _: EntityRef, _: &ActionRequest) -> Result<Value, TransportError> {
            Ok(json!({}))
        }

        async fn fetch(&self, _: EntityRef) -> Result<Value, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(json!({"metrics": {"like_count": 7}, "like": true}))
        }
    }

    fn binder() -> (ViewBinder, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            fetches: AtomicUsize::new(0),
        });
        let ctx = EngineContext::new(
            EngagementStore::new(),
            transport.clone(),
            Arc::new(Anonymous),
            Arc::new(CollectingNotifier::new()),
            EventBus::new(16),
            Duration::from_secs(5),
        );
        (ViewBinder::new(Refresher::new(ctx), Duration::from_secs(30)), transport)
    }

    #[tokio::test]
    async fn test_concurrent_mounts_share_one_fetch() {
        let (binder, transport) = binder();
        let entity = EntityRef::post(1);

        let mut first = binder.mount(entity);
        let second = binder.mount(entity);
        assert_eq!(binder.refresher.in_flight_count(), 1);

        let record = first.changed().await.expect("refresh result");
        assert_eq!(record.metrics.like, 7);
        assert!(record.interaction_state.like);
        assert_eq!(second.current(), Some(record));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_record_mounts_without_fetch() {
        let (binder, transport) = binder();
        let entity = EntityRef::comment(3);
        binder
            .refresher
            .store()
            .merge_authoritative(entity, EngagementPatch::new(), engage_common::time::now());

        let binding = binder.mount(entity);
        assert!(binding.current().is_some());
        assert!(!binder.refresher.is_in_flight(entity));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmount_removes_subscription() {
        let (binder, _transport) = binder();
        let entity = EntityRef::post(9);
        let binding = binder.mount(entity);
        assert_eq!(binder.refresher.store().subscriber_count(entity), 1);

        binding.unmount();
        assert_eq!(binder.refresher.store().subscriber_count(entity), 0);
    }

    #[tokio::test]
    async fn test_abandoned_refresh_still_completes() {
        let (binder, transport) = binder();
        let entity = EntityRef::post(4);

        let mut fetch = binder.refresher.refresh(entity);
        assert!(futures::poll!(&mut fetch).is_pending());
        drop(fetch);

        for _ in 0..100 {
            if !binder.refresher.is_in_flight(entity) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(binder.refresher.in_flight_count(), 0);
        assert_eq!(binder.refresher.store().get(entity).unwrap().metrics.like, 7);

        // Later refreshes start a new fetch instead of joining a dead one
        binder.refresher.store().invalidate(entity);
        assert!(binder.refresher.refresh_in_background(entity));
        binder.refresher.refresh(entity).await.unwrap();
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_explicit_refresh_returns_merged_record() {
        let (binder, transport) = binder();
        let entity = EntityRef::post(2);
        let binding = binder.mount(entity);

        let record = binding.refresh().await.unwrap();
        assert_eq!(record.metrics.like, 7);
        assert!(record.last_synced_at.is_some());
        // Joined the background fetch started by mount
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(binder.refresher.in_flight_count(), 0);
    }
}
