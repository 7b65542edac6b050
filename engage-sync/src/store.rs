//! Engagement store
//!
//! Keyed cache of [`EngagementRecord`]s plus per-entity subscriber lists. It
//! is the only writer of cached state: the coordinator, the refresher and the
//! event-source pump all go through [`EngagementStore::patch`] or one of its
//! siblings.
//!
//! # Notification order
//!
//! Every write enqueues the merged record on a FIFO queue. One caller at a
//! time drains the queue, so all subscribers of an entity see patch N before
//! any of them sees patch N+1, and a listener may itself write to the store
//! without deadlocking (its write is queued behind the current delivery).

use crate::normalizer::normalize;
use crate::record::{EngagementPatch, EngagementRecord};
use chrono::{DateTime, Utc};
use engage_common::{EntityRef, Flag};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Callback invoked with the merged record after each write
pub type Listener = Arc<dyn Fn(&EngagementRecord) + Send + Sync>;

struct Entry {
    record: Option<EngagementRecord>,
    listeners: Vec<(Uuid, Listener)>,
    /// When the last subscriber left (or the record was created unobserved)
    orphaned_since: Option<Instant>,
}

impl Entry {
    fn new() -> Self {
        Self {
            record: None,
            listeners: Vec::new(),
            orphaned_since: Some(Instant::now()),
        }
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<EntityRef, Entry>,
    queue: VecDeque<(EntityRef, EngagementRecord)>,
    draining: bool,
}

/// Shared, cloneable handle to the record cache
#[derive(Clone, Default)]
pub struct EngagementStore {
    inner: Arc<Mutex<StoreState>>,
}

impl EngagementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current record, `None` if the entity was never normalized
    pub fn get(&self, entity: EntityRef) -> Option<EngagementRecord> {
        self.lock()
            .entries
            .get(&entity)
            .and_then(|e| e.record.clone())
    }

    /// Shallow-merge `patch` and notify subscribers of `entity`
    ///
    /// Creates a defaulted record first if none exists.
    pub fn patch(&self, entity: EntityRef, patch: &EngagementPatch) -> EngagementRecord {
        self.patch_with(entity, |_| (patch.clone(), ())).0
    }

    /// Compute a patch from the current record and apply it in one step
    ///
    /// `f` sees the record exactly as it is before the write; no other write
    /// can interleave. Returns the merged record and whatever `f` returned.
    pub fn patch_with<T>(
        &self,
        entity: EntityRef,
        f: impl FnOnce(&EngagementRecord) -> (EngagementPatch, T),
    ) -> (EngagementRecord, T) {
        let mut state = self.lock();
        let entry = state.entries.entry(entity).or_insert_with(Entry::new);
        let record = entry
            .record
            .get_or_insert_with(|| normalize(&Value::Null, entity.entity_type));

        let (patch, extra) = f(record);
        record.apply(&patch);
        debug_assert!(!(record.flag(Flag::Like) && record.flag(Flag::Dislike)));
        let merged = record.clone();

        state.queue.push_back((entity, merged.clone()));
        self.deliver(state);
        (merged, extra)
    }

    /// Merge authoritative data (fetch result or pushed event)
    ///
    /// Fields owned by a currently pending action are skipped so an
    /// in-flight optimistic value is never visually reverted. Stamps
    /// `last_synced_at` and clears the stale marker.
    pub fn merge_authoritative(
        &self,
        entity: EntityRef,
        patch: EngagementPatch,
        synced_at: DateTime<Utc>,
    ) -> EngagementRecord {
        let mut state = self.lock();
        let entry = state.entries.entry(entity).or_insert_with(Entry::new);
        let record = entry
            .record
            .get_or_insert_with(|| normalize(&Value::Null, entity.entity_type));

        let pending: Vec<_> = record.pending_actions.iter().copied().collect();
        if !pending.is_empty() {
            debug!(entity = %entity, ?pending, "Authoritative merge deferring to pending fields");
        }
        record.apply(&patch.without_fields_owned_by(&pending));
        record.last_synced_at = Some(synced_at);
        record.stale = false;
        let merged = record.clone();

        state.queue.push_back((entity, merged.clone()));
        self.deliver(state);
        merged
    }

    /// Register a listener for writes to `entity`
    ///
    /// The returned [`Subscription`] unsubscribes when dropped.
    pub fn subscribe(
        &self,
        entity: EntityRef,
        listener: impl Fn(&EngagementRecord) + Send + Sync + 'static,
    ) -> Subscription {
        let id = Uuid::new_v4();
        let mut state = self.lock();
        let entry = state.entries.entry(entity).or_insert_with(Entry::new);
        entry.listeners.push((id, Arc::new(listener)));
        entry.orphaned_since = None;
        debug!(entity = %entity, subscribers = entry.listeners.len(), "Subscribed");

        Subscription {
            store: Arc::downgrade(&self.inner),
            entity,
            id,
            active: true,
        }
    }

    /// Mark a record stale so the next mount refreshes it
    pub fn invalidate(&self, entity: EntityRef) {
        if let Some(record) = self
            .lock()
            .entries
            .get_mut(&entity)
            .and_then(|e| e.record.as_mut())
        {
            record.stale = true;
        }
    }

    /// Mark every record stale
    pub fn invalidate_all(&self) {
        for record in self.lock().entries.values_mut().filter_map(|e| e.record.as_mut()) {
            record.stale = true;
        }
    }

    /// Drop all viewer-specific state after the session lost authorization
    ///
    /// Every flag is cleared and every record marked stale; counters stay.
    /// Subscribers are notified.
    pub fn clear_viewer_state(&self) {
        let mut state = self.lock();
        let mut changed = Vec::new();
        for (entity, entry) in state.entries.iter_mut() {
            if let Some(record) = entry.record.as_mut() {
                record.interaction_state = Default::default();
                record.stale = true;
                changed.push((*entity, record.clone()));
            }
        }
        debug!(records = changed.len(), "Cleared viewer-specific state");
        state.queue.extend(changed);
        self.deliver(state);
    }

    /// Remove every record and subscriber (session end)
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.queue.clear();
    }

    /// Whether a mount should trigger a background fetch
    pub fn needs_refresh(&self, entity: EntityRef, staleness: Duration) -> bool {
        match self.get(entity) {
            None => true,
            Some(record) if record.stale => true,
            Some(record) => match record.last_synced_at {
                None => true,
                Some(at) => engage_common::time::is_older_than(at, staleness, Utc::now()),
            },
        }
    }

    /// Evict records nobody has watched for at least `retention`
    ///
    /// Records with a pending action are kept regardless. Returns the number
    /// of evicted entries.
    pub fn evict_idle(&self, retention: Duration) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            let idle = entry.listeners.is_empty()
                && entry
                    .orphaned_since
                    .map(|since| since.elapsed() >= retention)
                    .unwrap_or(false);
            let pending = entry
                .record
                .as_ref()
                .map(|r| !r.pending_actions.is_empty())
                .unwrap_or(false);
            !idle || pending
        });
        let evicted = before - state.entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle engagement records");
        }
        evicted
    }

    pub fn subscriber_count(&self, entity: EntityRef) -> usize {
        self.lock()
            .entries
            .get(&entity)
            .map(|e| e.listeners.len())
            .unwrap_or(0)
    }

    /// Number of cached records
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| e.record.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver queued notifications unless another caller is already doing so
    fn deliver(&self, mut state: MutexGuard<'_, StoreState>) {
        if state.draining {
            return;
        }
        state.draining = true;
        drop(state);

        let mut reset = DrainReset {
            store: self,
            armed: true,
        };
        loop {
            let (record, listeners) = {
                let mut state = self.lock();
                let Some((entity, record)) = state.queue.pop_front() else {
                    state.draining = false;
                    reset.armed = false;
                    return;
                };
                let listeners: Vec<Listener> = state
                    .entries
                    .get(&entity)
                    .map(|e| e.listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
                    .unwrap_or_default();
                (record, listeners)
            };
            for listener in listeners {
                listener(&record);
            }
        }
    }

    fn unsubscribe(inner: &Arc<Mutex<StoreState>>, entity: EntityRef, id: Uuid) {
        let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.entries.get_mut(&entity) {
            entry.listeners.retain(|(lid, _)| *lid != id);
            if entry.listeners.is_empty() {
                entry.orphaned_since = Some(Instant::now());
            }
            debug!(entity = %entity, subscribers = entry.listeners.len(), "Unsubscribed");
        }
    }
}

/// Clears the draining marker if a listener panics mid-delivery
struct DrainReset<'a> {
    store: &'a EngagementStore,
    armed: bool,
}

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.lock().draining = false;
        }
    }
}

/// Handle to one store subscription; unsubscribes on drop
pub struct Subscription {
    store: Weak<Mutex<StoreState>>,
    entity: EntityRef,
    id: Uuid,
    active: bool,
}

impl Subscription {
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// Stop receiving notifications; idempotent
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.store.upgrade() {
            EngagementStore::unsubscribe(&inner, self.entity, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
