//! Debounce gate
//!
//! One boolean lock per (entity, action). Liking and sharing the same post
//! may run concurrently; a second `like` on the same post while the first is
//! in flight is dropped, not queued.

use engage_common::{Action, EntityRef};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Clone, Default)]
pub struct DebounceGate {
    held: Arc<Mutex<HashSet<(EntityRef, Action)>>>,
}

impl DebounceGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<(EntityRef, Action)>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock for `(entity, action)`, or `None` if already held
    ///
    /// The lock is released when the returned guard drops, including when the
    /// owning future is cancelled.
    pub fn try_acquire(&self, entity: EntityRef, action: Action) -> Option<GateGuard> {
        if !self.lock().insert((entity, action)) {
            trace!(entity = %entity, action = %action, "Gate already held");
            return None;
        }
        trace!(entity = %entity, action = %action, "Gate acquired");
        Some(GateGuard {
            gate: self.clone(),
            key: (entity, action),
        })
    }

    pub fn is_held(&self, entity: EntityRef, action: Action) -> bool {
        self.lock().contains(&(entity, action))
    }

    /// Number of locks currently held
    pub fn held_count(&self) -> usize {
        self.lock().len()
    }
}

/// Proof of holding one gate lock
pub struct GateGuard {
    gate: DebounceGate,
    key: (EntityRef, Action),
}

impl GateGuard {
    pub fn entity(&self) -> EntityRef {
        self.key.0
    }

    pub fn action(&self) -> Action {
        self.key.1
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.lock().remove(&self.key);
        trace!(entity = %self.key.0, action = %self.key.1, "Gate released");
    }
}
