//! Mutation coordinator
//!
//! Drives one state machine per (entity, action):
//!
//! ```text
//! Idle --invoke--> Pending --success--> Committed --> Idle
//!                         \--failure--> RolledBack --> Idle
//! ```
//!
//! Entering Pending takes the debounce lock, snapshots the fields the action
//! owns, writes the optimistic patch and issues the transport call, all
//! before the first suspension point. A [`PendingMutation`] leaves Pending by
//! being consumed through `commit`, `roll_back` or `discard`, or by being
//! dropped when the caller cancels; the debounce lock is released exactly
//! then.

use crate::binder::Refresher;
use crate::context::EngineContext;
use crate::error::SyncError;
use crate::gate::{DebounceGate, GateGuard};
use crate::normalizer::normalize_partial;
use crate::notify::{Notice, NoticeLevel};
use crate::record::{EngagementPatch, EngagementRecord};
use crate::store::EngagementStore;
use crate::transport::ActionRequest;
use engage_common::events::EngagementEvent;
use engage_common::{Action, EntityRef, Flag, Metric};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest accepted report reason, in characters
pub const MAX_REPORT_REASON_CHARS: usize = 500;

/// Observable phase of one (entity, action) state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

/// Why an invocation never left Idle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The same action on the same entity is already Pending
    Debounced,
    /// Local validation failed; the store was not touched
    Invalid(SyncError),
}

/// Final result of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Server confirmed; record after reconciliation
    Committed(EngagementRecord),
    /// Network failure or timeout; record after rollback
    RolledBack {
        record: EngagementRecord,
        error: SyncError,
    },
    /// Server reported stale local state; optimistic patch discarded and the
    /// entity refetched (`None` if the refetch failed too)
    Conflict { record: Option<EngagementRecord> },
    /// Server answered 401; viewer state was invalidated globally
    SessionExpired,
    Rejected(Rejection),
}

impl MutationOutcome {
    /// The phase this invocation ended in before returning to Idle
    pub fn phase(&self) -> MutationPhase {
        match self {
            MutationOutcome::Committed(_) => MutationPhase::Committed,
            MutationOutcome::RolledBack { .. }
            | MutationOutcome::Conflict { .. }
            | MutationOutcome::SessionExpired => MutationPhase::RolledBack,
            MutationOutcome::Rejected(_) => MutationPhase::Idle,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed(_))
    }

    pub fn record(&self) -> Option<&EngagementRecord> {
        match self {
            MutationOutcome::Committed(record) | MutationOutcome::RolledBack { record, .. } => Some(record),
            MutationOutcome::Conflict { record } => record.as_ref(),
            MutationOutcome::SessionExpired | MutationOutcome::Rejected(_) => None,
        }
    }
}

/// Optimistic patch for `action` applied to `current`
///
/// Toggle actions undo when their flag is set (flag off, counter −1) and do
/// otherwise (flag on, counter +1). Turning on like or dislike also turns off
/// the other, decrementing its counter. Share only increments its counter.
/// Counters never go below zero.
pub fn optimistic_patch(current: &EngagementRecord, action: Action) -> EngagementPatch {
    let metric = action.metric();
    let count = current.metric(metric);

    let Some(flag) = action.flag() else {
        return EngagementPatch::new().with_metric(metric, count.saturating_add(1));
    };

    if current.flag(flag) {
        return EngagementPatch::new()
            .with_flag(flag, false)
            .with_metric(metric, count.saturating_sub(1));
    }

    let mut patch = EngagementPatch::new()
        .with_flag(flag, true)
        .with_metric(metric, count.saturating_add(1));
    if let Some(other) = flag.exclusive_with() {
        if current.flag(other) {
            patch = patch
                .with_flag(other, false)
                .with_metric(other.metric(), current.metric(other.metric()).saturating_sub(1));
        }
    }
    patch
}

/// Validate action arguments against the current record
///
/// Filing a report needs a non-blank reason of bounded length; withdrawing
/// one does not.
pub fn validate(request: &ActionRequest, current: &EngagementRecord) -> Result<(), SyncError> {
    if request.action != Action::Report || current.flag(Flag::Report) {
        return Ok(());
    }
    let reason = request.reason.as_deref().map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Err(SyncError::Validation("a report needs a reason".to_string()));
    }
    if reason.chars().count() > MAX_REPORT_REASON_CHARS {
        return Err(SyncError::Validation(format!(
            "report reason is longer than {} characters",
            MAX_REPORT_REASON_CHARS
        )));
    }
    Ok(())
}

/// Values of the fields an action owns, captured before its optimistic patch
#[derive(Debug, Clone)]
struct Snapshot {
    metrics: BTreeMap<Metric, u64>,
    flags: BTreeMap<Flag, bool>,
}

impl Snapshot {
    fn capture(record: &EngagementRecord, action: Action) -> Self {
        Self {
            metrics: action
                .owned_metrics()
                .iter()
                .map(|&m| (m, record.metric(m)))
                .collect(),
            flags: action
                .owned_flags()
                .iter()
                .map(|&f| (f, record.flag(f)))
                .collect(),
        }
    }
}

/// An action in the Pending phase
///
/// Dropping it unresolved (the `invoke` future was cancelled) discards the
/// optimistic write before the debounce lock is released.
struct PendingMutation {
    id: Uuid,
    store: EngagementStore,
    entity: EntityRef,
    action: Action,
    snapshot: Snapshot,
    optimistic: EngagementPatch,
    resolved: bool,
    _guard: GateGuard,
}

impl PendingMutation {
    /// Idle → Pending: snapshot and optimistic write in one store step
    fn begin(store: &EngagementStore, guard: GateGuard) -> Self {
        let entity = guard.entity();
        let action = guard.action();

        let (_, (snapshot, optimistic)) = store.patch_with(entity, |current| {
            let snapshot = Snapshot::capture(current, action);
            let optimistic = optimistic_patch(current, action);
            (
                optimistic.clone().with_pending(action, true),
                (snapshot, optimistic),
            )
        });

        let id = Uuid::new_v4();
        debug!(mutation = %id, entity = %entity, action = %action, "Idle -> Pending");
        Self {
            id,
            store: store.clone(),
            entity,
            action,
            snapshot,
            optimistic,
            resolved: false,
            _guard: guard,
        }
    }

    /// Pending → Committed
    ///
    /// Server fields present in `response` overwrite the optimistic values;
    /// omitted fields keep them. Fields owned by another action that is still
    /// pending are left to that action.
    fn commit(mut self, response: &Value) -> EngagementRecord {
        let server = normalize_partial(response, self.entity.entity_type);
        let action = self.action;

        let (record, ()) = self.store.patch_with(self.entity, |current| {
            let others: Vec<Action> = current
                .pending_actions
                .iter()
                .copied()
                .filter(|a| *a != action)
                .collect();
            let patch = server
                .without_fields_owned_by(&others)
                .with_pending(action, false)
                .with_error(action, false);
            (patch, ())
        });
        self.resolved = true;
        debug!(mutation = %self.id, entity = %self.entity, action = %action, "Pending -> Committed");
        record
    }

    /// Pending → RolledBack
    fn roll_back(mut self, mark_error: bool) -> EngagementRecord {
        let record = self.restore(mark_error);
        self.resolved = true;
        debug!(mutation = %self.id, entity = %self.entity, action = %self.action, "Pending -> RolledBack");
        record
    }

    /// Revert without recording a per-action error
    fn discard(self) -> EngagementRecord {
        self.roll_back(false)
    }

    /// Each touched field is restored to its snapshot value only if it still
    /// holds the value this mutation wrote, so a concurrent write to the same
    /// field is never clobbered.
    fn restore(&self, mark_error: bool) -> EngagementRecord {
        let action = self.action;
        let (record, ()) = self.store.patch_with(self.entity, |current| {
            let mut patch = EngagementPatch::new()
                .with_pending(action, false)
                .with_error(action, mark_error);
            for (&metric, &written) in &self.optimistic.metrics {
                if current.metric(metric) == written {
                    if let Some(&before) = self.snapshot.metrics.get(&metric) {
                        patch = patch.with_metric(metric, before);
                    }
                }
            }
            for (&flag, &written) in &self.optimistic.flags {
                if current.flag(flag) == written {
                    if let Some(&before) = self.snapshot.flags.get(&flag) {
                        patch = patch.with_flag(flag, before);
                    }
                }
            }
            (patch, ())
        });
        record
    }
}

impl Drop for PendingMutation {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        // Runs before `_guard` is dropped, so the lock outlives the revert
        self.restore(false);
        debug!(mutation = %self.id, entity = %self.entity, action = %self.action, "Pending -> Idle (cancelled)");
    }
}

/// Entry point for engagement actions
#[derive(Clone)]
pub struct MutationCoordinator {
    ctx: EngineContext,
    gate: DebounceGate,
    refresher: Refresher,
}

impl MutationCoordinator {
    pub fn new(ctx: EngineContext, gate: DebounceGate, refresher: Refresher) -> Self {
        Self {
            ctx,
            gate,
            refresher,
        }
    }

    /// Current phase of the (entity, action) state machine
    pub fn phase(&self, entity: EntityRef, action: Action) -> MutationPhase {
        if self.gate.is_held(entity, action) {
            MutationPhase::Pending
        } else {
            MutationPhase::Idle
        }
    }

    /// Run one action through the optimistic state machine
    ///
    /// Never fails: every error is resolved into the store (rollback, error
    /// flag, invalidation) plus at most one notice, and reported through the
    /// returned outcome.
    pub async fn invoke(&self, entity: EntityRef, request: ActionRequest) -> MutationOutcome {
        let action = request.action;
        let store = self.ctx.store();

        // A duplicate of a pending action is dropped before it is judged
        if self.gate.is_held(entity, action) {
            debug!(entity = %entity, action = %action, "Dropped duplicate while pending");
            return MutationOutcome::Rejected(Rejection::Debounced);
        }

        let current = store
            .get(entity)
            .unwrap_or_else(|| EngagementRecord::new(entity.entity_type));
        if let Err(err) = validate(&request, &current) {
            debug!(entity = %entity, action = %action, error = %err, "Rejected by validation");
            self.ctx
                .notify(Notice::new(NoticeLevel::Warning, err.to_string()).about(entity, action));
            return MutationOutcome::Rejected(Rejection::Invalid(err));
        }

        let Some(guard) = self.gate.try_acquire(entity, action) else {
            debug!(entity = %entity, action = %action, "Dropped duplicate while pending");
            return MutationOutcome::Rejected(Rejection::Debounced);
        };

        let mutation = PendingMutation::begin(store, guard);
        let mutation_id = mutation.id;

        match self.ctx.perform(entity, &request).await {
            Ok(response) => {
                self.ctx.mark_authorized();
                let record = mutation.commit(&response);
                info!(entity = %entity, action = %action, "Engagement action committed");
                self.ctx.events().emit_lossy(EngagementEvent::MutationCommitted {
                    mutation_id,
                    entity,
                    action,
                    timestamp: engage_common::time::now(),
                });
                MutationOutcome::Committed(record)
            }
            Err(SyncError::Auth) => {
                mutation.discard();
                self.ctx.expire_session();
                MutationOutcome::SessionExpired
            }
            Err(SyncError::StaleConflict(detail)) => {
                mutation.roll_back(true);
                warn!(entity = %entity, action = %action, detail = %detail, "Stale conflict; refetching");
                self.emit_rolled_back(mutation_id, entity, action, &detail);
                self.ctx.notify(
                    Notice::new(
                        NoticeLevel::Warning,
                        format!("{} changed on the server; showing the latest version", entity),
                    )
                    .about(entity, action),
                );
                store.invalidate(entity);
                let record = self.refresher.refresh(entity).await.ok();
                MutationOutcome::Conflict { record }
            }
            Err(error) => {
                let record = mutation.roll_back(true);
                warn!(entity = %entity, action = %action, error = %error, "Engagement action rolled back");
                self.emit_rolled_back(mutation_id, entity, action, &error.to_string());
                self.ctx.notify(
                    Notice::new(NoticeLevel::Error, format!("Could not {} {}: {}", action, entity, error))
                        .about(entity, action),
                );
                MutationOutcome::RolledBack { record, error }
            }
        }
    }

    fn emit_rolled_back(&self, mutation_id: Uuid, entity: EntityRef, action: Action, reason: &str) {
        self.ctx.events().emit_lossy(EngagementEvent::MutationRolledBack {
            mutation_id,
            entity,
            action,
            reason: reason.to_string(),
            timestamp: engage_common::time::now(),
        });
    }
}
