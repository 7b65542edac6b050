//! Canonical engagement record and the patches that mutate it

use chrono::{DateTime, Utc};
use engage_common::{Action, EntityType, Flag, Metric};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Engagement counters, all non-negative by construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub like: u64,
    pub dislike: u64,
    pub save: u64,
    pub share: u64,
    pub report: u64,
    /// Posts only; always 0 for comments
    pub comment: u64,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Like => self.like,
            Metric::Dislike => self.dislike,
            Metric::Save => self.save,
            Metric::Share => self.share,
            Metric::Report => self.report,
            Metric::Comment => self.comment,
        }
    }

    pub fn set(&mut self, metric: Metric, value: u64) {
        match metric {
            Metric::Like => self.like = value,
            Metric::Dislike => self.dislike = value,
            Metric::Save => self.save = value,
            Metric::Share => self.share = value,
            Metric::Report => self.report = value,
            Metric::Comment => self.comment = value,
        }
    }
}

/// Viewer-specific toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionState {
    pub like: bool,
    pub dislike: bool,
    pub save: bool,
    pub report: bool,
}

impl InteractionState {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Like => self.like,
            Flag::Dislike => self.dislike,
            Flag::Save => self.save,
            Flag::Report => self.report,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Like => self.like = value,
            Flag::Dislike => self.dislike = value,
            Flag::Save => self.save = value,
            Flag::Report => self.report = value,
        }
    }
}

/// Cached engagement state of one entity, shared by all of its views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub entity_type: EntityType,
    pub metrics: Metrics,
    pub interaction_state: InteractionState,
    /// Actions currently applied optimistically and awaiting the server
    pub pending_actions: BTreeSet<Action>,
    /// Actions whose most recent attempt failed
    pub error_actions: BTreeSet<Action>,
    /// Last authoritative merge (fetch or pushed event)
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Set by invalidation; forces the next mount to refresh
    pub stale: bool,
}

impl EngagementRecord {
    /// Fully defaulted record: all counters 0, all flags false
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            metrics: Metrics::default(),
            interaction_state: InteractionState::default(),
            pending_actions: BTreeSet::new(),
            error_actions: BTreeSet::new(),
            last_synced_at: None,
            stale: false,
        }
    }

    pub fn metric(&self, metric: Metric) -> u64 {
        self.metrics.get(metric)
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.interaction_state.get(flag)
    }

    pub fn is_pending(&self, action: Action) -> bool {
        self.pending_actions.contains(&action)
    }

    pub fn has_error(&self, action: Action) -> bool {
        self.error_actions.contains(&action)
    }

    /// Shallow-merge a patch into this record
    ///
    /// Counter and flag changes land together. Like/dislike exclusivity is
    /// enforced here as a last guard: if the merge would leave both set, the
    /// flag this patch turned on wins and the other is cleared (its counter
    /// decremented unless the patch supplied that counter itself).
    pub fn apply(&mut self, patch: &EngagementPatch) {
        for (&metric, &value) in &patch.metrics {
            self.metrics.set(metric, value);
        }
        if !self.entity_type.has_comment_metric() {
            self.metrics.comment = 0;
        }

        for (&flag, &value) in &patch.flags {
            self.interaction_state.set(flag, value);
        }

        if self.interaction_state.like && self.interaction_state.dislike {
            let loser = if patch.flags.get(&Flag::Dislike) == Some(&true)
                && patch.flags.get(&Flag::Like) != Some(&true)
            {
                Flag::Like
            } else {
                Flag::Dislike
            };
            self.interaction_state.set(loser, false);
            if !patch.metrics.contains_key(&loser.metric()) {
                let value = self.metrics.get(loser.metric()).saturating_sub(1);
                self.metrics.set(loser.metric(), value);
            }
        }

        for (&action, &pending) in &patch.pending {
            if pending {
                self.pending_actions.insert(action);
            } else {
                self.pending_actions.remove(&action);
            }
        }
        for (&action, &failed) in &patch.errors {
            if failed {
                self.error_actions.insert(action);
            } else {
                self.error_actions.remove(&action);
            }
        }
    }
}

/// Partial update of an [`EngagementRecord`]
///
/// Only the keys present are written; everything else is left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementPatch {
    pub metrics: BTreeMap<Metric, u64>,
    pub flags: BTreeMap<Flag, bool>,
    pub pending: BTreeMap<Action, bool>,
    pub errors: BTreeMap<Action, bool>,
}

impl EngagementPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch carrying every counter and flag of `record`
    pub fn from_record(record: &EngagementRecord) -> Self {
        let mut patch = Self::new();
        for metric in Metric::ALL {
            patch.metrics.insert(metric, record.metrics.get(metric));
        }
        for flag in Flag::ALL {
            patch.flags.insert(flag, record.interaction_state.get(flag));
        }
        patch
    }

    pub fn with_metric(mut self, metric: Metric, value: u64) -> Self {
        self.metrics.insert(metric, value);
        self
    }

    pub fn with_flag(mut self, flag: Flag, value: bool) -> Self {
        self.flags.insert(flag, value);
        self
    }

    pub fn with_pending(mut self, action: Action, pending: bool) -> Self {
        self.pending.insert(action, pending);
        self
    }

    pub fn with_error(mut self, action: Action, failed: bool) -> Self {
        self.errors.insert(action, failed);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
            && self.flags.is_empty()
            && self.pending.is_empty()
            && self.errors.is_empty()
    }

    /// Drop every counter and flag owned by one of `actions`
    ///
    /// Used to give in-flight optimistic values precedence over data merged
    /// from elsewhere.
    pub fn without_fields_owned_by<'a>(mut self, actions: impl IntoIterator<Item = &'a Action>) -> Self {
        for action in actions {
            for metric in action.owned_metrics() {
                self.metrics.remove(metric);
            }
            for flag in action.owned_flags() {
                self.flags.remove(flag);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(like: bool, dislike: bool, like_count: u64, dislike_count: u64) -> EngagementRecord {
        let mut r = EngagementRecord::new(EntityType::Post);
        r.interaction_state.like = like;
        r.interaction_state.dislike = dislike;
        r.metrics.like = like_count;
        r.metrics.dislike = dislike_count;
        r
    }

    #[test]
    fn test_new_record_is_fully_defaulted() {
        let r = EngagementRecord::new(EntityType::Comment);
        assert_eq!(r.metrics, Metrics::default());
        assert_eq!(r.interaction_state, InteractionState::default());
        assert!(r.pending_actions.is_empty());
        assert!(r.last_synced_at.is_none());
    }

    #[test]
    fn test_apply_writes_only_present_keys() {
        let mut r = record(false, false, 4, 1);
        r.apply(&EngagementPatch::new().with_metric(Metric::Like, 5));
        assert_eq!(r.metrics.like, 5);
        assert_eq!(r.metrics.dislike, 1);
    }

    #[test]
    fn test_apply_tracks_pending_and_errors() {
        let mut r = record(false, false, 0, 0);
        r.apply(&EngagementPatch::new().with_pending(Action::Save, true).with_error(Action::Save, true));
        assert!(r.is_pending(Action::Save));
        assert!(r.has_error(Action::Save));

        r.apply(&EngagementPatch::new().with_pending(Action::Save, false).with_error(Action::Save, false));
        assert!(!r.is_pending(Action::Save));
        assert!(!r.has_error(Action::Save));
    }

    #[test]
    fn test_exclusivity_guard_prefers_flag_set_by_patch() {
        let mut r = record(true, false, 5, 2);
        r.apply(&EngagementPatch::new().with_flag(Flag::Dislike, true));

        assert!(!r.interaction_state.like);
        assert!(r.interaction_state.dislike);
        assert_eq!(r.metrics.like, 4);
    }

    #[test]
    fn test_exclusivity_guard_respects_supplied_counter() {
        let mut r = record(true, false, 5, 2);
        r.apply(
            &EngagementPatch::new()
                .with_flag(Flag::Dislike, true)
                .with_metric(Metric::Like, 9),
        );
        assert!(!r.interaction_state.like);
        assert_eq!(r.metrics.like, 9);
    }

    #[test]
    fn test_comment_counter_pinned_for_comments() {
        let mut r = EngagementRecord::new(EntityType::Comment);
        r.apply(&EngagementPatch::new().with_metric(Metric::Comment, 12));
        assert_eq!(r.metrics.comment, 0);
    }

    #[test]
    fn test_without_fields_owned_by_filters_reaction_fields() {
        let patch = EngagementPatch::new()
            .with_metric(Metric::Like, 1)
            .with_metric(Metric::Dislike, 1)
            .with_metric(Metric::Share, 7)
            .with_flag(Flag::Like, true);

        let filtered = patch.without_fields_owned_by(&[Action::Dislike]);
        assert_eq!(filtered.metrics.len(), 1);
        assert_eq!(filtered.metrics.get(&Metric::Share), Some(&7));
        assert!(filtered.flags.is_empty());
    }

    #[test]
    fn test_from_record_round_trips_fields() {
        let source = record(true, false, 10, 3);
        let mut target = EngagementRecord::new(EntityType::Post);
        target.apply(&EngagementPatch::from_record(&source));
        assert_eq!(target.metrics, source.metrics);
        assert_eq!(target.interaction_state, source.interaction_state);
    }
}
