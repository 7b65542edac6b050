//! Entity normalizer
//!
//! Backend payloads are loosely typed: counters appear nested
//! (`metrics.like_count`) in one response and flattened (`like_count`) in
//! another, flags may be nested under `interaction_state`, and any field may
//! be missing, null, stringly typed or negative. Every payload passes through
//! here exactly once, so nothing downstream needs a null check.
//!
//! Resolution order per field: nested form, then flattened form, then default.

use crate::record::{EngagementPatch, EngagementRecord};
use engage_common::{EntityType, Flag, Metric};
use serde_json::Value;

const METRICS_KEY: &str = "metrics";
const INTERACTION_KEYS: [&str; 2] = ["interaction_state", "interactionState"];

/// Map a raw payload to a fully defaulted record
///
/// Never fails: anything unreadable becomes `0` / `false`. Side-effect free.
pub fn normalize(raw: &Value, entity_type: EntityType) -> EngagementRecord {
    let mut record = EngagementRecord::new(entity_type);
    record.apply(&normalize_partial(raw, entity_type));
    record
}

/// Map a raw payload to a patch holding only the fields it actually carries
///
/// Used for action responses and pushed events, where an omitted field must
/// keep its current value rather than reset to the default.
pub fn normalize_partial(raw: &Value, entity_type: EntityType) -> EngagementPatch {
    let mut patch = EngagementPatch::new();

    for metric in Metric::ALL {
        if metric == Metric::Comment && !entity_type.has_comment_metric() {
            continue;
        }
        if let Some(value) = resolve_metric(raw, metric) {
            patch.metrics.insert(metric, value);
        }
    }

    for flag in Flag::ALL {
        if let Some(value) = resolve_flag(raw, flag) {
            patch.flags.insert(flag, value);
        }
    }

    // A payload claiming both reactions is contradictory; trust neither flag
    if patch.flags.get(&Flag::Like) == Some(&true) && patch.flags.get(&Flag::Dislike) == Some(&true) {
        tracing::warn!("Payload sets both like and dislike; ignoring both flags");
        patch.flags.remove(&Flag::Like);
        patch.flags.remove(&Flag::Dislike);
    }

    patch
}

fn resolve_metric(raw: &Value, metric: Metric) -> Option<u64> {
    let key = metric.count_key();
    raw.get(METRICS_KEY)
        .and_then(|nested| nested.get(key))
        .and_then(coerce_count)
        .or_else(|| raw.get(key).and_then(coerce_count))
}

fn resolve_flag(raw: &Value, flag: Flag) -> Option<bool> {
    let key = flag.as_str();
    INTERACTION_KEYS
        .iter()
        .find_map(|nested| raw.get(*nested).and_then(|n| n.get(key)).and_then(coerce_flag))
        .or_else(|| raw.get(key).and_then(coerce_flag))
}

/// Counter value from any JSON scalar; negatives clamp to 0
fn coerce_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().and_then(float_to_count)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .map(|i| i.max(0) as u64)
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_count))
        }
        _ => None,
    }
}

fn float_to_count(f: f64) -> Option<u64> {
    if f.is_finite() {
        Some(f.max(0.0).floor() as u64)
    } else {
        None
    }
}

fn coerce_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
