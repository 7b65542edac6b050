//! Pushed engagement updates
//!
//! An event source (server-sent events, websocket, polling loop) delivers
//! [`EngagementEvent::EntityUpdated`] values. Each one is merged into the
//! store as authoritative partial data, with the same pending-field
//! precedence as a fetch, and reaches every mounted view of the entity
//! without a refetch. Lifecycle events emitted by the engine itself are
//! ignored here.

use crate::normalizer::normalize_partial;
use crate::record::EngagementRecord;
use crate::store::EngagementStore;
use engage_common::events::EngagementEvent;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Merge one pushed event into the store
///
/// Returns the merged record, or `None` for events that carry no entity data.
pub fn apply_event(store: &EngagementStore, event: &EngagementEvent) -> Option<EngagementRecord> {
    let EngagementEvent::EntityUpdated {
        entity,
        payload,
        timestamp,
    } = event
    else {
        return None;
    };

    let patch = normalize_partial(payload, entity.entity_type);
    debug!(entity = %entity, fields = patch.metrics.len() + patch.flags.len(), "Applying pushed update");
    Some(store.merge_authoritative(*entity, patch, *timestamp))
}

/// Drain `events` into the store until the stream ends
///
/// Returns the number of events that updated a record.
pub async fn pump_stream<S>(store: EngagementStore, events: S) -> usize
where
    S: Stream<Item = EngagementEvent>,
{
    futures::pin_mut!(events);
    let mut applied = 0;
    while let Some(event) = events.next().await {
        if apply_event(&store, &event).is_some() {
            applied += 1;
        }
    }
    info!(applied, "Event stream ended");
    applied
}

/// Spawn a task applying every event received on `rx`
///
/// A lagging receiver skips the dropped events and keeps going; the affected
/// entities converge on their next fetch. The task ends when the bus closes.
pub fn spawn_bus_listener(
    store: EngagementStore,
    mut rx: broadcast::Receiver<EngagementEvent>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut applied = 0;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if apply_event(&store, &event).is_some() {
                        applied += 1;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged; pushed updates dropped");
                    store.invalidate_all();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            }
        }
        applied
    })
}
