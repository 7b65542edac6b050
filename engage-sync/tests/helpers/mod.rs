//! Test helpers for engagement engine integration tests
//!
//! Provides:
//! - ScriptedTransport: in-process transport with queued action responses
//!   (shared or per action), per-entity fetch payloads, call counters and a
//!   per-action hold/release switch
//! - test_session: an EngagementSession wired to a ScriptedTransport
//! - seed / reactions: store seeding shortcuts

#![allow(dead_code)]

use async_trait::async_trait;
use engage_common::auth::{AuthProvider, SessionToken};
use engage_common::config::SyncConfig;
use engage_common::{Action, EntityRef, EntityType};
use engage_sync::{
    ActionRequest, CollectingNotifier, EngagementPatch, EngagementRecord, EngagementSession,
    EngagementTransport, MutationPhase, TransportError,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

const OPEN: usize = 1 << 20;

/// Transport whose answers are scripted by the test
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    action_responses: Mutex<HashMap<Action, VecDeque<Result<Value, TransportError>>>>,
    entities: Mutex<HashMap<EntityRef, Result<Value, TransportError>>>,
    perform_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    requests: Mutex<Vec<(EntityRef, ActionRequest)>>,
    /// Action calls wait for a permit of their action before answering
    gates: HashMap<Action, Semaphore>,
}

impl ScriptedTransport {
    /// Transport answering immediately
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_permits(OPEN))
    }

    /// Transport whose action calls wait until [`ScriptedTransport::release`]
    pub fn held() -> Arc<Self> {
        Arc::new(Self::with_permits(0))
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            action_responses: Mutex::new(HashMap::new()),
            entities: Mutex::new(HashMap::new()),
            perform_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gates: Action::ALL
                .iter()
                .map(|&action| (action, Semaphore::new(permits)))
                .collect(),
        }
    }

    /// Queue the answer to the next action call
    pub fn respond(&self, response: Result<Value, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Queue the answer to the next `action` call; takes precedence over
    /// [`ScriptedTransport::respond`]
    pub fn respond_to(&self, action: Action, response: Result<Value, TransportError>) {
        self.action_responses
            .lock()
            .unwrap()
            .entry(action)
            .or_default()
            .push_back(response);
    }

    /// Set what fetching `entity` returns
    pub fn serve(&self, entity: EntityRef, payload: Result<Value, TransportError>) {
        self.entities.lock().unwrap().insert(entity, payload);
    }

    /// Let `n` held calls of every action answer
    pub fn release(&self, n: usize) {
        for action in Action::ALL {
            self.release_action(action, n);
        }
    }

    /// Let `n` held `action` calls answer
    pub fn release_action(&self, action: Action, n: usize) {
        self.gates[&action].add_permits(n);
    }

    pub fn perform_calls(&self) -> usize {
        self.perform_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(EntityRef, ActionRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngagementTransport for ScriptedTransport {
    async fn perform(&self, entity: EntityRef, request: &ActionRequest) -> Result<Value, TransportError> {
        self.perform_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((entity, request.clone()));

        let permit = self.gates[&request.action]
            .acquire()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        permit.forget();

        let scripted = self
            .action_responses
            .lock()
            .unwrap()
            .get_mut(&request.action)
            .and_then(VecDeque::pop_front);
        scripted
            .or_else(|| self.responses.lock().unwrap().pop_front())
            .unwrap_or_else(|| Ok(json!({})))
    }

    async fn fetch(&self, entity: EntityRef) -> Result<Value, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.entities
            .lock()
            .unwrap()
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| Ok(json!({})))
    }
}

/// Session under test plus its collaborators
pub struct Harness {
    pub session: EngagementSession,
    pub transport: Arc<ScriptedTransport>,
    pub notifier: Arc<CollectingNotifier>,
    pub auth: Arc<SessionToken>,
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        request_timeout_secs: 1,
        ..SyncConfig::default()
    }
}

pub fn test_session(transport: Arc<ScriptedTransport>) -> Harness {
    test_session_with(transport, test_config())
}

pub fn test_session_with(transport: Arc<ScriptedTransport>, config: SyncConfig) -> Harness {
    let notifier = Arc::new(CollectingNotifier::new());
    let auth = Arc::new(SessionToken::new(Some("viewer-token".to_string())));
    let session = EngagementSession::new(
        &config,
        transport.clone(),
        auth.clone() as Arc<dyn AuthProvider>,
        notifier.clone(),
    );
    Harness {
        session,
        transport,
        notifier,
        auth,
    }
}

/// Post record with the given reaction state
pub fn reactions(like: bool, dislike: bool, like_count: u64, dislike_count: u64) -> EngagementRecord {
    let mut record = EngagementRecord::new(EntityType::Post);
    record.interaction_state.like = like;
    record.interaction_state.dislike = dislike;
    record.metrics.like = like_count;
    record.metrics.dislike = dislike_count;
    record
}

/// Put `record` in the store as freshly synced data
pub fn seed(session: &EngagementSession, entity: EntityRef, record: &EngagementRecord) {
    session.store().merge_authoritative(
        entity,
        EngagementPatch::from_record(record),
        engage_common::time::now(),
    );
}

/// Yield until `action` on `entity` is Pending
pub async fn wait_pending(session: &EngagementSession, entity: EntityRef, action: Action) {
    for _ in 0..1000 {
        if session.phase(entity, action) == MutationPhase::Pending {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("{} on {} never became pending", action, entity);
}
