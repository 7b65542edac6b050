//! HTTP transport against an in-process axum server
//!
//! Verifies URL layout, bearer auth, status mapping and empty-body handling,
//! then runs one full session round trip over real HTTP.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use engage_common::auth::{AuthProvider, SessionToken};
use engage_common::config::SyncConfig;
use engage_common::EntityRef;
use engage_sync::{
    ActionRequest, CollectingNotifier, EngagementSession, EngagementTransport, HttpTransport,
    MutationOutcome, TransportError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Recorded {
    /// (method path, authorization header, body)
    calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

async fn get_post(State(rec): State<Recorded>, Path(id): Path<i64>, headers: HeaderMap) -> impl IntoResponse {
    rec.calls.lock().unwrap().push((
        format!("GET /posts/{}", id),
        bearer(&headers),
        Value::Null,
    ));
    match id {
        401 => StatusCode::UNAUTHORIZED.into_response(),
        _ => Json(json!({
            "id": id,
            "metrics": {"like_count": 12, "dislike_count": "3"},
            "interaction_state": {"like": true}
        }))
        .into_response(),
    }
}

async fn post_comment_action(
    State(rec): State<Recorded>,
    Path((id, action)): Path<(i64, String)>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let body = serde_json::from_str(&body).unwrap_or(Value::Null);
    rec.calls.lock().unwrap().push((
        format!("POST /comments/{}/{}", id, action),
        bearer(&headers),
        body,
    ));
    match (id, action.as_str()) {
        (409, _) => (StatusCode::CONFLICT, "stale").into_response(),
        (500, _) => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        (_, "share") => StatusCode::OK.into_response(),
        (_, "like") => Json(json!({"like": true, "like_count": 1})).into_response(),
        _ => Json(json!({})).into_response(),
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Start the test server; returns its `/api` base URL
async fn start_server() -> (String, Recorded) {
    let rec = Recorded::default();
    let app = Router::new()
        .route("/api/posts/:id", get(get_post))
        .route("/api/comments/:id/:action", post(post_comment_action))
        .with_state(rec.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/api", addr), rec)
}

fn transport(base_url: &str, token: Option<&str>) -> HttpTransport {
    let auth = Arc::new(SessionToken::new(token.map(str::to_string)));
    HttpTransport::new(base_url, auth, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_sends_bearer_and_returns_raw_entity() {
    let (base, rec) = start_server().await;
    let raw = transport(&base, Some("tok"))
        .fetch(EntityRef::post(7))
        .await
        .unwrap();

    assert_eq!(raw["metrics"]["like_count"], 12);
    let calls = rec.calls.lock().unwrap().clone();
    assert_eq!(calls[0].0, "GET /posts/7");
    assert_eq!(calls[0].1.as_deref(), Some("Bearer tok"));
}

#[tokio::test]
async fn test_anonymous_requests_carry_no_authorization() {
    let (base, rec) = start_server().await;
    transport(&base, None).fetch(EntityRef::post(1)).await.unwrap();
    assert_eq!(rec.calls.lock().unwrap()[0].1, None);
}

#[tokio::test]
async fn test_report_posts_reason_body() {
    let (base, rec) = start_server().await;
    transport(&base, Some("tok"))
        .perform(EntityRef::comment(5), &ActionRequest::report("  rude "))
        .await
        .unwrap();

    let calls = rec.calls.lock().unwrap().clone();
    assert_eq!(calls[0].0, "POST /comments/5/report");
    assert_eq!(calls[0].2, json!({"reason": "rude"}));
}

#[tokio::test]
async fn test_empty_success_body_decodes_as_empty_object() {
    let (base, _rec) = start_server().await;
    let value = transport(&base, None)
        .perform(EntityRef::comment(5), &ActionRequest::share())
        .await
        .unwrap();
    assert_eq!(value, json!({}));
}

#[tokio::test]
async fn test_status_mapping() {
    let (base, _rec) = start_server().await;
    let t = transport(&base, Some("tok"));

    assert_eq!(
        t.fetch(EntityRef::post(401)).await,
        Err(TransportError::Unauthorized)
    );
    assert_eq!(
        t.perform(EntityRef::comment(409), &ActionRequest::like()).await,
        Err(TransportError::Conflict("stale".to_string()))
    );
    assert_eq!(
        t.perform(EntityRef::comment(500), &ActionRequest::like()).await,
        Err(TransportError::Status(500, "boom".to_string()))
    );
    // No route for comments GET
    assert!(matches!(
        t.fetch(EntityRef::comment(1)).await,
        Err(TransportError::Status(404, _))
    ));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let t = transport("http://127.0.0.1:1/api", None);
    assert!(matches!(
        t.fetch(EntityRef::post(1)).await,
        Err(TransportError::Network(_))
    ));
}

#[tokio::test]
async fn test_session_round_trip_over_http() {
    let (base, _rec) = start_server().await;
    let config = SyncConfig {
        base_url: base,
        ..SyncConfig::default()
    };
    let auth: Arc<dyn AuthProvider> = Arc::new(SessionToken::new(Some("tok".to_string())));
    let session = EngagementSession::connect(&config, auth, Arc::new(CollectingNotifier::new())).unwrap();

    let post = session.refresh(EntityRef::post(3)).await.unwrap();
    assert_eq!(post.metrics.like, 12);
    assert_eq!(post.metrics.dislike, 3);
    assert!(post.interaction_state.like);

    let outcome = session
        .invoke(EntityRef::comment(4), ActionRequest::like())
        .await;
    match outcome {
        MutationOutcome::Committed(record) => {
            assert!(record.interaction_state.like);
            assert_eq!(record.metrics.like, 1);
        }
        other => panic!("expected commit, got {:?}", other),
    }
}
