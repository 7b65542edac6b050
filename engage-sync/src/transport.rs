//! Transport to the content server
//!
//! Two endpoints per entity:
//! - `POST {base}/{posts|comments}/{id}/{action}` with an optional JSON body
//!   (`{"reason": ...}` for report), answering `{ <flag>: bool, <flag>_count: int }`
//! - `GET {base}/{posts|comments}/{id}` answering the raw entity object
//!
//! Responses are returned as untyped JSON; the normalizer makes sense of them.

use async_trait::async_trait;
use engage_common::auth::AuthProvider;
use engage_common::{Action, EntityRef};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("engage/", env!("CARGO_PKG_VERSION"));

/// Transport errors
///
/// `Clone` so one coalesced fetch result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Unauthorized")]
    Unauthorized,

    /// 409 Conflict / 412 Precondition Failed
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// One engagement action with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRequest {
    pub action: Action,
    /// Report reason; ignored for other actions
    pub reason: Option<String>,
}

impl ActionRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            reason: None,
        }
    }

    pub fn like() -> Self {
        Self::new(Action::Like)
    }

    pub fn dislike() -> Self {
        Self::new(Action::Dislike)
    }

    pub fn save() -> Self {
        Self::new(Action::Save)
    }

    pub fn share() -> Self {
        Self::new(Action::Share)
    }

    pub fn report(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Report,
            reason: Some(reason.into()),
        }
    }

    /// JSON body sent with the request, if any
    pub fn body(&self) -> Option<Value> {
        match (self.action, &self.reason) {
            (Action::Report, Some(reason)) => Some(json!({ "reason": reason.trim() })),
            _ => None,
        }
    }
}

/// Boundary to the server
#[async_trait]
pub trait EngagementTransport: Send + Sync {
    /// Perform an action; `Ok` carries the (possibly partial) response body
    async fn perform(&self, entity: EntityRef, request: &ActionRequest) -> Result<Value, TransportError>;

    /// Fetch the raw entity object
    async fn fetch(&self, entity: EntityRef) -> Result<Value, TransportError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
    timeout: Duration,
}

impl HttpTransport {
    /// # Arguments
    ///
    /// * `base_url` - API root without trailing slash, e.g. `https://example.org/api`
    /// * `auth` - bearer token source
    /// * `timeout` - per-request timeout enforced by the HTTP client
    pub fn new(
        base_url: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            timeout,
        })
    }

    pub fn entity_url(&self, entity: EntityRef) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            entity.entity_type.path_segment(),
            entity.entity_id
        )
    }

    pub fn action_url(&self, entity: EntityRef, action: Action) -> String {
        format!("{}/{}", self.entity_url(entity), action.as_str())
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, TransportError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Conflict(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status(status.as_u16(), text));
        }

        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(json!({}));
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl EngagementTransport for HttpTransport {
    async fn perform(&self, entity: EntityRef, request: &ActionRequest) -> Result<Value, TransportError> {
        let url = self.action_url(entity, request.action);
        tracing::debug!(entity = %entity, action = %request.action, url = %url, "POST action");

        let mut builder = self.http_client.post(&url);
        if let Some(body) = request.body() {
            builder = builder.json(&body);
        }
        self.send(builder).await
    }

    async fn fetch(&self, entity: EntityRef) -> Result<Value, TransportError> {
        let url = self.entity_url(entity);
        tracing::debug!(entity = %entity, url = %url, "GET entity");
        self.send(self.http_client.get(&url)).await
    }
}
