//! Bearer-token authentication for transport calls
//!
//! Token acquisition happens outside this crate. The engine only needs to
//! read the current token for each request and to tell the provider when the
//! server answered `401 Unauthorized`.

use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Supplier of the viewer's bearer token
pub trait AuthProvider: Send + Sync {
    /// Current bearer token, `None` when signed out
    fn bearer_token(&self) -> Option<String>;

    /// Called once per `401` response, after the engine has cleared all
    /// viewer-specific state. Implementations typically sign out or redirect.
    fn on_unauthorized(&self);

    /// Explicit sign-out requested by the application
    fn end_session(&self) {}
}

/// In-memory session token
///
/// `on_unauthorized` drops the token so subsequent requests go out
/// unauthenticated until the application signs in again.
#[derive(Debug, Default)]
pub struct SessionToken {
    token: RwLock<Option<String>>,
}

impl SessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
        }
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        let token = token.into();
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        info!("Session token installed");
    }

    pub fn sign_out(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("Session token cleared");
    }

    pub fn is_signed_in(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl AuthProvider for SessionToken {
    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_unauthorized(&self) {
        debug!("Unauthorized response; dropping session token");
        self.sign_out();
    }

    fn end_session(&self) {
        self.sign_out();
    }
}

/// Provider for anonymous sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl AuthProvider for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }

    fn on_unauthorized(&self) {}
}
