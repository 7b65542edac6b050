//! Engine error taxonomy

use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Failure of an engagement action or refresh
///
/// Nothing here is fatal: network failures and timeouts roll back and can be
/// retried, auth failures invalidate the session, validation failures never
/// touch the store, and stale conflicts force a refetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport unreachable or a non-2xx response
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered 401
    #[error("Session expired")]
    Auth,

    /// Rejected locally before any optimistic patch
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Server says the local state is outdated
    #[error("Stale state: {0}")]
    StaleConflict(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl SyncError {
    /// Whether the user can simply try the same action again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Timeout(_) | SyncError::StaleConflict(_)
        )
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized => SyncError::Auth,
            TransportError::Conflict(msg) => SyncError::StaleConflict(msg),
            TransportError::Timeout(after) => SyncError::Timeout(after),
            TransportError::Network(_) | TransportError::Status(_, _) | TransportError::Decode(_) => {
                SyncError::Network(err.to_string())
            }
        }
    }
}
