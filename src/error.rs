use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the presentation layer is told about a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// Non-blocking "buffering/reconnecting" indicator; retried automatically.
    TransientNetwork,
    /// Blocking, user-readable message; never retried.
    AccessDenied,
    /// Session id invalid or expired; terminal error view.
    NotFound,
    /// Recovered in place; only surfaced when recovery keeps failing.
    DecodeMedia,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already starting or live")]
    Conflict,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::AccessDenied(_) => ErrorClass::AccessDenied,
            SyncError::NotFound(_) => ErrorClass::NotFound,
            SyncError::Conflict | SyncError::Network(_) | SyncError::Unexpected(_) => {
                ErrorClass::TransientNetwork
            }
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Unexpected(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
