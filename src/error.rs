//! Error types for watcher poll cycles
//!
//! Errors are classified by recoverability:
//! - Retryable: Network issues, timeouts, server errors
//! - NonRetryable: Configuration errors, malformed payloads
//! - RequiresUserAction: Expired or revoked mailbox token

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error types for fetching and configuring watchers
#[derive(Debug, Error)]
pub enum WatchError {
    // Retryable errors
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    // Non-retryable errors
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file unreadable at {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    // Requires user action
    #[error("Token expired or revoked")]
    AuthExpired,
}

impl WatchError {
    /// Returns true if the next cycle has a reasonable chance of succeeding
    pub fn is_retryable(&self) -> bool {
        match self {
            WatchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            WatchError::Timeout(_) => true,
            WatchError::Api { status, .. } => *status == 429 || *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, WatchError::AuthExpired)
    }
}

/// Serializable failure record handed to error listeners
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleFailure {
    pub poller: String,
    pub message: String,
    pub error_type: ErrorType,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl CycleFailure {
    pub fn new(poller: &str, err: &WatchError, at: DateTime<Utc>) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        CycleFailure {
            poller: poller.to_string(),
            message: err.to_string(),
            error_type,
            retryable: err.is_retryable(),
            at,
        }
    }
}
