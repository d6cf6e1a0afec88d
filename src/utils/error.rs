//! Error types for external HTTP feeds
//!
//! Fetch failures never reach engine callers. The time authority converts
//! them into a fallback reading and a backoff step; the live status poller
//! logs them and keeps polling. Only client construction errors surface, as
//! [`crate::error::Error`] from the host.

use thiserror::Error;

/// Errors that can occur while fetching authoritative time
#[derive(Error, Debug)]
pub enum TimeError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server error with status code
    #[error("Time server returned status {0}")]
    ServerError(u16),

    /// Response body was not a recognizable timestamp
    #[error("Malformed time response: {0}")]
    Malformed(String),

    /// Time source not configured
    #[error("Time source unavailable: {0}")]
    Unavailable(String),
}

impl TimeError {
    /// Create a malformed response error
    pub fn malformed(body: impl Into<String>) -> Self {
        Self::Malformed(body.into())
    }

    /// Every time acquisition error is transient by contract
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

/// Errors that can occur while polling the live status feed
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server error with status code
    #[error("Status feed returned status {0}")]
    ServerError(u16),

    /// Body was not a `{sessionId: bool}` object
    #[error("Malformed status response: {0}")]
    Malformed(String),
}
