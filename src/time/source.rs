//! External time sources
//!
//! The authority talks to a [`TimeSource`] rather than to HTTP directly so
//! that simulations and tests can script responses.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::TimeConfig;
use crate::utils::error::TimeError;
use crate::utils::parse_time_body;

/// Source of authoritative epoch milliseconds
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Fetch the current authoritative time
    async fn fetch(&self) -> Result<i64, TimeError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Time source backed by an HTTP endpoint
pub struct HttpTimeSource {
    client: Client,
    url: String,
}

impl HttpTimeSource {
    /// Create a source for `url` with the given request timeout
    ///
    /// # Errors
    ///
    /// Returns `TimeError::Http` if the HTTP client cannot be created
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TimeError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Create a source from the time configuration
    pub fn from_config(config: &TimeConfig) -> Result<Self, TimeError> {
        Self::new(
            config.source_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Endpoint this source queries
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TimeSource for HttpTimeSource {
    async fn fetch(&self) -> Result<i64, TimeError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TimeError::ServerError(status.as_u16()));
        }

        let body = response.text().await?;
        parse_time_body(&body)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Source that is never reachable
///
/// Used when no endpoint is configured; the authority then falls back to the
/// local clock on every call, with backoff keeping the attempts cheap.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTimeSource;

#[async_trait]
impl TimeSource for OfflineTimeSource {
    async fn fetch(&self) -> Result<i64, TimeError> {
        Err(TimeError::Unavailable("no time source configured".to_string()))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
