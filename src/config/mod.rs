//! Configuration management for livecue
//!
//! This module handles loading and validating engine tunables from
//! environment variables and TOML files. Schedule files live in
//! [`schedule`].

pub mod schedule;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub use schedule::{ScheduleEntry, ScheduleFile, ToggleSpec};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time authority configuration
    pub time: TimeConfig,

    /// Scheduler loop configuration
    pub engine: EngineConfig,

    /// Live status feed configuration
    pub live: LiveConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Time authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Time server endpoint; empty disables external fetches
    pub source_url: String,

    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// How long a sample stays fresh
    pub cache_ttl_ms: i64,

    /// Wall/monotonic divergence that invalidates a sample
    pub drift_threshold_ms: i64,

    /// Minimum spacing between fetches with no failures
    pub base_interval_ms: u64,

    /// Growth factor of the spacing per consecutive failure
    pub backoff_multiplier: f64,

    /// Ceiling of the spacing
    pub max_interval_ms: u64,

    /// Cap on the counted failure streak
    pub max_failures: u32,

    /// Random jitter as a fraction of the spacing (0.0 - 1.0)
    pub jitter_ratio: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            source_url: String::from("https://time.akamai.com/?ms"),
            request_timeout_ms: 5_000,
            cache_ttl_ms: 300_000,
            drift_threshold_ms: 5_000,
            base_interval_ms: 5_000,
            backoff_multiplier: 2.0,
            max_interval_ms: 300_000,
            max_failures: 10,
            jitter_ratio: 0.3,
        }
    }
}

/// Scheduler loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lower bound of the randomized tick interval
    pub poll_min_ms: u64,

    /// Upper bound of the randomized tick interval
    pub poll_max_ms: u64,

    /// How long the host waits for the first announced segment
    pub first_message_timeout_ms: u64,

    /// Capacity of the in-process notification bus
    pub bus_capacity: usize,

    /// Fixed seed for jitter; random when absent
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_min_ms: 500,
            poll_max_ms: 1_500,
            first_message_timeout_ms: 3_000,
            bus_capacity: 64,
            rng_seed: None,
        }
    }
}

/// Live status feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Endpoint returning `{sessionId: bool}`; polling is off when absent
    pub status_url: Option<String>,

    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            status_url: None,
            poll_interval_ms: 10_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["text", "json"];

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let time = TimeConfig {
            source_url: std::env::var("LIVECUE_TIME_URL").unwrap_or(defaults.time.source_url),
            request_timeout_ms: env_parse("LIVECUE_TIME_TIMEOUT_MS")
                .unwrap_or(defaults.time.request_timeout_ms),
            cache_ttl_ms: env_parse("LIVECUE_TIME_TTL_MS").unwrap_or(defaults.time.cache_ttl_ms),
            drift_threshold_ms: env_parse("LIVECUE_DRIFT_THRESHOLD_MS")
                .unwrap_or(defaults.time.drift_threshold_ms),
            ..defaults.time
        };

        let engine = EngineConfig {
            poll_min_ms: env_parse("LIVECUE_POLL_MIN_MS").unwrap_or(defaults.engine.poll_min_ms),
            poll_max_ms: env_parse("LIVECUE_POLL_MAX_MS").unwrap_or(defaults.engine.poll_max_ms),
            first_message_timeout_ms: env_parse("LIVECUE_FIRST_MESSAGE_TIMEOUT_MS")
                .unwrap_or(defaults.engine.first_message_timeout_ms),
            rng_seed: env_parse("LIVECUE_RNG_SEED"),
            ..defaults.engine
        };

        let live = LiveConfig {
            status_url: std::env::var("LIVECUE_LIVE_STATUS_URL").ok(),
            poll_interval_ms: env_parse("LIVECUE_LIVE_POLL_MS")
                .unwrap_or(defaults.live.poll_interval_ms),
        };

        let logging = LoggingConfig {
            level: std::env::var("LIVECUE_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("LIVECUE_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            time,
            engine,
            live,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.time.source_url.is_empty() {
            let url = Url::parse(&self.time.source_url)
                .with_context(|| format!("Invalid time source URL: {}", self.time.source_url))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("time source URL must use http or https");
            }
        }

        if self.time.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be greater than 0");
        }

        if self.time.cache_ttl_ms <= 0 {
            anyhow::bail!("cache_ttl_ms must be positive");
        }

        if self.time.drift_threshold_ms <= 0 {
            anyhow::bail!("drift_threshold_ms must be positive");
        }

        if self.time.backoff_multiplier < 1.0 {
            anyhow::bail!("backoff_multiplier must be at least 1.0");
        }

        if !(0.0..=1.0).contains(&self.time.jitter_ratio) {
            anyhow::bail!("jitter_ratio must be between 0.0 and 1.0");
        }

        if self.engine.poll_min_ms == 0 || self.engine.poll_min_ms > self.engine.poll_max_ms {
            anyhow::bail!("poll_min_ms must be positive and not exceed poll_max_ms");
        }

        if self.engine.bus_capacity == 0 {
            anyhow::bail!("bus_capacity must be greater than 0");
        }

        if let Some(ref status_url) = self.live.status_url {
            Url::parse(status_url)
                .with_context(|| format!("Invalid live status URL: {status_url}"))?;
        }

        if self.live.poll_interval_ms == 0 {
            anyhow::bail!("live poll_interval_ms must be greater than 0");
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            anyhow::bail!("unknown log level: {}", self.logging.level);
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            anyhow::bail!("log format must be text or json, got {}", self.logging.format);
        }

        Ok(())
    }

    /// Get the host's first-message ceiling as Duration
    #[must_use]
    pub fn first_message_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.first_message_timeout_ms)
    }
}
