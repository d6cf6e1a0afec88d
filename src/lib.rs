//! livecue - Time-driven content scheduling for live event pages
//!
//! Decides which segment of a pre-planned timeline should be visible at any
//! moment, based on an authoritative clock, live stream status and metadata
//! conditions, and announces every change to the host.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and schedule files
//! - [`models`] - Core data structures shared with the host
//! - [`scheduler`] - Timeline, activation rules and the polling engine
//! - [`time`] - Authoritative time with caching, drift detection and backoff
//! - [`plugins`] - Live session and metadata stores
//! - [`bus`] - Best-effort notification bus between engine contexts
//! - [`host`] - Context acquisition and the orchestrator
//! - [`metrics`] - Prometheus counters
//! - [`utils`] - Instant parsing and feed errors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use livecue::config::Config;
//! use livecue::host::Orchestrator;
//! use livecue::time::{HttpTimeSource, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let source = HttpTimeSource::from_config(&config.time)?;
//!     let orchestrator = Orchestrator::new(config, Arc::new(SystemClock::new()), Arc::new(source));
//!     // orchestrator.start(init, &mut sink).await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod models;
pub mod plugins;
pub mod scheduler;
pub mod time;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ScheduleFile};
    pub use crate::error::{Error, ErrorCategory, LivecueErrorTrait, Result};
    pub use crate::host::{Orchestrator, SegmentSink, StartOutcome};
    pub use crate::models::{EngineEvent, MetadataCondition, Segment, TimeSample};
    pub use crate::scheduler::{InitMessage, Schedule, SchedulerEngine, TestingConfig};
}

// Direct re-exports for convenience
pub use models::{EngineEvent, MetadataCondition, Segment, TimeSample};
