//! Unified error handling for the livecue crate
//!
//! The host boundary reports every failure as an [`Error`], which wraps the
//! domain-specific errors and classifies them for logging and for the notice
//! shown to viewers.
//!
//! # Architecture
//!
//! - [`LivecueErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use livecue::error::{Error, LivecueErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = err.category().description(), "Degraded: {}", err);
//!     } else {
//!         eprintln!("{}", err.user_message());
//!     }
//! }
//! ```

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::host::error::HostError;
pub use crate::models::FaultKind;
pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{FeedError, TimeError};

/// Common trait for all livecue error types
pub trait LivecueErrorTrait: std::error::Error {
    /// Check if this error can be absorbed without stopping the page
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;

    /// Get a description suitable for viewers
    fn user_message(&self) -> String;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration and validation errors
    Config,
    /// Network-related errors (HTTP, timeout, status)
    Network,
    /// Malformed payloads and responses
    Parsing,
    /// Scheduler and timeline errors
    Scheduler,
    /// Execution context and engine lifecycle errors
    Host,
}

impl ErrorCategory {
    /// Short description of the category
    pub fn description(&self) -> &'static str {
        match self {
            Self::Config => "configuration error",
            Self::Network => "network error",
            Self::Parsing => "parsing error",
            Self::Scheduler => "scheduler error",
            Self::Host => "host error",
        }
    }
}

/// Unified error type for the livecue crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler and timeline errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Time acquisition errors
    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    /// Live status feed errors
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Host and execution context errors
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl LivecueErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Time(e) => e.is_recoverable(),
            Self::Feed(_) => true,
            Self::Host(e) => e.is_recoverable(),
            Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(e) => match e {
                SchedulerError::MissingTabId => ErrorCategory::Config,
                SchedulerError::MalformedPayload { .. }
                | SchedulerError::InvalidTestingValue { .. }
                | SchedulerError::SerializationError { .. } => ErrorCategory::Parsing,
                _ => ErrorCategory::Scheduler,
            },
            Self::Time(TimeError::Malformed(_)) | Self::Feed(FeedError::Malformed(_)) => {
                ErrorCategory::Parsing
            }
            Self::Time(_) | Self::Feed(_) => ErrorCategory::Network,
            Self::Host(_) => ErrorCategory::Host,
            Self::Config(_) => ErrorCategory::Config,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::Host(e) => e.user_message(),
            Self::Scheduler(e) if e.is_fatal_config() => {
                "Scheduled content could not be loaded for this page.".to_string()
            }
            Self::Config(msg) => format!("Configuration problem: {msg}"),
            other => format!("Something went wrong ({})", other.category().description()),
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Rebuild the scheduler error behind a fault the engine reported
    pub fn from_fault(kind: FaultKind, message: String) -> Self {
        match kind {
            FaultKind::MissingTabId => Self::Scheduler(SchedulerError::MissingTabId),
            FaultKind::InvalidSchedule => Self::Scheduler(SchedulerError::invalid_schedule(message)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
