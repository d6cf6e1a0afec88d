//! Host-side error types

use thiserror::Error;

/// Errors raised while hosting an engine
#[derive(Error, Debug)]
pub enum HostError {
    /// A single context strategy could not start the engine
    #[error("{strategy} failed: {reason}")]
    LaunchFailed { strategy: String, reason: String },

    /// Every context strategy failed
    #[error("No execution context available ({})", attempts.join("; "))]
    ContextUnavailable { attempts: Vec<String> },

    /// The engine did not announce anything in time
    #[error("No segment announced within {0} ms")]
    FirstMessageTimeout(u64),

    /// The engine is gone
    #[error("Engine stopped")]
    EngineStopped,
}

impl HostError {
    pub fn launch_failed(strategy: impl Into<String>, reason: impl ToString) -> Self {
        Self::LaunchFailed {
            strategy: strategy.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the page can carry on, possibly without scheduled content
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::FirstMessageTimeout(_) => true,
            Self::LaunchFailed { .. }
            | Self::ContextUnavailable { .. }
            | Self::EngineStopped => false,
        }
    }

    /// Message suitable for showing to a viewer
    pub fn user_message(&self) -> String {
        match self {
            Self::LaunchFailed { .. } | Self::ContextUnavailable { .. } => {
                "Scheduled content is unavailable right now. The page will keep working; try reloading later.".to_string()
            }
            Self::FirstMessageTimeout(_) => "Scheduled content is taking longer than usual to load.".to_string(),
            Self::EngineStopped => {
                "Scheduled content could not be loaded for this page.".to_string()
            }
        }
    }
}
