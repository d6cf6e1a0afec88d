//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Schedule could not be built
    InvalidSchedule {
        reason: String,
    },

    /// Segment id does not belong to the schedule
    SegmentNotFound {
        id: usize,
    },

    /// Init message carried no tab identity
    MissingTabId,

    /// Part of an init payload could not be decoded
    MalformedPayload {
        field: String,
        reason: String,
    },

    /// Testing configuration value could not be interpreted as a time
    InvalidTestingValue {
        field: String,
        value: String,
    },

    /// Serialization/deserialization error
    SerializationError {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSchedule { reason } => {
                write!(f, "Invalid schedule: {}", reason)
            }
            Self::SegmentNotFound { id } => {
                write!(f, "Segment {} is not part of the schedule", id)
            }
            Self::MissingTabId => {
                write!(f, "Init message is missing a tab identity")
            }
            Self::MalformedPayload { field, reason } => {
                write!(f, "Malformed '{}' payload: {}", field, reason)
            }
            Self::InvalidTestingValue { field, value } => {
                write!(f, "Invalid testing value for '{}': {}", field, value)
            }
            Self::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create an invalid schedule error
    pub fn invalid_schedule(reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            reason: reason.into(),
        }
    }

    /// Create a segment not found error
    pub fn segment_not_found(id: usize) -> Self {
        Self::SegmentNotFound { id }
    }

    /// Create a malformed payload error
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid testing value error
    pub fn invalid_testing_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidTestingValue {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether the engine must refuse to start on this error
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::MissingTabId | Self::InvalidSchedule { .. })
    }

    /// Check if the error is recoverable
    ///
    /// Malformed input degrades to "input absent" and is recoverable;
    /// configuration errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload { .. }
                | Self::InvalidTestingValue { .. }
                | Self::SerializationError { .. }
        )
    }
}
