//! Core data structures shared by the engine and its host
//!
//! Everything in this module crosses the host/engine boundary by value, so
//! every type is `Clone` and (de)serializes with the camelCase field names used
//! on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Segment
// ============================================================================

/// A single metadata gate on a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataCondition {
    /// Key looked up in the metadata store
    pub key: String,

    /// Exact value the key must hold; `None` accepts any non-empty value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Value>,
}

impl MetadataCondition {
    /// Condition satisfied by any non-empty value
    pub fn present(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expected_value: None,
        }
    }

    /// Condition requiring an exact value
    pub fn equals(key: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            expected_value: Some(expected.into()),
        }
    }
}

/// One timeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Earliest instant (epoch ms) the segment may become active
    #[serde(default)]
    pub toggle_time: Option<i64>,

    /// Opaque reference handed to the renderer
    pub content_ref: String,

    /// Id into the live-sessions store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_session_ref: Option<String>,

    /// All of these must match before the segment activates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_conditions: Vec<MetadataCondition>,
}

impl Segment {
    /// Create a plain segment with no gating
    pub fn new(content_ref: impl Into<String>, toggle_time: Option<i64>) -> Self {
        Self {
            toggle_time,
            content_ref: content_ref.into(),
            live_session_ref: None,
            metadata_conditions: Vec::new(),
        }
    }

    /// Attach a live session reference
    pub fn with_live_session(mut self, session: impl Into<String>) -> Self {
        self.live_session_ref = Some(session.into());
        self
    }

    /// Attach a metadata condition
    pub fn with_condition(mut self, condition: MetadataCondition) -> Self {
        self.metadata_conditions.push(condition);
        self
    }

    /// Whether the toggle time has been reached at `now_ms`
    ///
    /// Segments without a toggle time are always considered reached.
    pub fn toggle_passed(&self, now_ms: i64) -> bool {
        self.toggle_time.map_or(true, |t| t <= now_ms)
    }
}

// ============================================================================
// Time Sample
// ============================================================================

/// One authoritative time observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSample {
    /// Authoritative epoch ms at capture
    pub time: i64,

    /// Local wall clock reading at capture
    pub local_capture_instant: i64,

    /// Local monotonic clock reading at capture
    pub monotonic_capture_instant: i64,
}

// ============================================================================
// Engine Events
// ============================================================================

/// Classification of engine faults reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Init message was missing its tab identity
    MissingTabId,
    /// Schedule could not be built
    InvalidSchedule,
}

/// Messages sent from the engine to its host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The segment that should be visible now
    Segment(Segment),

    /// The engine refused to start
    Fault { kind: FaultKind, message: String },
}

impl EngineEvent {
    /// The announced segment, if this is a segment event
    pub fn segment(&self) -> Option<&Segment> {
        match self {
            Self::Segment(segment) => Some(segment),
            Self::Fault { .. } => None,
        }
    }
}
