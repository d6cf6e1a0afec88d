//! Activation rules for the next segment
//!
//! [`evaluate`] is a pure function of the current segment, the candidate,
//! the plugin stores, the current time and the testing override. Rules are
//! checked in order and the first one that applies decides:
//!
//! 1. Current segment's live session still active: hold
//! 2. Candidate references a live session: toggle time must have passed, then
//!    advance once the session is inactive
//! 3. Candidate declares metadata conditions: advance only if all match
//! 4. Otherwise advance once the toggle time has passed
//!
//! The stream-end testing override makes every live session count as ended.

use serde_json::Value;

use crate::models::{MetadataCondition, Segment};
use crate::plugins::PluginSet;

use super::testing::TestingOverride;

/// Why a candidate was not activated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// The current segment's live session is still running
    CurrentLive,
    /// The candidate's own live session is still running
    CandidateLive,
    /// The candidate's toggle time is in the future
    NotYet,
    /// At least one metadata condition is unmet
    MetadataUnmet,
}

/// Outcome of evaluating a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Advance,
    Hold(HoldReason),
}

impl Decision {
    pub fn is_advance(self) -> bool {
        matches!(self, Self::Advance)
    }

    /// Label used for metrics and logs
    pub fn label(self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Hold(_) => "hold",
        }
    }
}

/// Decide whether `candidate` should become active at `now_ms`
pub fn evaluate(
    current: Option<&Segment>,
    candidate: &Segment,
    stores: &PluginSet,
    now_ms: i64,
    testing: &TestingOverride,
) -> Decision {
    let session_running =
        |session: &str| !testing.avoid_stream_end() && stores.is_session_active(session);

    if let Some(session) = current.and_then(|c| c.live_session_ref.as_deref()) {
        if session_running(session) {
            return Decision::Hold(HoldReason::CurrentLive);
        }
    }

    if let Some(session) = candidate.live_session_ref.as_deref() {
        if !candidate.toggle_passed(now_ms) {
            return Decision::Hold(HoldReason::NotYet);
        }
        return if session_running(session) {
            Decision::Hold(HoldReason::CandidateLive)
        } else {
            Decision::Advance
        };
    }

    if !candidate.metadata_conditions.is_empty() {
        let all_met = candidate
            .metadata_conditions
            .iter()
            .all(|condition| condition_met(condition, stores));
        return if all_met {
            Decision::Advance
        } else {
            Decision::Hold(HoldReason::MetadataUnmet)
        };
    }

    if candidate.toggle_passed(now_ms) {
        Decision::Advance
    } else {
        Decision::Hold(HoldReason::NotYet)
    }
}

fn condition_met(condition: &MetadataCondition, stores: &PluginSet) -> bool {
    let observed = stores.metadata(&condition.key);
    match &condition.expected_value {
        Some(expected) => observed == Some(expected),
        None => observed.is_some_and(is_non_empty),
    }
}

/// Missing, `null`, `""`, `[]` and `{}` count as empty
fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
