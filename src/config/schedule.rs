//! Schedule file format
//!
//! Hosts describe the timeline in TOML or JSON. Toggle times may be written
//! as epoch milliseconds or RFC 3339 timestamps; both become epoch ms when
//! the entries are turned into [`Segment`]s.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{MetadataCondition, Segment};
use crate::scheduler::{Schedule, SchedulerError, SchedulerResult};
use crate::utils::parse_instant_text;

/// Toggle time as written in a schedule file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToggleSpec {
    /// Epoch milliseconds
    Millis(i64),
    /// RFC 3339 timestamp or integer string
    Text(String),
}

impl ToggleSpec {
    /// Resolve to epoch milliseconds
    pub fn to_epoch_ms(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Text(text) => parse_instant_text(text),
        }
    }
}

/// Metadata gate as written in a schedule file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEntry {
    pub key: String,
    #[serde(default)]
    pub expected_value: Option<serde_json::Value>,
}

/// One `[[segments]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub content_ref: String,

    #[serde(default)]
    pub toggle_time: Option<ToggleSpec>,

    #[serde(default)]
    pub live_session_ref: Option<String>,

    #[serde(default)]
    pub metadata_conditions: Vec<ConditionEntry>,
}

impl ScheduleEntry {
    /// Convert into an engine segment
    pub fn to_segment(&self) -> SchedulerResult<Segment> {
        let toggle_time = match &self.toggle_time {
            None => None,
            Some(spec) => Some(spec.to_epoch_ms().ok_or_else(|| {
                SchedulerError::invalid_schedule(format!(
                    "segment '{}' has an unreadable toggle_time: {:?}",
                    self.content_ref, spec
                ))
            })?),
        };

        Ok(Segment {
            toggle_time,
            content_ref: self.content_ref.clone(),
            live_session_ref: self.live_session_ref.clone(),
            metadata_conditions: self
                .metadata_conditions
                .iter()
                .map(|c| MetadataCondition {
                    key: c.key.clone(),
                    expected_value: c.expected_value.clone(),
                })
                .collect(),
        })
    }
}

/// Complete schedule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(default)]
    pub segments: Vec<ScheduleEntry>,

    /// Initial plugin snapshot handed to the engine, `{name: {data: {...}}}`
    #[serde(default)]
    pub plugins: Option<serde_json::Value>,
}

impl ScheduleFile {
    /// Load a schedule file, choosing the format by extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule file: {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON schedule: {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML schedule: {}", path.display()))
        }
    }

    /// Convert every entry into a segment
    pub fn segments(&self) -> SchedulerResult<Vec<Segment>> {
        self.segments.iter().map(ScheduleEntry::to_segment).collect()
    }

    /// Build the linked schedule
    pub fn build(&self) -> SchedulerResult<Schedule> {
        Schedule::build(self.segments()?)
    }
}
