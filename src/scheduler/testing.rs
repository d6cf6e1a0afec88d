//! Simulated time for previews and deterministic runs
//!
//! A [`TestingConfig`] arrives with the init message (or is read from a page
//! URL). [`TestingOverride::init`] turns it into a time offset, a frozen flag
//! and the stream-end override consulted by the condition evaluator.

use serde_json::Value;
use tracing::warn;
use url::Url;

use super::error::SchedulerError;
use crate::utils::value_to_epoch_ms;

/// Query parameter carrying a frozen instant
pub const TIMING_PARAM: &str = "timing";

/// Query parameter forcing live sessions to count as ended
pub const AVOID_STREAM_END_PARAM: &str = "avoidStreamEnd";

/// Raw simulation settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestingConfig {
    /// Instant to freeze the clock at
    pub toggle_time: Option<Value>,

    /// Instant the clock should read now, then keep running
    pub server_time: Option<Value>,

    /// Treat every live session as ended
    pub avoid_stream_end_flag: Option<bool>,
}

impl TestingConfig {
    /// Decode the `testing` member of an init payload
    ///
    /// `null` means no testing. A non-object payload is reported and treated
    /// the same way. A malformed flag is dropped on its own.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = match value {
            Value::Null => return None,
            Value::Object(map) => map,
            other => {
                warn!(payload = %other, "Testing payload is not an object, ignoring");
                return None;
            }
        };

        let avoid_stream_end_flag = match map.get("avoidStreamEndFlag") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(flag)) => Some(*flag),
            Some(other) => {
                let err = SchedulerError::invalid_testing_value("avoidStreamEndFlag", other.to_string());
                warn!(error = %err, "Ignoring testing flag");
                None
            }
        };

        Some(Self {
            toggle_time: map.get("toggleTime").filter(|v| !v.is_null()).cloned(),
            server_time: map.get("serverTime").filter(|v| !v.is_null()).cloned(),
            avoid_stream_end_flag,
        })
    }

    /// Read simulation parameters from a page URL
    ///
    /// Returns `None` when the URL is unparseable or carries none of them.
    pub fn from_page_url(page_url: &str) -> Option<Self> {
        let url = match Url::parse(page_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = page_url, error = %e, "Unparseable page URL, no simulation");
                return None;
            }
        };

        let mut config = Self::default();
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                TIMING_PARAM => config.toggle_time = Some(Value::String(value.into_owned())),
                AVOID_STREAM_END_PARAM if value == "true" => {
                    config.avoid_stream_end_flag = Some(true)
                }
                _ => {}
            }
        }

        (config != Self::default()).then_some(config)
    }

    /// Whether no setting is present
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Encode as the `testing` member of an init payload
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(toggle_time) = &self.toggle_time {
            map.insert("toggleTime".to_string(), toggle_time.clone());
        }
        if let Some(server_time) = &self.server_time {
            map.insert("serverTime".to_string(), server_time.clone());
        }
        if let Some(flag) = self.avoid_stream_end_flag {
            map.insert("avoidStreamEndFlag".to_string(), Value::Bool(flag));
        }
        Value::Object(map)
    }
}

/// Resolved simulation state of one engine instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestingOverride {
    time_offset_ms: i64,
    frozen: bool,
    avoid_stream_end: bool,
    active: bool,
}

impl TestingOverride {
    /// Build from settings, see [`TestingOverride::init`]
    pub fn from_config(config: Option<&TestingConfig>, wall_now_ms: i64) -> Self {
        let mut testing = Self::default();
        testing.init(config, wall_now_ms);
        testing
    }

    /// Reset, then apply the stream-end flag, server time and toggle time in
    /// that order
    ///
    /// A toggle time replaces the running clock set up by a server time.
    /// Unreadable instants are reported and skipped.
    pub fn init(&mut self, config: Option<&TestingConfig>, wall_now_ms: i64) {
        *self = Self::default();
        let Some(config) = config else {
            return;
        };

        if config.avoid_stream_end_flag == Some(true) {
            self.avoid_stream_end = true;
            self.active = true;
        }

        if let Some(offset) = read_offset("serverTime", config.server_time.as_ref(), wall_now_ms) {
            self.time_offset_ms = offset;
            self.frozen = false;
            self.active = true;
        }

        if let Some(offset) = read_offset("toggleTime", config.toggle_time.as_ref(), wall_now_ms) {
            self.time_offset_ms = offset;
            self.frozen = true;
            self.active = true;
        }
    }

    /// Shift a local reading into simulated time
    pub fn adjust_time(&self, time_ms: i64) -> i64 {
        time_ms.saturating_add(self.time_offset_ms)
    }

    /// Whether the clock is paused at a fixed instant
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether live sessions are forced to count as ended
    pub fn avoid_stream_end(&self) -> bool {
        self.avoid_stream_end
    }

    /// Whether any simulation setting is in effect
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms
    }
}

/// Offset from the local wall clock to the instant in `value`
///
/// Unreadable instants, and instants too far from `wall_now_ms` to express
/// as an offset, are reported and skipped.
fn read_offset(field: &str, value: Option<&Value>, wall_now_ms: i64) -> Option<i64> {
    let value = value?;
    match value_to_epoch_ms(value).and_then(|ms| ms.checked_sub(wall_now_ms)) {
        Some(offset) => Some(offset),
        None => {
            let err = SchedulerError::invalid_testing_value(field, value.to_string());
            warn!(error = %err, "Ignoring testing instant");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WALL: i64 = 1_000_000;

    #[test]
    fn test_no_config_is_inactive() {
        let testing = TestingOverride::from_config(None, WALL);
        assert!(!testing.is_active());
        assert!(!testing.is_frozen());
        assert_eq!(testing.adjust_time(WALL), WALL);
    }

    #[test]
    fn test_server_time_runs() {
        let config = TestingConfig::from_value(&json!({"serverTime": 5_000})).unwrap();
        let testing = TestingOverride::from_config(Some(&config), WALL);

        assert!(testing.is_active());
        assert!(!testing.is_frozen());
        assert_eq!(testing.adjust_time(WALL), 5_000);
        assert_eq!(testing.adjust_time(WALL + 250), 5_250);
    }

    #[test]
    fn test_toggle_time_wins_over_server_time() {
        let config = TestingConfig::from_value(&json!({
            "serverTime": 5_000,
            "toggleTime": 9_000
        }))
        .unwrap();
        let testing = TestingOverride::from_config(Some(&config), WALL);

        assert!(testing.is_frozen());
        assert_eq!(testing.adjust_time(WALL), 9_000);
    }

    #[test]
    fn test_avoid_stream_end_alone() {
        let config = TestingConfig::from_value(&json!({"avoidStreamEndFlag": true})).unwrap();
        let testing = TestingOverride::from_config(Some(&config), WALL);

        assert!(testing.is_active());
        assert!(testing.avoid_stream_end());
        assert!(!testing.is_frozen());
        assert_eq!(testing.time_offset_ms(), 0);
    }

    #[test]
    fn test_invalid_instants_ignored() {
        let config = TestingConfig::from_value(&json!({
            "toggleTime": "half past nine",
            "serverTime": {"nested": 1},
            "avoidStreamEndFlag": "yes"
        }))
        .unwrap();
        let testing = TestingOverride::from_config(Some(&config), WALL);
        assert!(!testing.is_active());
    }

    #[test]
    fn test_out_of_range_instants_ignored() {
        let config = TestingConfig::from_value(&json!({
            "toggleTime": i64::MIN,
            "serverTime": i64::MIN
        }))
        .unwrap();
        let testing = TestingOverride::from_config(Some(&config), WALL);
        assert!(!testing.is_active());
        assert_eq!(testing.adjust_time(WALL), WALL);

        let url = format!("https://example.com/event?timing={}", i64::MIN);
        let config = TestingConfig::from_page_url(&url).unwrap();
        let testing = TestingOverride::from_config(Some(&config), WALL);
        assert!(!testing.is_frozen());
    }

    #[test]
    fn test_adjust_time_saturates() {
        let config = TestingConfig::from_value(&json!({"serverTime": i64::MAX})).unwrap();
        let testing = TestingOverride::from_config(Some(&config), 0);
        assert!(testing.is_active());
        assert_eq!(testing.adjust_time(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_init_resets_previous_state() {
        let config = TestingConfig::from_value(&json!({"toggleTime": 9_000})).unwrap();
        let mut testing = TestingOverride::from_config(Some(&config), WALL);
        testing.init(None, WALL);
        assert_eq!(testing, TestingOverride::default());
    }

    #[test]
    fn test_from_value_non_object() {
        assert!(TestingConfig::from_value(&Value::Null).is_none());
        assert!(TestingConfig::from_value(&json!("frozen")).is_none());
    }

    #[test]
    fn test_from_page_url() {
        let config = TestingConfig::from_page_url(
            "https://example.com/event?timing=2024-05-01T17:00:00Z&avoidStreamEnd=true",
        )
        .unwrap();
        assert_eq!(config.toggle_time, Some(json!("2024-05-01T17:00:00Z")));
        assert_eq!(config.avoid_stream_end_flag, Some(true));

        let testing = TestingOverride::from_config(Some(&config), 0);
        assert_eq!(testing.adjust_time(0), 1_714_582_800_000);

        assert!(TestingConfig::from_page_url("https://example.com/event").is_none());
        assert!(TestingConfig::from_page_url("not a url").is_none());
    }

    #[test]
    fn test_to_value_decodes_back() {
        let config = TestingConfig {
            toggle_time: Some(json!(9_000)),
            server_time: None,
            avoid_stream_end_flag: Some(true),
        };
        let value = config.to_value();
        assert_eq!(value, json!({"toggleTime": 9_000, "avoidStreamEndFlag": true}));
        assert_eq!(TestingConfig::from_value(&value), Some(config));
    }
}
