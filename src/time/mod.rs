//! Authoritative time acquisition
//!
//! The [`TimeAuthority`] produces one best-effort "now" for the scheduler.
//! It reconciles an untrusted local clock with an external time source while
//! keeping external calls rare.
//!
//! # Resolution order
//!
//! 1. Testing mode: local wall time, the external source is never consulted
//! 2. Drift check: a cached sample whose wall and monotonic elapsed times
//!    disagree by more than the threshold is dropped
//! 3. Fresh cache: `sample.time + monotonic elapsed`
//! 4. Rate limiter closed: stale cache or wall time
//! 5. External fetch: on success cache and broadcast, on failure back off and
//!    fall back
//!
//! # Sharing
//!
//! Fresh samples are published on the [`TIME_TOPIC`](crate::bus::TIME_TOPIC)
//! bus topic. Siblings accept them only while younger than the TTL and
//! re-anchor them on their own monotonic clock.

pub mod clock;
pub mod limiter;
pub mod source;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::{NotificationBus, TIME_TOPIC};
use crate::config::TimeConfig;
use crate::metrics;
use crate::models::TimeSample;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::BackoffLimiter;
pub use source::{HttpTimeSource, OfflineTimeSource, TimeSource};

/// Message type tag for shared samples
pub const TIME_UPDATE_TYPE: &str = "time-update";

/// Wire shape of a shared time sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: TimeSample,
}

impl TimeUpdate {
    pub fn new(sample: TimeSample) -> Self {
        Self {
            kind: TIME_UPDATE_TYPE.to_string(),
            data: sample,
        }
    }
}

/// Best-effort source of the current time for one engine context
pub struct TimeAuthority {
    clock: Arc<dyn Clock>,
    source: Arc<dyn TimeSource>,
    bus: Option<Arc<dyn NotificationBus>>,
    config: TimeConfig,
    limiter: BackoffLimiter,
    rng: ChaCha8Rng,
    cache: Option<TimeSample>,
    testing_active: bool,
}

impl TimeAuthority {
    /// Create an authority with its collaborators
    pub fn new(
        clock: Arc<dyn Clock>,
        source: Arc<dyn TimeSource>,
        bus: Option<Arc<dyn NotificationBus>>,
        config: TimeConfig,
        rng_seed: Option<u64>,
    ) -> Self {
        let rng = match rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            clock,
            limiter: BackoffLimiter::new(&config),
            source,
            bus,
            config,
            rng,
            cache: None,
            testing_active: false,
        }
    }

    /// Switch testing mode on or off
    pub fn set_testing_active(&mut self, active: bool) {
        self.testing_active = active;
    }

    /// Whether testing mode bypasses the external source
    pub fn testing_active(&self) -> bool {
        self.testing_active
    }

    /// Currently cached sample, if any
    pub fn cached_sample(&self) -> Option<TimeSample> {
        self.cache
    }

    /// Failure streak driving the backoff
    pub fn consecutive_failures(&self) -> u32 {
        self.limiter.consecutive_failures()
    }

    /// Local wall-clock reading
    pub fn wall_ms(&self) -> i64 {
        self.clock.wall_ms()
    }

    /// Best time available without touching the network
    ///
    /// Fresh cache extrapolated on the monotonic clock, else wall time.
    /// A drifted cache is ignored here but only dropped by [`Self::now`].
    pub fn fast_now(&self) -> i64 {
        if self.testing_active {
            return self.clock.wall_ms();
        }
        let drifted = self
            .cache
            .is_some_and(|sample| self.drift_ms(&sample) > self.config.drift_threshold_ms);
        if drifted {
            return self.clock.wall_ms();
        }
        let mono = self.clock.monotonic_ms();
        self.fresh_reading(mono)
            .unwrap_or_else(|| self.clock.wall_ms())
    }

    /// Resolve the current time, fetching from the external source if due
    pub async fn now(&mut self) -> i64 {
        if self.testing_active {
            return self.clock.wall_ms();
        }

        self.invalidate_on_drift();

        let mono = self.clock.monotonic_ms();
        if let Some(time) = self.fresh_reading(mono) {
            metrics::record_time_cache("hit");
            debug!(time = time, "Serving time from cache");
            return time;
        }
        metrics::record_time_cache("miss");

        if !self.limiter.ready(mono) {
            metrics::record_time_fetch("rate_limited");
            debug!(
                failures = self.limiter.consecutive_failures(),
                spacing_ms = self.limiter.required_spacing_ms(),
                "Time fetch rate limited"
            );
            return self.fallback(mono);
        }

        self.limiter.record_attempt(mono, &mut self.rng);

        match self.source.fetch().await {
            Ok(time) => {
                self.limiter.record_success();
                let sample = TimeSample {
                    time,
                    local_capture_instant: self.clock.wall_ms(),
                    monotonic_capture_instant: self.clock.monotonic_ms(),
                };
                self.cache = Some(sample);
                self.broadcast(sample);
                metrics::record_time_fetch("success");
                debug!(source = self.source.name(), time = time, "Fetched authoritative time");
                time
            }
            Err(e) => {
                self.limiter.record_failure(&mut self.rng);
                metrics::record_time_fetch("failure");
                warn!(
                    source = self.source.name(),
                    error = %e,
                    failures = self.limiter.consecutive_failures(),
                    "Time fetch failed, falling back"
                );
                self.fallback(self.clock.monotonic_ms())
            }
        }
    }

    /// Consider a sample shared by a sibling context
    ///
    /// Returns whether the sample was accepted. Payloads of the wrong shape
    /// are treated as a miss.
    pub fn accept_broadcast(&mut self, payload: &Value) -> bool {
        let update: TimeUpdate = match serde_json::from_value(payload.clone()) {
            Ok(update) => update,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed time broadcast");
                return false;
            }
        };
        if update.kind != TIME_UPDATE_TYPE {
            return false;
        }

        let wall = self.clock.wall_ms();
        let age = wall.checked_sub(update.data.local_capture_instant);
        let time = match age {
            Some(age) if (0..self.config.cache_ttl_ms).contains(&age) => {
                update.data.time.checked_add(age)
            }
            _ => None,
        };
        let (Some(age), Some(time)) = (age, time) else {
            debug!(
                capture_ms = update.data.local_capture_instant,
                "Rejecting stale or future time broadcast"
            );
            return false;
        };

        self.cache = Some(TimeSample {
            time,
            local_capture_instant: wall,
            monotonic_capture_instant: self.clock.monotonic_ms(),
        });
        debug!(age_ms = age, "Accepted shared time sample");
        true
    }

    fn invalidate_on_drift(&mut self) {
        let Some(sample) = self.cache else {
            return;
        };
        let drift = self.drift_ms(&sample);

        if drift > self.config.drift_threshold_ms {
            warn!(
                drift_ms = drift,
                threshold_ms = self.config.drift_threshold_ms,
                "Clock drift detected, dropping cached time"
            );
            metrics::record_drift_invalidation();
            self.cache = None;
        }
    }

    /// Disagreement between wall and monotonic time elapsed since capture
    fn drift_ms(&self, sample: &TimeSample) -> i64 {
        let wall_elapsed = self.clock.wall_ms().saturating_sub(sample.local_capture_instant);
        let mono_elapsed = self
            .clock
            .monotonic_ms()
            .saturating_sub(sample.monotonic_capture_instant);
        wall_elapsed.saturating_sub(mono_elapsed).saturating_abs()
    }

    fn fresh_reading(&self, mono: i64) -> Option<i64> {
        let sample = self.cache?;
        let elapsed = mono.saturating_sub(sample.monotonic_capture_instant);
        (elapsed >= 0 && elapsed < self.config.cache_ttl_ms)
            .then(|| sample.time.saturating_add(elapsed))
    }

    fn fallback(&self, mono: i64) -> i64 {
        match self.cache {
            Some(sample) => sample
                .time
                .saturating_add(mono.saturating_sub(sample.monotonic_capture_instant).max(0)),
            None => self.clock.wall_ms(),
        }
    }

    fn broadcast(&self, sample: TimeSample) {
        let Some(bus) = &self.bus else {
            return;
        };
        match serde_json::to_value(TimeUpdate::new(sample)) {
            Ok(payload) => bus.publish(TIME_TOPIC, payload),
            Err(e) => warn!(error = %e, "Failed to encode time broadcast"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::TimeError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted source returning queued results
    struct ScriptedSource {
        results: Mutex<Vec<Result<i64, TimeError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<i64, TimeError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TimeSource for ScriptedSource {
        async fn fetch(&self) -> Result<i64, TimeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Err(TimeError::Unavailable("script exhausted".to_string()))
            } else {
                results.remove(0)
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn config() -> TimeConfig {
        TimeConfig {
            cache_ttl_ms: 60_000,
            drift_threshold_ms: 5_000,
            base_interval_ms: 1_000,
            max_interval_ms: 10_000,
            ..TimeConfig::default()
        }
    }

    fn authority(clock: Arc<ManualClock>, source: Arc<ScriptedSource>) -> TimeAuthority {
        TimeAuthority::new(clock, source, None, config(), Some(1))
    }

    #[tokio::test]
    async fn test_fetch_then_extrapolate_from_cache() {
        let clock = Arc::new(ManualClock::new(1_000));
        let source = ScriptedSource::new(vec![Ok(50_000)]);
        let mut authority = authority(clock.clone(), source.clone());

        assert_eq!(authority.now().await, 50_000);

        clock.advance(2_500);
        assert_eq!(authority.now().await, 52_500);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_testing_mode_uses_wall_clock() {
        let clock = Arc::new(ManualClock::new(1_000));
        let source = ScriptedSource::new(vec![Ok(50_000)]);
        let mut authority = authority(clock, source.clone());
        authority.set_testing_active(true);

        assert_eq!(authority.now().await, 1_000);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_drift_invalidates_cache() {
        let clock = Arc::new(ManualClock::new(1_000));
        let source = ScriptedSource::new(vec![Ok(50_000), Ok(90_000)]);
        let mut authority = authority(clock.clone(), source.clone());

        authority.now().await;
        clock.advance(2_000);
        clock.jump_wall(10_000);

        assert_eq!(authority.now().await, 90_000);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_drift_with_closed_limiter_falls_back_to_wall() {
        let clock = Arc::new(ManualClock::new(1_000));
        let source = ScriptedSource::new(vec![Ok(50_000)]);
        let mut authority = authority(clock.clone(), source.clone());

        authority.now().await;
        clock.advance(100);
        clock.jump_wall(-20_000);

        // cache dropped, limiter still closed: wall time
        assert_eq!(authority.now().await, clock.wall_ms());
        assert_eq!(source.calls(), 1);
        assert!(authority.cached_sample().is_none());
    }

    #[tokio::test]
    async fn test_failure_falls_back_and_rate_limits() {
        let clock = Arc::new(ManualClock::new(7_000));
        let source = ScriptedSource::new(vec![Err(TimeError::ServerError(503))]);
        let mut authority = authority(clock.clone(), source.clone());

        assert_eq!(authority.now().await, 7_000);
        assert_eq!(authority.consecutive_failures(), 1);

        clock.advance(500);
        assert_eq!(authority.now().await, 7_500);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_backoff_spacing_grows() {
        let clock = Arc::new(ManualClock::new(0));
        let source = ScriptedSource::new(vec![
            Err(TimeError::malformed("x")),
            Err(TimeError::malformed("x")),
        ]);
        let mut authority = authority(clock.clone(), source.clone());

        authority.now().await;
        // one failure: spacing is 2000 plus up to 30% jitter
        clock.advance(1_999);
        authority.now().await;
        assert_eq!(source.calls(), 1);

        clock.advance(601);
        authority.now().await;
        assert_eq!(source.calls(), 2);
        assert_eq!(authority.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_rate_limited() {
        let clock = Arc::new(ManualClock::new(0));
        let source = ScriptedSource::new(vec![Ok(100_000), Err(TimeError::ServerError(500))]);
        let mut authority = authority(clock.clone(), source.clone());

        authority.now().await;
        clock.advance(61_000);
        // expired cache, fetch fails, stale sample extrapolated
        assert_eq!(authority.now().await, 161_000);
        clock.advance(100);
        assert_eq!(authority.now().await, 161_100);
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_accept_broadcast_reanchors() {
        let clock = Arc::new(ManualClock::new(10_000));
        let source = ScriptedSource::new(vec![]);
        let mut authority = authority(clock.clone(), source);

        let payload = json!({
            "type": "time-update",
            "data": {"time": 500_000, "localCaptureInstant": 9_000, "monotonicCaptureInstant": 42}
        });
        assert!(authority.accept_broadcast(&payload));

        let sample = authority.cached_sample().unwrap();
        assert_eq!(sample.time, 501_000);
        assert_eq!(sample.local_capture_instant, 10_000);
        assert_eq!(sample.monotonic_capture_instant, clock.monotonic_ms());

        clock.advance(250);
        assert_eq!(authority.fast_now(), 501_250);
    }

    #[test]
    fn test_reject_future_and_expired_broadcasts() {
        let clock = Arc::new(ManualClock::new(100_000));
        let source = ScriptedSource::new(vec![]);
        let mut authority = authority(clock, source);

        let future = json!({
            "type": "time-update",
            "data": {"time": 1, "localCaptureInstant": 100_001, "monotonicCaptureInstant": 0}
        });
        assert!(!authority.accept_broadcast(&future));

        let expired = json!({
            "type": "time-update",
            "data": {"time": 1, "localCaptureInstant": 40_000, "monotonicCaptureInstant": 0}
        });
        assert!(!authority.accept_broadcast(&expired));
        assert!(authority.cached_sample().is_none());
    }

    #[test]
    fn test_reject_broadcast_with_extreme_instants() {
        let clock = Arc::new(ManualClock::new(100_000));
        let source = ScriptedSource::new(vec![]);
        let mut authority = authority(clock, source);

        let ancient = json!({
            "type": "time-update",
            "data": {"time": 1, "localCaptureInstant": i64::MIN, "monotonicCaptureInstant": 0}
        });
        assert!(!authority.accept_broadcast(&ancient));

        let overflowing = json!({
            "type": "time-update",
            "data": {"time": i64::MAX, "localCaptureInstant": 99_000, "monotonicCaptureInstant": 0}
        });
        assert!(!authority.accept_broadcast(&overflowing));
        assert!(authority.cached_sample().is_none());
    }

    #[tokio::test]
    async fn test_fast_now_ignores_drifted_cache() {
        let clock = Arc::new(ManualClock::new(1_000));
        let source = ScriptedSource::new(vec![Ok(50_000)]);
        let mut authority = authority(clock.clone(), source.clone());

        authority.now().await;
        clock.advance(1_000);
        assert_eq!(authority.fast_now(), 51_000);

        clock.jump_wall(30_000);
        assert_eq!(authority.fast_now(), clock.wall_ms());
        // only now() drops the sample
        assert!(authority.cached_sample().is_some());
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_malformed_broadcast_is_cache_miss() {
        let clock = Arc::new(ManualClock::new(100_000));
        let source = ScriptedSource::new(vec![]);
        let mut authority = authority(clock, source);

        assert!(!authority.accept_broadcast(&json!({"type": "time-update", "data": "soon"})));
        assert!(!authority.accept_broadcast(&json!({"type": "other", "data": {
            "time": 1, "localCaptureInstant": 100_000, "monotonicCaptureInstant": 0
        }})));
        assert!(authority.cached_sample().is_none());
    }

    #[tokio::test]
    async fn test_success_broadcasts_to_siblings() {
        use crate::bus::InProcessBus;

        let bus = InProcessBus::new(8);
        let publisher: Arc<dyn NotificationBus> = Arc::new(bus.attach());
        let sibling = bus.attach();
        let mut sub = sibling.subscribe(&[TIME_TOPIC.to_string()]);

        let clock = Arc::new(ManualClock::new(1_000));
        let source = ScriptedSource::new(vec![Ok(77_000)]);
        let mut authority =
            TimeAuthority::new(clock, source, Some(publisher), config(), Some(3));

        authority.now().await;

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload["type"], "time-update");
        assert_eq!(msg.payload["data"]["time"], 77_000);
    }
}
