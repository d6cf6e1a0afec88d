//! Prometheus metrics for the scheduling engine
//!
//! This module provides metrics tracking for:
//! - Time authority: external fetches by outcome, cache hits and misses
//! - Scheduler loop: ticks by decision, emissions, tick errors
//! - Notification bus: published and received messages by topic
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails or never happens, recording functions are no-ops.

use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all engine metrics
struct EngineMetrics {
    time_fetches: CounterVec,
    time_cache: CounterVec,
    drift_invalidations: Counter,
    ticks: CounterVec,
    tick_errors: Counter,
    emissions: Counter,
    bus_published: CounterVec,
    bus_received: CounterVec,
}

static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = livecue::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = EngineMetrics {
        time_fetches: register_counter_vec!(
            "livecue_time_fetches_total",
            "External time fetches by outcome",
            &["outcome"]
        )?,
        time_cache: register_counter_vec!(
            "livecue_time_cache_total",
            "Time authority cache lookups by result",
            &["result"]
        )?,
        drift_invalidations: register_counter!(
            "livecue_time_drift_invalidations_total",
            "Cached samples dropped because wall and monotonic clocks diverged"
        )?,
        ticks: register_counter_vec!(
            "livecue_engine_ticks_total",
            "Scheduler ticks by decision",
            &["decision"]
        )?,
        tick_errors: register_counter!(
            "livecue_engine_tick_errors_total",
            "Scheduler ticks whose evaluation failed"
        )?,
        emissions: register_counter!(
            "livecue_engine_emissions_total",
            "Segments announced to the host"
        )?,
        bus_published: register_counter_vec!(
            "livecue_bus_published_total",
            "Bus messages published by topic",
            &["topic"]
        )?,
        bus_received: register_counter_vec!(
            "livecue_bus_received_total",
            "Bus messages received by topic and whether they were applied",
            &["topic", "accepted"]
        )?,
    };

    ENGINE_METRICS.set(metrics).ok();
    tracing::info!("Engine metrics registered");
    Ok(())
}

// ============================================================================
// Recording
// ============================================================================

/// Record an external time fetch (`success`, `failure`, `rate_limited`)
pub fn record_time_fetch(outcome: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.time_fetches.with_label_values(&[outcome]).inc();
    }
}

/// Record a cache lookup (`hit`, `miss`)
pub fn record_time_cache(result: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.time_cache.with_label_values(&[result]).inc();
    }
}

/// Record a drift invalidation
pub fn record_drift_invalidation() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.drift_invalidations.inc();
    }
}

/// Record a scheduler tick (`advance`, `hold`)
pub fn record_tick(decision: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.ticks.with_label_values(&[decision]).inc();
    }
}

/// Record a failed tick evaluation
pub fn record_tick_error() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.tick_errors.inc();
    }
}

/// Record a segment announcement
pub fn record_emission() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.emissions.inc();
    }
}

/// Record a published bus message
pub fn record_bus_published(topic: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.bus_published.with_label_values(&[topic]).inc();
    }
}

/// Record a received bus message
pub fn record_bus_received(topic: &str, accepted: bool) {
    if let Some(m) = ENGINE_METRICS.get() {
        let accepted = if accepted { "true" } else { "false" };
        m.bus_received.with_label_values(&[topic, accepted]).inc();
    }
}

// ============================================================================
// Export
// ============================================================================

/// Render all registered metrics in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
