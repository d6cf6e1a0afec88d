//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use livecue::bus::{InProcessBus, NotificationBus};
use livecue::config::{EngineConfig, TimeConfig};
use livecue::models::{EngineEvent, Segment};
use livecue::scheduler::{EngineDeps, SchedulerEngine};
use livecue::time::{Clock, ManualClock, OfflineTimeSource, TimeSource};
use livecue::utils::error::TimeError;

/// Wall clock reading used as "now" in tests
pub const NOW: i64 = 1_714_582_800_000;

/// Time source that replays scripted answers and counts calls
#[derive(Default)]
pub struct ScriptedSource {
    answers: Mutex<VecDeque<Result<i64, String>>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(answers: Vec<Result<i64, &str>>) -> Self {
        Self {
            answers: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map_err(str::to_string))
                    .collect(),
            ),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSource for ScriptedSource {
    async fn fetch(&self) -> Result<i64, TimeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop_front();
        match next {
            Some(Ok(time)) => Ok(time),
            Some(Err(reason)) => Err(TimeError::Unavailable(reason)),
            None => Err(TimeError::Unavailable("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Seeded engine configuration
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        rng_seed: Some(42),
        ..EngineConfig::default()
    }
}

/// Engine wired to a manual clock and an offline time source
pub fn offline_engine(
    clock: Arc<ManualClock>,
) -> (SchedulerEngine, mpsc::UnboundedReceiver<EngineEvent>) {
    build_engine(clock, Arc::new(OfflineTimeSource), None)
}

/// Engine with explicit collaborators
pub fn build_engine(
    clock: Arc<dyn Clock>,
    source: Arc<dyn TimeSource>,
    bus: Option<&InProcessBus>,
) -> (SchedulerEngine, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let deps = EngineDeps {
        clock,
        source,
        bus: bus.map(|b| Arc::new(b.attach()) as Arc<dyn NotificationBus>),
    };
    (
        SchedulerEngine::new(deps, TimeConfig::default(), engine_config(), tx),
        rx,
    )
}

/// Three segments around `NOW`: past, current, and one minute ahead
pub fn timeline() -> Vec<Segment> {
    vec![
        Segment::new("/pre-show", Some(NOW - 60_000)),
        Segment::new("/keynote", Some(NOW - 1_000)),
        Segment::new("/replay", Some(NOW + 60_000)),
    ]
}

/// Drain every event currently queued and return the announced content refs
pub fn drain_contents(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<String> {
    let mut contents = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Some(segment) = event.segment() {
            contents.push(segment.content_ref.clone());
        }
    }
    contents
}
