//! The scheduler loop
//!
//! One [`SchedulerEngine`] drives one timeline for one host context. It is
//! configured by init commands, announces segments on an event channel and
//! keeps polling on a randomized interval until the timeline is exhausted or
//! the clock is frozen.
//!
//! ```text
//!  Initializing ──init ok──▶ Running ──frozen──▶ FrozenIdle
//!       │                      │
//!       │                      └──no next──▶ Exhausted
//!       └──refused / degraded──▶ Disposed ◀── command channel closed
//! ```
//!
//! Any later init starts over from `Initializing` and replaces the pending
//! timer, so a superseded tick can never fire.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::conditions::{evaluate, Decision};
use super::error::{SchedulerError, SchedulerResult};
use super::schedule::{Schedule, SegmentId};
use super::testing::{TestingConfig, TestingOverride};
use crate::bus::{plugin_topic, BusMessage, NotificationBus, Subscription, TIME_TOPIC};
use crate::config::{EngineConfig, TimeConfig};
use crate::metrics;
use crate::models::{EngineEvent, FaultKind, Segment};
use crate::plugins::{sync, LiveSessionStore, PluginSet, LIVE_SESSIONS_STORE};
use crate::time::{Clock, TimeAuthority, TimeSource};

// ============================================================================
// Commands and Phases
// ============================================================================

/// Messages from the host to the engine
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// (Re)configure the engine; the payload is decoded field by field
    Init(Value),
}

/// Typed builder for an init payload
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub schedule: Vec<Segment>,
    pub plugins: Value,
    pub testing: Option<Value>,
    pub tab_id: Option<String>,
}

impl InitMessage {
    pub fn new(schedule: Vec<Segment>, tab_id: impl Into<String>) -> Self {
        Self {
            schedule,
            plugins: Value::Null,
            testing: None,
            tab_id: Some(tab_id.into()),
        }
    }

    /// Attach a plugin snapshot, `{name: {data: {...}}}`
    pub fn with_plugins(mut self, plugins: Value) -> Self {
        self.plugins = plugins;
        self
    }

    /// Attach simulation settings
    pub fn with_testing(mut self, testing: &TestingConfig) -> Self {
        self.testing = Some(testing.to_value());
        self
    }

    /// Declare `store` in the plugin snapshot, empty unless already present
    ///
    /// The engine only follows updates for stores its snapshot names.
    pub fn declare_store(mut self, store: &str) -> Self {
        if !self.plugins.is_object() {
            if !self.plugins.is_null() {
                warn!(plugins = %self.plugins, "Replacing unreadable plugin snapshot");
            }
            self.plugins = Value::Object(Map::new());
        }
        if let Value::Object(stores) = &mut self.plugins {
            stores
                .entry(store.to_string())
                .or_insert_with(|| json!({"data": {}}));
        }
        self
    }

    /// Live session flags carried by the snapshot
    pub fn live_sessions(&self) -> LiveSessionStore {
        self.plugins
            .get(LIVE_SESSIONS_STORE)
            .map(LiveSessionStore::from_snapshot)
            .unwrap_or_default()
    }

    /// Encode into the command the engine consumes
    pub fn into_command(self) -> EngineCommand {
        match serde_json::to_value(&self) {
            Ok(payload) => EngineCommand::Init(payload),
            Err(e) => {
                warn!(error = %e, "Failed to encode init message");
                EngineCommand::Init(Value::Null)
            }
        }
    }
}

/// Lifecycle phase of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Waiting for a usable init
    Initializing,
    /// Timer armed, polling
    Running,
    /// Clock frozen; the single evaluation has run
    FrozenIdle,
    /// No segment left to advance to
    Exhausted,
    /// Refused to start or lost its host
    Disposed,
}

/// Collaborators shared by every engine instance of a host
#[derive(Clone)]
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub source: Arc<dyn TimeSource>,
    pub bus: Option<Arc<dyn NotificationBus>>,
}

// ============================================================================
// Session State
// ============================================================================

/// Everything derived from one init message
struct Session {
    tab_id: String,
    schedule: Schedule,
    stores: PluginSet,
    testing: TestingOverride,
    current: Option<SegmentId>,
    next: Option<SegmentId>,
    last_emitted: Option<String>,
    /// Starting segment was picked from a local guess and awaits authoritative time
    unconfirmed: bool,
}

impl Session {
    /// Announce `id` unless it repeats the last announced content
    fn deliver(
        &mut self,
        id: SegmentId,
        events: &mpsc::UnboundedSender<EngineEvent>,
    ) -> SchedulerResult<bool> {
        let segment = self.schedule.get(id)?;
        if self.last_emitted.as_deref() == Some(segment.content_ref.as_str()) {
            debug!(content = %segment.content_ref, "Segment unchanged, not re-announced");
            return Ok(false);
        }

        self.last_emitted = Some(segment.content_ref.clone());
        if events.send(EngineEvent::Segment(segment.clone())).is_err() {
            debug!("Host stopped listening for segments");
        }
        metrics::record_emission();
        info!(content = %segment.content_ref, "Announced segment");
        Ok(true)
    }
}

enum Wake {
    Command(Option<EngineCommand>),
    Bus(Option<BusMessage>),
    Timer,
}

// ============================================================================
// Scheduler Engine
// ============================================================================

/// Timeline driver for one host context
pub struct SchedulerEngine {
    clock: Arc<dyn Clock>,
    bus: Option<Arc<dyn NotificationBus>>,
    config: EngineConfig,
    authority: TimeAuthority,
    events: mpsc::UnboundedSender<EngineEvent>,
    rng: ChaCha8Rng,
    phase: LoopPhase,
    session: Option<Session>,
    subscription: Option<Subscription>,
    deadline: Option<Instant>,
}

impl SchedulerEngine {
    /// Create an engine that announces segments on `events`
    pub fn new(
        deps: EngineDeps,
        time_config: TimeConfig,
        config: EngineConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let authority = TimeAuthority::new(
            deps.clock.clone(),
            deps.source,
            deps.bus.clone(),
            time_config,
            config.rng_seed,
        );
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            clock: deps.clock,
            bus: deps.bus,
            config,
            authority,
            events,
            rng,
            phase: LoopPhase::Initializing,
            session: None,
            subscription: None,
            deadline: None,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// When the next tick is due, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The segment most recently made current
    pub fn current_segment(&self) -> Option<&Segment> {
        let session = self.session.as_ref()?;
        session.current.and_then(|id| session.schedule.get(id).ok())
    }

    /// The segment the next tick will evaluate
    pub fn next_segment(&self) -> Option<&Segment> {
        let session = self.session.as_ref()?;
        session.next.and_then(|id| session.schedule.get(id).ok())
    }

    pub fn tab_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.tab_id.as_str())
    }

    pub fn authority(&self) -> &TimeAuthority {
        &self.authority
    }

    /// Run until the command channel closes
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        info!("Scheduler engine started");

        loop {
            let wake = {
                let deadline = self.deadline;
                let subscription = self.subscription.as_mut();
                tokio::select! {
                    command = commands.recv() => Wake::Command(command),
                    message = next_message(subscription) => Wake::Bus(message),
                    _ = sleep_until_armed(deadline) => Wake::Timer,
                }
            };

            match wake {
                Wake::Command(Some(EngineCommand::Init(payload))) => self.handle_init(payload),
                Wake::Command(None) => {
                    self.deadline = None;
                    self.set_phase(LoopPhase::Disposed);
                    break;
                }
                Wake::Bus(Some(message)) => {
                    self.handle_bus_message(&message);
                }
                Wake::Bus(None) => {
                    debug!("Notification bus closed, continuing without it");
                    self.subscription = None;
                }
                Wake::Timer => self.tick().await,
            }
        }

        info!("Scheduler engine stopped");
    }

    /// Apply an init message
    ///
    /// A missing tab id is reported to the host as a fault. Malformed input
    /// otherwise degrades: a bad schedule leaves the engine idle, bad plugin
    /// or testing members are treated as absent.
    ///
    /// The starting segment is guessed without touching the network. Unless
    /// the clock is simulated, the first tick is armed immediately and checks
    /// the guess against authoritative time.
    pub fn handle_init(&mut self, payload: Value) {
        if self.session.is_some() {
            info!("Re-initializing scheduler engine");
        }
        self.deadline = None;
        self.session = None;
        self.subscription = None;
        self.set_phase(LoopPhase::Initializing);

        let tab_id = match payload.get("tabId") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                self.refuse(FaultKind::MissingTabId, SchedulerError::MissingTabId);
                return;
            }
        };

        let entries = match decode_schedule(payload.get("schedule")) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Ignoring init with malformed schedule");
                self.set_phase(LoopPhase::Disposed);
                return;
            }
        };

        let schedule = match Schedule::build(entries) {
            Ok(schedule) => schedule,
            Err(e) => {
                self.refuse(FaultKind::InvalidSchedule, e);
                return;
            }
        };

        let stores = PluginSet::from_snapshot(payload.get("plugins").unwrap_or(&Value::Null));
        let testing_config = payload.get("testing").and_then(TestingConfig::from_value);
        let testing = TestingOverride::from_config(testing_config.as_ref(), self.clock.wall_ms());
        self.authority.set_testing_active(testing.is_active());

        if let Some(bus) = &self.bus {
            let mut topics = vec![TIME_TOPIC.to_string()];
            topics.extend(stores.synchronized_names().iter().map(|n| plugin_topic(n)));
            self.subscription = Some(bus.subscribe(&topics));
        }

        let fast_now = testing.adjust_time(self.authority.fast_now());
        let start = schedule.find_starting_segment(schedule.head(), fast_now);

        let unconfirmed = !testing.is_active() && schedule.len() > 1;
        let mut session = Session {
            tab_id,
            next: schedule.next(start),
            current: Some(start),
            schedule,
            stores,
            testing,
            last_emitted: None,
            unconfirmed,
        };

        info!(
            tab_id = %session.tab_id,
            segments = session.schedule.len(),
            testing = testing.is_active(),
            frozen = testing.is_frozen(),
            "Scheduler engine initialized"
        );

        if let Err(e) = session.deliver(start, &self.events) {
            warn!(error = %e, "Failed to announce starting segment");
        }

        let has_next = session.next.is_some();
        self.session = Some(session);

        if unconfirmed {
            self.set_phase(LoopPhase::Running);
            self.deadline = Some(Instant::now());
        } else if has_next {
            self.set_phase(LoopPhase::Running);
            self.arm();
        } else {
            self.set_phase(LoopPhase::Exhausted);
        }
    }

    /// Evaluate the pending segment once and decide whether to poll again
    ///
    /// The first tick after an unconfirmed init only re-validates the
    /// starting segment. An evaluation error is logged and counted; the
    /// re-arm decision is made either way.
    pub async fn tick(&mut self) {
        self.deadline = None;
        let Some(unconfirmed) = self.session.as_ref().map(|s| s.unconfirmed) else {
            return;
        };

        let raw_now = self.authority.now().await;
        if unconfirmed {
            self.confirm_start(raw_now);
        } else if let Err(e) = self.evaluate_pending(raw_now) {
            metrics::record_tick_error();
            warn!(error = %e, "Scheduler tick failed");
        }

        let Some((frozen, has_next)) = self
            .session
            .as_ref()
            .map(|s| (s.testing.is_frozen(), s.next.is_some()))
        else {
            return;
        };
        if frozen {
            self.set_phase(LoopPhase::FrozenIdle);
        } else if !has_next {
            self.set_phase(LoopPhase::Exhausted);
        } else {
            self.set_phase(LoopPhase::Running);
            self.arm();
        }
    }

    /// Apply a bus message, returning whether it changed local state
    pub fn handle_bus_message(&mut self, message: &BusMessage) -> bool {
        let accepted = if message.topic == TIME_TOPIC {
            self.authority.accept_broadcast(&message.payload)
        } else if let Some(session) = self.session.as_mut() {
            sync::apply_update(
                &mut session.stores,
                &message.topic,
                &message.payload,
                &session.tab_id,
            )
        } else {
            false
        };

        metrics::record_bus_received(&message.topic, accepted);
        accepted
    }

    /// Queue the authoritative starting segment if the local guess was wrong
    fn confirm_start(&mut self, raw_now: i64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.unconfirmed = false;

        let now = session.testing.adjust_time(raw_now);
        let confirmed = session
            .schedule
            .find_starting_segment(session.schedule.head(), now);
        if session.current != Some(confirmed) {
            debug!(
                guessed = ?session.current.map(SegmentId::index),
                confirmed = confirmed.index(),
                "Correcting starting segment on next tick"
            );
            session.next = Some(confirmed);
        }
    }

    fn evaluate_pending(&mut self, raw_now: i64) -> SchedulerResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(next_id) = session.next else {
            return Ok(());
        };

        let now = session.testing.adjust_time(raw_now);
        let candidate = session.schedule.get(next_id)?;
        let current = session
            .current
            .map(|id| session.schedule.get(id))
            .transpose()?;

        let decision = evaluate(current, candidate, &session.stores, now, &session.testing);
        metrics::record_tick(decision.label());

        match decision {
            Decision::Advance => {
                debug!(content = %candidate.content_ref, now = now, "Advancing");
                session.current = Some(next_id);
                session.next = session.schedule.next(next_id);
                session.deliver(next_id, &self.events)?;
            }
            Decision::Hold(reason) => {
                debug!(candidate = %candidate.content_ref, reason = ?reason, now = now, "Holding");
                let shown = session
                    .current
                    .unwrap_or_else(|| session.schedule.head_from(next_id));
                session.deliver(shown, &self.events)?;
            }
        }
        Ok(())
    }

    fn refuse(&mut self, kind: FaultKind, error: SchedulerError) {
        warn!(error = %error, "Scheduler engine refused to start");
        let fault = EngineEvent::Fault {
            kind,
            message: error.to_string(),
        };
        if self.events.send(fault).is_err() {
            debug!("Host stopped listening for faults");
        }
        self.set_phase(LoopPhase::Disposed);
    }

    fn arm(&mut self) {
        let lo = self.config.poll_min_ms.min(self.config.poll_max_ms);
        let hi = self.config.poll_min_ms.max(self.config.poll_max_ms);
        let delay = self.rng.gen_range(lo..=hi);
        self.deadline = Some(Instant::now() + Duration::from_millis(delay));
    }

    fn set_phase(&mut self, phase: LoopPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Engine phase changed");
            self.phase = phase;
        }
    }
}

fn decode_schedule(value: Option<&Value>) -> SchedulerResult<Vec<Segment>> {
    match value {
        Some(entries @ Value::Array(_)) => serde_json::from_value(entries.clone())
            .map_err(|e| SchedulerError::malformed("schedule", e.to_string())),
        Some(other) => Err(SchedulerError::malformed(
            "schedule",
            format!("expected an array, got {other}"),
        )),
        None => Err(SchedulerError::malformed("schedule", "missing")),
    }
}

async fn next_message(subscription: Option<&mut Subscription>) -> Option<BusMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_armed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
