//! Host-side orchestration
//!
//! The [`Orchestrator`] starts an engine in an isolated context, hands it
//! its init message and forwards announced segments to a [`SegmentSink`].
//! It never blocks initial rendering on the engine: if no segment arrives
//! within the first-message timeout the host proceeds without one, and if no
//! context can be acquired it shows a notice and carries on unscheduled.
//!
//! Failures leave this module as [`crate::error::Error`].

pub mod error;
pub mod launcher;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{InProcessBus, NotificationBus};
use crate::config::Config;
use crate::error::{Error, LivecueErrorTrait};
use crate::models::{EngineEvent, Segment};
use crate::plugins::live::LiveStatusPoller;
use crate::plugins::LIVE_SESSIONS_STORE;
use crate::scheduler::{InitMessage, SchedulerError};
use crate::time::{Clock, HttpTimeSource, OfflineTimeSource, TimeSource};

pub use error::HostError;
pub use launcher::{
    acquire_context, default_strategies, ContextJoin, ContextStrategy, DedicatedThread,
    EngineFactory, EngineHandle, RuntimeTask,
};

/// Where announced segments end up
pub trait SegmentSink: Send {
    /// Render the segment the engine says is current
    fn show_segment(&mut self, segment: &Segment);

    /// Show a notice to the viewer
    fn show_notice(&mut self, message: &str);
}

/// Result of starting an engine
#[derive(Debug)]
pub enum StartOutcome {
    /// The engine runs and its first message (if any) was handled
    Scheduled(EngineHandle),

    /// The page continues without scheduled content
    Unscheduled(Error),
}

/// Owner of the engine lifecycle for one page
pub struct Orchestrator {
    config: Config,
    factory: EngineFactory,
    strategies: Vec<Box<dyn ContextStrategy>>,
}

impl Orchestrator {
    /// Create an orchestrator with the default context strategies
    pub fn new(config: Config, clock: Arc<dyn Clock>, source: Arc<dyn TimeSource>) -> Self {
        let bus = InProcessBus::new(config.engine.bus_capacity);
        let factory = EngineFactory::new(
            clock,
            source,
            Some(bus),
            config.time.clone(),
            config.engine.clone(),
        );

        Self {
            config,
            factory,
            strategies: default_strategies(),
        }
    }

    /// Validate `config` and build the time source it names
    ///
    /// An empty source URL selects the local clock.
    pub fn from_config(config: Config, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|e| Error::config(format!("{e:#}")))?;

        let source: Arc<dyn TimeSource> = if config.time.source_url.is_empty() {
            info!("No time source configured, using local clock");
            Arc::new(OfflineTimeSource)
        } else {
            Arc::new(HttpTimeSource::from_config(&config.time)?)
        };
        Ok(Self::new(config, clock, source))
    }

    /// Replace the context strategies, tried in order
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ContextStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Shared bus of this page's engine contexts
    pub fn bus(&self) -> Option<&InProcessBus> {
        self.factory.bus()
    }

    fn first_message_timeout(&self) -> Duration {
        self.config.first_message_timeout()
    }

    /// Start an engine and wait for its first message
    ///
    /// When a live status feed is configured the init snapshot always
    /// declares the live-sessions store, so the engine follows the poller's
    /// updates even if the page supplied no live data.
    pub async fn start(&self, init: InitMessage, sink: &mut dyn SegmentSink) -> StartOutcome {
        let init = self.declare_feeds(init);
        let mut handle = match acquire_context(&self.strategies, &self.factory) {
            Ok(handle) => handle,
            Err(e) => {
                let err = Error::Host(e);
                warn!(
                    error = %err,
                    category = err.category().description(),
                    "Continuing without scheduled content"
                );
                sink.show_notice(&err.user_message());
                return StartOutcome::Unscheduled(err);
            }
        };

        if let Err(e) = handle.send(init.into_command()).await {
            warn!(error = %e, "Engine stopped before init");
            return StartOutcome::Unscheduled(e.into());
        }

        let timeout = self.first_message_timeout();
        match tokio::time::timeout(timeout, handle.next_event()).await {
            Ok(Some(EngineEvent::Segment(segment))) => {
                debug!(content = %segment.content_ref, "First segment received");
                sink.show_segment(&segment);
            }
            Ok(Some(EngineEvent::Fault { kind, message })) => {
                let err = Error::from_fault(kind, message);
                warn!(
                    error = %err,
                    category = err.category().description(),
                    "Engine refused to start"
                );
                sink.show_notice(&err.user_message());
                handle.shutdown().await;
                return StartOutcome::Unscheduled(err);
            }
            Ok(None) => {
                handle.shutdown().await;
                return StartOutcome::Unscheduled(HostError::EngineStopped.into());
            }
            Err(_) => {
                let err = HostError::FirstMessageTimeout(timeout.as_millis() as u64);
                warn!(error = %err, "Rendering without engine guidance");
            }
        }

        StartOutcome::Scheduled(handle)
    }

    /// Forward events until the engine stops or `shutdown` flips
    pub async fn follow(
        handle: &mut EngineHandle,
        sink: &mut dyn SegmentSink,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = handle.next_event() => match event {
                    Some(EngineEvent::Segment(segment)) => sink.show_segment(&segment),
                    Some(EngineEvent::Fault { kind, message }) => {
                        let err = Error::from_fault(kind, message);
                        warn!(error = %err, "Engine fault after start");
                        sink.show_notice(&err.user_message());
                    }
                    None => {
                        info!("Engine event stream ended");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Stopped following engine events");
                        break;
                    }
                }
            }
        }
    }

    /// Start polling the live status feed, if one is configured
    ///
    /// The poller starts from the live session flags in `init`, so only
    /// real changes are published to the engine.
    pub fn spawn_live_poller(
        &self,
        init: &InitMessage,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Option<tokio::task::JoinHandle<()>>, Error> {
        let tab_id = init.tab_id.as_deref().ok_or(SchedulerError::MissingTabId)?;
        let bus = self
            .bus()
            .map(|b| Arc::new(b.attach()) as Arc<dyn NotificationBus>);

        let Some(poller) = LiveStatusPoller::from_config(&self.config.live, tab_id, bus)? else {
            return Ok(None);
        };
        debug!(tab_id = tab_id, "Live status polling started");
        Ok(Some(poller.with_store(init.live_sessions()).spawn(shutdown)))
    }

    fn declare_feeds(&self, init: InitMessage) -> InitMessage {
        if self.config.live.status_url.is_some() {
            init.declare_store(LIVE_SESSIONS_STORE)
        } else {
            init
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{EngineCommand, SchedulerEngine};
    use crate::time::{ManualClock, OfflineTimeSource};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recording {
        segments: Vec<String>,
        notices: Vec<String>,
    }

    impl SegmentSink for Recording {
        fn show_segment(&mut self, segment: &Segment) {
            self.segments.push(segment.content_ref.clone());
        }

        fn show_notice(&mut self, message: &str) {
            self.notices.push(message.to_string());
        }
    }

    struct Refusing;

    impl ContextStrategy for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn launch(
            &self,
            _engine: SchedulerEngine,
            _commands: mpsc::Receiver<EngineCommand>,
        ) -> Result<ContextJoin, HostError> {
            Err(HostError::launch_failed(self.name(), "disabled"))
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Config::default(),
            Arc::new(ManualClock::new(10_000)),
            Arc::new(OfflineTimeSource),
        )
        .with_strategies(vec![Box::new(RuntimeTask)])
    }

    #[tokio::test]
    async fn test_start_shows_first_segment() {
        let mut sink = Recording::default();
        let init = InitMessage::new(vec![Segment::new("/intro", None)], "tab-1");

        let outcome = orchestrator().start(init, &mut sink).await;
        assert!(matches!(outcome, StartOutcome::Scheduled(_)));
        assert_eq!(sink.segments, vec!["/intro".to_string()]);
    }

    #[tokio::test]
    async fn test_no_context_shows_notice() {
        let mut sink = Recording::default();
        let init = InitMessage::new(vec![Segment::new("/intro", None)], "tab-1");

        let outcome = orchestrator()
            .with_strategies(vec![Box::new(Refusing)])
            .start(init, &mut sink)
            .await;

        assert!(matches!(
            outcome,
            StartOutcome::Unscheduled(Error::Host(HostError::ContextUnavailable { .. }))
        ));
        assert_eq!(sink.notices.len(), 1);
        assert!(sink.segments.is_empty());
    }

    #[tokio::test]
    async fn test_fault_is_unscheduled() {
        let mut sink = Recording::default();
        let mut init = InitMessage::new(vec![Segment::new("/intro", None)], "tab-1");
        init.tab_id = None;

        let outcome = orchestrator().start(init, &mut sink).await;
        match outcome {
            StartOutcome::Unscheduled(err) => {
                assert!(matches!(err, Error::Scheduler(SchedulerError::MissingTabId)));
                assert_eq!(sink.notices, vec![err.user_message()]);
            }
            StartOutcome::Scheduled(_) => panic!("engine should have refused"),
        }
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let mut config = Config::default();
        config.live.poll_interval_ms = 0;

        let result = Orchestrator::from_config(config, Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_live_poller_needs_status_url() {
        let (_tx, rx) = watch::channel(false);
        let init = InitMessage::new(vec![Segment::new("/intro", None)], "tab-1");

        let poller = orchestrator().spawn_live_poller(&init, rx.clone()).unwrap();
        assert!(poller.is_none());

        let mut anonymous = init;
        anonymous.tab_id = None;
        assert!(matches!(
            orchestrator().spawn_live_poller(&anonymous, rx),
            Err(Error::Scheduler(SchedulerError::MissingTabId))
        ));
    }

    #[test]
    fn test_status_url_declares_live_store() {
        let init = InitMessage::new(vec![Segment::new("/intro", None)], "tab-1");
        assert!(orchestrator().declare_feeds(init.clone()).plugins.is_null());

        let mut config = Config::default();
        config.live.status_url = Some("http://127.0.0.1:9/live".to_string());
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(ManualClock::new(10_000)),
            Arc::new(OfflineTimeSource),
        );
        let declared = orchestrator.declare_feeds(init);
        assert_eq!(declared.plugins["live-sessions"]["data"], serde_json::json!({}));
    }
}
