//! Execution contexts for engine instances
//!
//! An engine runs isolated from the host and talks to it only through
//! channels. Contexts are acquired by trying strategies in order:
//!
//! 1. [`DedicatedThread`]: a named OS thread with its own current-thread
//!    runtime
//! 2. [`RuntimeTask`]: a task on the host's runtime
//!
//! If every strategy fails the host gets [`HostError::ContextUnavailable`].

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::HostError;
use crate::bus::{InProcessBus, NotificationBus};
use crate::config::{EngineConfig, TimeConfig};
use crate::models::EngineEvent;
use crate::scheduler::{EngineCommand, EngineDeps, SchedulerEngine};
use crate::time::{Clock, TimeSource};

const COMMAND_CAPACITY: usize = 16;

// ============================================================================
// Engine Factory
// ============================================================================

/// Builds a fresh engine for each launch attempt
#[derive(Clone)]
pub struct EngineFactory {
    clock: Arc<dyn Clock>,
    source: Arc<dyn TimeSource>,
    bus: Option<InProcessBus>,
    time: TimeConfig,
    engine: EngineConfig,
}

impl EngineFactory {
    pub fn new(
        clock: Arc<dyn Clock>,
        source: Arc<dyn TimeSource>,
        bus: Option<InProcessBus>,
        time: TimeConfig,
        engine: EngineConfig,
    ) -> Self {
        Self {
            clock,
            source,
            bus,
            time,
            engine,
        }
    }

    /// Build an engine attached to the bus under its own origin
    pub fn build(&self, events: mpsc::UnboundedSender<EngineEvent>) -> SchedulerEngine {
        let bus = self
            .bus
            .as_ref()
            .map(|b| Arc::new(b.attach()) as Arc<dyn NotificationBus>);
        let deps = EngineDeps {
            clock: self.clock.clone(),
            source: self.source.clone(),
            bus,
        };
        SchedulerEngine::new(deps, self.time.clone(), self.engine.clone(), events)
    }

    pub fn bus(&self) -> Option<&InProcessBus> {
        self.bus.as_ref()
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Join handle of a running engine context
#[derive(Debug)]
pub enum ContextJoin {
    Thread(std::thread::JoinHandle<()>),
    Task(tokio::task::JoinHandle<()>),
}

/// A way of giving an engine its own execution context
pub trait ContextStrategy: Send + Sync {
    /// Short name for logs and error reports
    fn name(&self) -> &str;

    /// Start `engine` consuming `commands`
    fn launch(
        &self,
        engine: SchedulerEngine,
        commands: mpsc::Receiver<EngineCommand>,
    ) -> Result<ContextJoin, HostError>;
}

/// Named OS thread running a current-thread runtime
#[derive(Debug, Clone)]
pub struct DedicatedThread {
    thread_name: String,
}

impl DedicatedThread {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for DedicatedThread {
    fn default() -> Self {
        Self::new("livecue-engine")
    }
}

impl ContextStrategy for DedicatedThread {
    fn name(&self) -> &str {
        "dedicated-thread"
    }

    fn launch(
        &self,
        engine: SchedulerEngine,
        commands: mpsc::Receiver<EngineCommand>,
    ) -> Result<ContextJoin, HostError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HostError::launch_failed(self.name(), e))?;

        let handle = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || runtime.block_on(engine.run(commands)))
            .map_err(|e| HostError::launch_failed(self.name(), e))?;

        Ok(ContextJoin::Thread(handle))
    }
}

/// Task on the runtime the host is running in
#[derive(Debug, Clone, Default)]
pub struct RuntimeTask;

impl ContextStrategy for RuntimeTask {
    fn name(&self) -> &str {
        "runtime-task"
    }

    fn launch(
        &self,
        engine: SchedulerEngine,
        commands: mpsc::Receiver<EngineCommand>,
    ) -> Result<ContextJoin, HostError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::launch_failed(self.name(), e))?;
        Ok(ContextJoin::Task(handle.spawn(engine.run(commands))))
    }
}

/// Primary then secondary strategy
pub fn default_strategies() -> Vec<Box<dyn ContextStrategy>> {
    vec![Box::new(DedicatedThread::default()), Box::new(RuntimeTask)]
}

// ============================================================================
// Engine Handle
// ============================================================================

/// Host side of a running engine
#[derive(Debug)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    strategy: String,
    join: ContextJoin,
}

impl EngineHandle {
    /// Strategy that hosts the engine
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Send a command to the engine
    pub async fn send(&self, command: EngineCommand) -> Result<(), HostError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HostError::EngineStopped)
    }

    /// Next engine event; `None` once the engine is gone
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }

    /// Close the command channel and wait for the engine to stop
    pub async fn shutdown(self) {
        let Self {
            commands,
            events,
            strategy,
            join,
        } = self;
        drop(commands);

        let joined = match join {
            ContextJoin::Task(handle) => handle.await.is_ok(),
            ContextJoin::Thread(handle) => matches!(
                tokio::task::spawn_blocking(move || handle.join()).await,
                Ok(Ok(()))
            ),
        };
        drop(events);
        debug!(strategy = %strategy, clean = joined, "Engine context stopped");
    }
}

/// Start an engine in the first strategy that works
///
/// # Errors
///
/// Returns `HostError::ContextUnavailable` listing every failed attempt
pub fn acquire_context(
    strategies: &[Box<dyn ContextStrategy>],
    factory: &EngineFactory,
) -> Result<EngineHandle, HostError> {
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let engine = factory.build(events_tx);

        match strategy.launch(engine, commands_rx) {
            Ok(join) => {
                info!(strategy = strategy.name(), "Engine context acquired");
                return Ok(EngineHandle {
                    commands,
                    events,
                    strategy: strategy.name().to_string(),
                    join,
                });
            }
            Err(e) => {
                warn!(strategy = strategy.name(), error = %e, "Engine context strategy failed");
                attempts.push(e.to_string());
            }
        }
    }

    Err(HostError::ContextUnavailable { attempts })
}
