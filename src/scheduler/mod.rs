//! Timeline scheduling
//!
//! This module decides which segment of a pre-planned timeline is visible at
//! any moment and announces every change to the host.
//!
//! # Overview
//!
//! A timeline is an ordered list of segments, each with an optional toggle
//! time and optional gating on live sessions or metadata. The engine starts
//! from the best available time without waiting on the network, announces the
//! starting segment, confirms it against the authoritative time, then polls on
//! a randomized 500-1500 ms interval.
//!
//! # Architecture
//!
//! ```text
//!   Host ──EngineCommand::Init──▶ ┌────────────────────┐ ──EngineEvent──▶ Host
//!                                 │  SchedulerEngine   │
//!                                 │  ┌──────────────┐  │
//!          time-cache ◀─────────▶ │  │TimeAuthority │  │
//!                                 │  └──────────────┘  │
//!       plugin:<store> ─────────▶ │  PluginSet         │
//!                                 │  Schedule (arena)  │
//!                                 │  TestingOverride   │
//!                                 └─────────┬──────────┘
//!                                           │ per tick
//!                                           ▼
//!                                      evaluate()
//! ```
//!
//! # Modules
//!
//! - [`schedule`] - Arena-backed doubly linked timeline
//! - [`conditions`] - Pure activation rules
//! - [`testing`] - Simulated and frozen clocks
//! - [`engine`] - The polling loop and its lifecycle
//! - [`error`] - Scheduler error type
//!
//! # Quick Start
//!
//! ```ignore
//! use livecue::scheduler::{EngineDeps, InitMessage, SchedulerEngine};
//!
//! let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let (commands_tx, commands) = tokio::sync::mpsc::channel(8);
//! let engine = SchedulerEngine::new(deps, config.time, config.engine, events_tx);
//! tokio::spawn(engine.run(commands));
//!
//! commands_tx.send(InitMessage::new(segments, "tab-1").into_command()).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```
//!
//! # Timing
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `poll_min_ms` | 500 | Lower bound of the tick interval |
//! | `poll_max_ms` | 1500 | Upper bound of the tick interval |
//! | `rng_seed` | none | Fixed seed for reproducible intervals |

pub mod conditions;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod testing;

// Re-export main types
pub use conditions::{evaluate, Decision, HoldReason};
pub use engine::{EngineCommand, EngineDeps, InitMessage, LoopPhase, SchedulerEngine};
pub use error::{SchedulerError, SchedulerResult};
pub use schedule::{Schedule, SegmentId};
pub use testing::{TestingConfig, TestingOverride};
