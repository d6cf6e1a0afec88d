use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livecue::config::{Config, LoggingConfig, ScheduleFile};
use livecue::error::LivecueErrorTrait;
use livecue::host::{Orchestrator, SegmentSink, StartOutcome};
use livecue::models::Segment;
use livecue::scheduler::{InitMessage, TestingConfig};
use livecue::time::SystemClock;
use livecue::utils::parse_instant_text;

#[derive(Parser)]
#[command(
    name = "livecue",
    version,
    about = "Time-driven content scheduler for live event pages",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and print every announced segment
    Run {
        /// Schedule file (TOML or JSON)
        #[arg(short, long)]
        schedule: PathBuf,

        /// Configuration file; environment variables are used when absent
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tab group identity; a random one is generated when absent
        #[arg(long)]
        tab_id: Option<String>,

        /// Page URL carrying simulation parameters (timing, avoidStreamEnd)
        #[arg(long)]
        page_url: Option<String>,

        /// Freeze the clock at this instant (epoch ms or RFC 3339)
        #[arg(long)]
        timing: Option<String>,

        /// Treat every live session as ended
        #[arg(long, default_value = "false")]
        avoid_stream_end: bool,

        /// Print Prometheus metrics on exit
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Show the segment that starts at a given instant
    Plan {
        /// Schedule file (TOML or JSON)
        #[arg(short, long)]
        schedule: PathBuf,

        /// Instant to plan for (epoch ms or RFC 3339)
        #[arg(long)]
        at: String,
    },

    /// Check that a schedule file builds
    Validate {
        /// Schedule file (TOML or JSON)
        #[arg(short, long)]
        schedule: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Run reads its config first so the logging section applies
    let config = match &cli.command {
        Commands::Run { config, .. } => Some(load_config(config.as_deref())?),
        _ => None,
    };
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    setup_tracing(&logging, cli.log_format.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Run {
            schedule,
            tab_id,
            page_url,
            timing,
            avoid_stream_end,
            metrics,
            ..
        } => {
            tracing::info!(
                schedule = %schedule.display(),
                tab_id = ?tab_id,
                page_url = ?page_url,
                timing = ?timing,
                avoid_stream_end = %avoid_stream_end,
                "Starting run command"
            );
            let testing = testing_config(page_url.as_deref(), timing, avoid_stream_end);
            run(RunParams {
                schedule,
                config: config.unwrap_or_default(),
                tab_id,
                testing,
                metrics,
            })
            .await?;
        }

        Commands::Plan { schedule, at } => plan(&schedule, &at)?,

        Commands::Validate { schedule } => validate(&schedule)?,
    }

    Ok(())
}

/// `--verbose` wins, then `RUST_LOG`, then the configured level
fn setup_tracing(logging: &LoggingConfig, format: Option<&str>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("livecue=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("livecue={},warn", logging.level))
        })
    };

    match format.unwrap_or(&logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

struct RunParams {
    schedule: PathBuf,
    config: Config,
    tab_id: Option<String>,
    testing: Option<TestingConfig>,
    metrics: bool,
}

/// Prints announced segments as JSON lines
struct StdoutSink;

impl SegmentSink for StdoutSink {
    fn show_segment(&mut self, segment: &Segment) {
        match serde_json::to_string(segment) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode segment"),
        }
    }

    fn show_notice(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

fn testing_config(
    page_url: Option<&str>,
    timing: Option<String>,
    avoid_stream_end: bool,
) -> Option<TestingConfig> {
    let mut config = page_url
        .and_then(TestingConfig::from_page_url)
        .unwrap_or_default();
    if let Some(timing) = timing {
        config.toggle_time = Some(Value::String(timing));
    }
    if avoid_stream_end {
        config.avoid_stream_end_flag = Some(true);
    }
    (!config.is_empty()).then_some(config)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn run(params: RunParams) -> Result<()> {
    let schedule_file = ScheduleFile::from_path(&params.schedule)?;
    let segments = schedule_file
        .segments()
        .context("Schedule file contains unreadable entries")?;

    if let Err(e) = livecue::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let tab_id = params
        .tab_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut init = InitMessage::new(segments, tab_id.clone());
    if let Some(plugins) = schedule_file.plugins.clone() {
        init = init.with_plugins(plugins);
    }
    if let Some(testing) = &params.testing {
        init = init.with_testing(testing);
    }

    let orchestrator = Orchestrator::from_config(params.config, Arc::new(SystemClock::new()))
        .context("Failed to set up the engine host")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    let mut sink = StdoutSink;
    match orchestrator.start(init.clone(), &mut sink).await {
        StartOutcome::Scheduled(mut handle) => {
            tracing::info!(tab_id = %tab_id, strategy = handle.strategy(), "Engine running");
            let poller = match orchestrator.spawn_live_poller(&init, shutdown_rx.clone()) {
                Ok(poller) => poller,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        category = e.category().description(),
                        "Live status polling disabled"
                    );
                    None
                }
            };

            Orchestrator::follow(&mut handle, &mut sink, shutdown_rx).await;
            handle.shutdown().await;
            if let Some(poller) = poller {
                poller.abort();
            }
        }
        StartOutcome::Unscheduled(e) => {
            tracing::warn!(
                error = %e,
                category = e.category().description(),
                recoverable = e.is_recoverable(),
                "Ran without scheduled content"
            );
        }
    }

    if params.metrics {
        print!("{}", livecue::metrics::gather());
    }
    Ok(())
}

fn plan(schedule: &Path, at: &str) -> Result<()> {
    let at_ms = parse_instant_text(at)
        .with_context(|| format!("Unreadable instant: {at}"))?;
    let schedule = ScheduleFile::from_path(schedule)?
        .build()
        .context("Failed to build schedule")?;

    let start = schedule.find_starting_segment(schedule.head(), at_ms);
    let segment = schedule.get(start)?;
    println!("Starting segment at {at_ms}:");
    println!("  #{} {}", start.index(), segment.content_ref);
    if let Some(next) = schedule.next(start) {
        let next_segment = schedule.get(next)?;
        println!(
            "  next: #{} {} (toggle {:?})",
            next.index(),
            next_segment.content_ref,
            next_segment.toggle_time
        );
    }
    Ok(())
}

fn validate(schedule: &Path) -> Result<()> {
    let schedule = ScheduleFile::from_path(schedule)?
        .build()
        .context("Failed to build schedule")?;

    println!("Schedule is valid ({} segments):", schedule.len());
    for (id, segment) in schedule.iter() {
        let toggle = segment
            .toggle_time
            .map_or_else(|| "-".to_string(), |t| t.to_string());
        let mut gates = Vec::new();
        if let Some(session) = &segment.live_session_ref {
            gates.push(format!("live:{session}"));
        }
        for condition in &segment.metadata_conditions {
            gates.push(format!("meta:{}", condition.key));
        }
        println!(
            "  #{:<3} {:<15} {} {}",
            id.index(),
            toggle,
            segment.content_ref,
            gates.join(" ")
        );
    }
    Ok(())
}
