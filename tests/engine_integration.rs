//! Integration tests for the scheduler engine loop
//!
//! These tests drive `SchedulerEngine::run` on paused tokio time and verify:
//! - Idempotent delivery across many ticks
//! - Re-initialization replacing the running session
//! - Live session gating released through bus updates
//! - Time samples shared between sibling engines
//! - Refusal to start without a tab identity
//! - Correction of a starting segment guessed from a skewed local clock

mod common;

use common::{build_engine, drain_contents, offline_engine, timeline, ScriptedSource, NOW};
use livecue::bus::{plugin_topic, InProcessBus, NotificationBus};
use livecue::models::{EngineEvent, FaultKind, Segment};
use livecue::scheduler::{EngineCommand, InitMessage, TestingConfig};
use livecue::time::{ManualClock, TimeSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

async fn settle(secs: u64) {
    sleep(Duration::from_secs(secs)).await;
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_consecutive_ticks_announce_once() {
    let clock = Arc::new(ManualClock::new(NOW));
    let (engine, mut events) = offline_engine(clock.clone());
    let (commands, commands_rx) = mpsc::channel(4);
    let task = tokio::spawn(engine.run(commands_rx));

    commands
        .send(InitMessage::new(timeline(), "tab-1").into_command())
        .await
        .unwrap();
    settle(30).await;
    assert_eq!(drain_contents(&mut events), vec!["/keynote".to_string()]);

    clock.advance(60_000);
    settle(5).await;
    assert_eq!(drain_contents(&mut events), vec!["/replay".to_string()]);

    settle(30).await;
    assert!(drain_contents(&mut events).is_empty());

    drop(commands);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reinit_replaces_previous_session() {
    let clock = Arc::new(ManualClock::new(NOW));
    let (engine, mut events) = offline_engine(clock.clone());
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    commands
        .send(InitMessage::new(timeline(), "tab-1").into_command())
        .await
        .unwrap();
    commands
        .send(
            InitMessage::new(
                vec![
                    Segment::new("/lobby", None),
                    Segment::new("/finale", Some(NOW + 120_000)),
                ],
                "tab-1",
            )
            .into_command(),
        )
        .await
        .unwrap();
    settle(5).await;
    assert_eq!(
        drain_contents(&mut events),
        vec!["/keynote".to_string(), "/lobby".to_string()]
    );

    // Past the first timeline's replay toggle but before the finale
    clock.advance(90_000);
    settle(5).await;
    assert!(drain_contents(&mut events).is_empty());

    clock.advance(60_000);
    settle(5).await;
    assert_eq!(drain_contents(&mut events), vec!["/finale".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_tab_id_refuses_to_start() {
    let clock = Arc::new(ManualClock::new(NOW));
    let (engine, mut events) = offline_engine(clock);
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    commands
        .send(EngineCommand::Init(json!({"schedule": timeline()})))
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        EngineEvent::Fault { kind, .. } => assert_eq!(kind, FaultKind::MissingTabId),
        other => panic!("expected a fault, got {other:?}"),
    }

    settle(10).await;
    assert!(events.try_recv().is_err());
}

// ============================================================================
// Start-up Correction
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_local_clock_behind_authority_jumps_forward() {
    let clock = Arc::new(ManualClock::new(NOW));
    let source = Arc::new(ScriptedSource::new(vec![Ok(NOW + 120_000)]));
    let (engine, mut events) = build_engine(clock, source.clone(), None);
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    let mut segments = timeline();
    segments.push(Segment::new("/finale", Some(NOW + 100_000)));
    commands
        .send(InitMessage::new(segments, "tab-1").into_command())
        .await
        .unwrap();
    settle(5).await;

    // the replay segment is skipped, not shown on the way
    assert_eq!(
        drain_contents(&mut events),
        vec!["/keynote".to_string(), "/finale".to_string()]
    );
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_local_clock_ahead_of_authority_steps_back() {
    let clock = Arc::new(ManualClock::new(NOW));
    let source = Arc::new(ScriptedSource::new(vec![Ok(NOW - 30_000)]));
    let (engine, mut events) = build_engine(clock.clone(), source.clone(), None);
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    commands
        .send(InitMessage::new(timeline(), "tab-1").into_command())
        .await
        .unwrap();
    settle(5).await;
    assert_eq!(
        drain_contents(&mut events),
        vec!["/keynote".to_string(), "/pre-show".to_string()]
    );

    clock.advance(30_000);
    settle(5).await;
    assert_eq!(drain_contents(&mut events), vec!["/keynote".to_string()]);
    assert_eq!(source.calls(), 1);
}

// ============================================================================
// Testing Overrides
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_frozen_instant_never_consults_time_source() {
    let clock = Arc::new(ManualClock::new(NOW));
    let source = Arc::new(ScriptedSource::new(vec![Ok(NOW)]));
    let (engine, mut events) = build_engine(clock.clone(), source.clone(), None);
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    let testing = TestingConfig {
        toggle_time: Some(json!(NOW - 30_000)),
        ..TestingConfig::default()
    };
    commands
        .send(
            InitMessage::new(timeline(), "tab-1")
                .with_testing(&testing)
                .into_command(),
        )
        .await
        .unwrap();

    settle(10).await;
    clock.advance(120_000);
    settle(10).await;

    assert_eq!(drain_contents(&mut events), vec!["/pre-show".to_string()]);
    assert_eq!(source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_time_keeps_polling() {
    let clock = Arc::new(ManualClock::new(NOW));
    let (engine, mut events) = offline_engine(clock.clone());
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    let testing = TestingConfig {
        server_time: Some(json!(NOW + 59_000)),
        ..TestingConfig::default()
    };
    commands
        .send(
            InitMessage::new(timeline(), "tab-1")
                .with_testing(&testing)
                .into_command(),
        )
        .await
        .unwrap();
    settle(5).await;
    assert_eq!(drain_contents(&mut events), vec!["/keynote".to_string()]);

    clock.advance(2_000);
    settle(5).await;
    assert_eq!(drain_contents(&mut events), vec!["/replay".to_string()]);
}

// ============================================================================
// Bus Traffic
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_live_session_released_by_matching_update() {
    let clock = Arc::new(ManualClock::new(NOW));
    let bus = InProcessBus::new(16);
    let (engine, mut events) = build_engine(
        clock.clone(),
        Arc::new(livecue::time::OfflineTimeSource),
        Some(&bus),
    );
    let (commands, commands_rx) = mpsc::channel(4);
    tokio::spawn(engine.run(commands_rx));

    let segments = vec![
        Segment::new("/pre-show", Some(NOW - 60_000)),
        Segment::new("/keynote", Some(NOW - 1_000)).with_live_session("keynote-stream"),
        Segment::new("/replay", Some(NOW + 1_000)),
    ];
    let init = InitMessage::new(segments, "tab-1")
        .with_plugins(json!({"live-sessions": {"data": {"keynote-stream": true}}}));
    commands.send(init.into_command()).await.unwrap();
    settle(2).await;
    assert_eq!(drain_contents(&mut events), vec!["/keynote".to_string()]);

    clock.advance(2_000);
    settle(5).await;
    assert!(drain_contents(&mut events).is_empty());

    let publisher = bus.attach();
    publisher.publish(
        &plugin_topic("live-sessions"),
        json!({"tabId": "tab-2", "key": "keynote-stream", "value": false}),
    );
    settle(5).await;
    assert!(drain_contents(&mut events).is_empty());

    publisher.publish(
        &plugin_topic("live-sessions"),
        json!({"tabId": "tab-1", "key": "keynote-stream", "value": false}),
    );
    settle(5).await;
    assert_eq!(drain_contents(&mut events), vec!["/replay".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_sibling_reuses_shared_time_sample() {
    let clock = Arc::new(ManualClock::new(NOW));
    let bus = InProcessBus::new(16);

    let failing = Arc::new(ScriptedSource::new(vec![]));
    let (follower, mut follower_events) =
        build_engine(clock.clone(), failing.clone() as Arc<dyn TimeSource>, Some(&bus));
    let (follower_tx, follower_rx) = mpsc::channel(4);
    tokio::spawn(follower.run(follower_rx));

    let skewed = Arc::new(ScriptedSource::new(vec![Ok(NOW + 5_000)]));
    let (leader, _leader_events) =
        build_engine(clock.clone(), skewed.clone() as Arc<dyn TimeSource>, Some(&bus));
    let (leader_tx, leader_rx) = mpsc::channel(4);
    tokio::spawn(leader.run(leader_rx));

    follower_tx
        .send(
            InitMessage::new(
                vec![
                    Segment::new("/lobby", None),
                    Segment::new("/doors-open", Some(NOW + 3_000)),
                ],
                "tab-1",
            )
            .into_command(),
        )
        .await
        .unwrap();
    settle(1).await;
    assert_eq!(drain_contents(&mut follower_events), vec!["/lobby".to_string()]);
    assert_eq!(failing.calls(), 1);

    leader_tx
        .send(InitMessage::new(timeline(), "tab-1").into_command())
        .await
        .unwrap();
    settle(3).await;

    assert_eq!(skewed.calls(), 1);
    assert_eq!(
        drain_contents(&mut follower_events),
        vec!["/doors-open".to_string()]
    );
    assert_eq!(failing.calls(), 1);
}
