//! Integration tests for the connection supervisor.
//!
//! A scripted broker plays back connect acks, messages and drops; the
//! supervisor is stepped one poll at a time.

use std::time::Duration;

use beamcount::Error;
use beamcount::app::events::AppEvent;
use beamcount::app::ports::TransportError;
use beamcount::config::ListenerConfig;
use beamcount::detector::normalize::CanonicalState;
use beamcount::supervisor::{ConnectionSupervisor, LinkState, ShutdownHandle};

use super::mock_ports::{ManualClock, MockCountSink, Poll, RecordingEvents, ScriptedBroker, TOPIC, message, state};

type TestSupervisor = ConnectionSupervisor<ScriptedBroker, MockCountSink, RecordingEvents, ManualClock>;

fn config() -> ListenerConfig {
    ListenerConfig {
        backoff_floor_ms: 1,
        backoff_ceiling_ms: 8,
        connect_timeout_ms: 500,
        ..ListenerConfig::default()
    }
}

fn build(broker: ScriptedBroker, shutdown: ShutdownHandle) -> TestSupervisor {
    ConnectionSupervisor::new(
        &config(),
        broker,
        MockCountSink::new(),
        RecordingEvents::new(),
        ManualClock::stepping(50),
        shutdown,
    )
}

fn supervisor(script: impl IntoIterator<Item = Poll>) -> TestSupervisor {
    build(ScriptedBroker::new(script), ShutdownHandle::new())
}

fn step_n(sup: &mut TestSupervisor, n: usize) {
    for _ in 0..n {
        sup.step();
    }
}

#[test]
fn full_session_counts_and_reports_status() {
    let mut sup = supervisor([
        ScriptedBroker::connected(),
        ScriptedBroker::suback(),
        ScriptedBroker::deliver(message(&state("livre"), true, 0)),
        ScriptedBroker::deliver(message(&state("interrompida"), false, 1_000)),
        ScriptedBroker::deliver(message(&state("livre"), false, 1_400)),
    ]);
    sup.connect().unwrap();
    step_n(&mut sup, 4);

    assert_eq!(sup.sink().stored.len(), 1);
    let status = sup.status_handle().snapshot();
    assert!(status.connected);
    assert_eq!(status.link, LinkState::Connected);
    assert_eq!(status.broker_address, "mock-broker:1883");
    assert_eq!(status.subscribed_topic.as_deref(), Some(TOPIC));
    assert_eq!(status.last_known_state, CanonicalState::Clear);
    assert_eq!(status.reconnects, 0);
}

#[test]
fn status_serialises_as_json() {
    let mut sup = supervisor([ScriptedBroker::connected()]);
    sup.connect().unwrap();
    let json = serde_json::to_value(sup.status_handle().snapshot()).unwrap();
    assert_eq!(json["connected"], true);
    assert_eq!(json["link"]["state"], "connected");
    assert_eq!(json["last_known_state"], "unknown");
}

#[test]
fn initial_connect_without_ack_is_fatal() {
    let mut sup = supervisor([]);
    match sup.connect() {
        Err(Error::Transport(TransportError::ConnectFailed(msg))) => assert!(msg.contains("500ms")),
        other => panic!("expected connect timeout, got {:?}", other),
    }
}

fn refusals(sup: &TestSupervisor) -> Vec<(u32, Duration)> {
    sup.events()
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::SubscriptionRefused { attempt, retry_in, .. } => Some((*attempt, *retry_in)),
            _ => None,
        })
        .collect()
}

#[test]
fn failed_subscribe_call_is_retried_on_the_live_session() {
    let mut broker = ScriptedBroker::new([ScriptedBroker::connected()]);
    broker.refuse_subscribes = 2;
    let mut sup = build(broker, ShutdownHandle::new());
    sup.connect().unwrap();
    assert_eq!(sup.link(), LinkState::Connected);
    assert!(sup.broker().subscriptions.is_empty());

    step_n(&mut sup, 3);

    // No new CONNACK was needed for the retries.
    assert_eq!(sup.broker().subscribe_calls, 3);
    assert_eq!(sup.broker().subscriptions, [TOPIC]);
    assert_eq!(sup.link(), LinkState::Connected);
    assert!(sup.status_handle().snapshot().connected);
    let ms = |n| Duration::from_millis(n);
    assert_eq!(refusals(&sup), [(1, ms(1)), (2, ms(2))]);
}

#[test]
fn refused_suback_resubscribes_until_accepted() {
    let mut sup = supervisor([
        ScriptedBroker::connected(),
        ScriptedBroker::refused(),
        Ok(None),
        ScriptedBroker::suback(),
        ScriptedBroker::deliver(message(&state("interrompida"), false, 1_000)),
        ScriptedBroker::deliver(message(&state("livre"), false, 1_500)),
    ]);
    sup.connect().unwrap();

    sup.step();
    assert_eq!(sup.status_handle().snapshot().subscribed_topic, None);
    assert_eq!(sup.link(), LinkState::Connected);

    step_n(&mut sup, 4);
    assert_eq!(sup.broker().subscriptions, [TOPIC, TOPIC]);
    assert_eq!(sup.status_handle().snapshot().subscribed_topic.as_deref(), Some(TOPIC));
    assert_eq!(sup.sink().stored.len(), 1);
    assert_eq!(sup.status_handle().snapshot().reconnects, 0);
    assert_eq!(refusals(&sup).len(), 1);
}

#[test]
fn reconnect_re_arms_retained_seed_but_keeps_state() {
    let mut sup = supervisor([
        ScriptedBroker::connected(),
        ScriptedBroker::deliver(message(&state("interrompida"), false, 1_000)),
        ScriptedBroker::dropped(),
        ScriptedBroker::connected(),
        // Retained "livre" after reconnect is a baseline, not a pass.
        ScriptedBroker::deliver(message(&state("livre"), true, 9_000)),
        ScriptedBroker::deliver(message(&state("interrompida"), false, 9_500)),
        ScriptedBroker::deliver(message(&state("livre"), false, 9_800)),
    ]);
    sup.connect().unwrap();
    step_n(&mut sup, 6);

    assert!(sup.broker().is_drained());
    assert_eq!(sup.sink().stored.len(), 1);
    assert_eq!(sup.sink().stored[0].detected_at_ms, 9_800);
    assert_eq!(sup.status_handle().snapshot().reconnects, 1);
    assert_eq!(sup.service().last_state(), CanonicalState::Clear);
}

#[test]
fn backoff_grows_then_resets_after_success() {
    let mut sup = supervisor([
        ScriptedBroker::connected(),
        ScriptedBroker::dropped(),
        Err(TransportError::ConnectFailed("refused".into())),
        Err(TransportError::ConnectFailed("refused".into())),
        Err(TransportError::ConnectFailed("refused".into())),
        Err(TransportError::ConnectFailed("refused".into())),
        ScriptedBroker::connected(),
        ScriptedBroker::dropped(),
    ]);
    sup.connect().unwrap();
    step_n(&mut sup, 7);

    let delays: Vec<(u32, Duration)> = sup
        .events()
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::ConnectionLost { attempt, retry_in, .. } => Some((*attempt, *retry_in)),
            _ => None,
        })
        .collect();
    let ms = |n| Duration::from_millis(n);
    assert_eq!(delays, [(1, ms(1)), (2, ms(2)), (3, ms(4)), (4, ms(8)), (5, ms(8)), (1, ms(1))]);
}

#[test]
fn heartbeat_online_on_each_connect_offline_on_shutdown() {
    let shutdown = ShutdownHandle::new();
    let mut sup = build(
        ScriptedBroker::new([
            ScriptedBroker::connected(),
            ScriptedBroker::dropped(),
            ScriptedBroker::connected(),
        ]),
        shutdown.clone(),
    );
    sup.connect().unwrap();
    step_n(&mut sup, 2);
    shutdown.trigger();
    sup.run();

    let payloads: Vec<&str> = sup.broker().heartbeats.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(payloads, ["online", "online", "offline"]);
    assert!(sup.sink().flushed);
    assert_eq!(sup.link(), LinkState::Stopped);
}

#[test]
fn shutdown_while_reconnecting_skips_offline_publish() {
    let shutdown = ShutdownHandle::new();
    let mut sup = build(
        ScriptedBroker::new([ScriptedBroker::connected(), ScriptedBroker::dropped()]),
        shutdown.clone(),
    );
    sup.connect().unwrap();
    sup.step();
    shutdown.trigger();
    sup.run();

    let payloads: Vec<&str> = sup.broker().heartbeats.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(payloads, ["online"]);
    assert!(matches!(sup.events().events.last(), Some(AppEvent::ShuttingDown)));
}

#[test]
fn no_heartbeat_topic_means_no_publishes() {
    let config = ListenerConfig {
        heartbeat_topic: None,
        ..config()
    };
    let mut sup = ConnectionSupervisor::new(
        &config,
        ScriptedBroker::new([ScriptedBroker::connected()]),
        MockCountSink::new(),
        RecordingEvents::new(),
        ManualClock::stepping(50),
        ShutdownHandle::new(),
    );
    sup.connect().unwrap();
    sup.shutdown();
    assert!(sup.broker().heartbeats.is_empty());
}
