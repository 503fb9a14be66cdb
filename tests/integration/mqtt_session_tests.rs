//! Integration tests for the real MQTT adapter against a loopback broker.

use std::time::{Duration, Instant};

use beamcount::adapters::mqtt::MqttSession;
use beamcount::adapters::time::MonotonicClock;
use beamcount::app::events::AppEvent;
use beamcount::config::ListenerConfig;
use beamcount::supervisor::{ConnectionSupervisor, LinkState, ShutdownHandle};

use super::fake_broker::{Behaviour, FakeBroker};
use super::mock_ports::{MockCountSink, RecordingEvents, TOPIC};

type LiveSupervisor = ConnectionSupervisor<MqttSession, MockCountSink, RecordingEvents, MonotonicClock>;

fn config(port: u16) -> ListenerConfig {
    ListenerConfig {
        broker_host: "127.0.0.1".into(),
        broker_port: port,
        heartbeat_topic: None,
        connect_timeout_ms: 3_000,
        poll_interval_ms: 50,
        backoff_floor_ms: 50,
        backoff_ceiling_ms: 200,
        ..ListenerConfig::default()
    }
}

fn live(config: &ListenerConfig) -> LiveSupervisor {
    let clock = MonotonicClock::new();
    ConnectionSupervisor::new(
        config,
        MqttSession::new(config, clock).unwrap(),
        MockCountSink::new(),
        RecordingEvents::new(),
        clock,
        ShutdownHandle::new(),
    )
}

#[test]
fn handshake_slower_than_poll_interval_connects_on_one_dial() {
    let broker = FakeBroker::start(Behaviour {
        connack_delay: Duration::from_millis(400),
        ..Behaviour::default()
    });
    let mut sup = live(&config(broker.port()));

    sup.connect().unwrap();

    assert_eq!(sup.link(), LinkState::Connected);
    assert_eq!(broker.accepts(), 1);
    sup.shutdown();
}

#[test]
fn refused_subscription_is_retried_without_redialing() {
    let broker = FakeBroker::start(Behaviour {
        refuse_subscribes: 1,
        ..Behaviour::default()
    });
    let mut sup = live(&config(broker.port()));
    sup.connect().unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while sup.status_handle().snapshot().subscribed_topic.is_none() && Instant::now() < deadline {
        sup.step();
    }

    let status = sup.status_handle().snapshot();
    assert_eq!(status.subscribed_topic.as_deref(), Some(TOPIC));
    assert!(status.connected);
    assert_eq!(broker.subscribes(), 2);
    assert_eq!(broker.accepts(), 1);
    assert!(sup
        .events()
        .events
        .iter()
        .any(|e| matches!(e, AppEvent::SubscriptionRefused { attempt: 1, .. })));
    sup.shutdown();
}
