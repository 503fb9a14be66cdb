//! MQTT broker adapter.
//!
//! Implements [`BrokerPort`] on top of the `rumqttc` synchronous client.
//!
//! ```text
//! ┌──────────────┐  subscribe/publish  ┌─────────────┐
//! │  supervisor  │────── Client ──────▶│  rumqttc    │
//! │   (poll)     │◀──── net events ────│  mqtt-net   │◀──▶ broker
//! └──────────────┘  bounded, in order  │  (thread)   │
//!        │            redial permit    └─────────────┘
//!        └────────────────────────────────────▲
//! ```
//!
//! The `Connection` half lives on a dedicated `mqtt-net` thread that blocks
//! in `recv()`, so a TCP dial or CONNECT/CONNACK exchange always runs to
//! completion no matter how short the supervisor's poll interval is.
//!
//! ## Session settings
//!
//! - Clean session.  Subscriptions are re-issued on every `ConnAck`.
//! - QoS 1 for the state subscription and the heartbeat.
//! - If a heartbeat topic is configured, a retained `"offline"` last will
//!   is registered so the broker announces an unclean drop.
//!
//! ## Reconnection
//!
//! After a connection error the network thread parks until the next
//! `poll` hands it a redial permit, so pacing between dials stays with the
//! supervisor's backoff.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{Client, Connection, ConnectionError, Event, LastWill, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};

use crate::app::ports::{BrokerEvent, BrokerPort, Clock, TransportError};
use crate::config::ListenerConfig;
use crate::detector::admission::RawMessage;
use crate::error::Error;

use super::time::MonotonicClock;

/// Payload of the retained liveness message while running.
pub const HEARTBEAT_ONLINE: &str = "online";
/// Payload of the retained liveness message after shutdown (and the last will).
pub const HEARTBEAT_OFFLINE: &str = "offline";

/// Request queue capacity between `Client` and `Connection`.
const REQUEST_CAPACITY: usize = 10;
/// Network events buffered between the `mqtt-net` thread and `poll`.
const EVENT_DEPTH: usize = 64;
/// Upper bound on waits spent flushing the final publish and DISCONNECT.
const DISCONNECT_DRAIN_POLLS: usize = 20;

type NetEvent = Result<Event, ConnectionError>;

pub struct MqttSession {
    client: Client,
    net_events: Receiver<NetEvent>,
    /// Dropped on disconnect so a parked network thread exits.
    redial: Option<SyncSender<()>>,
    awaiting_redial: bool,
    clock: MonotonicClock,
    address: String,
    connected: bool,
}

impl MqttSession {
    /// Build the session and start its network thread.  The first dial
    /// happens right away; events queue up until the first `poll`.
    pub fn new(config: &ListenerConfig, clock: MonotonicClock) -> Result<Self, Error> {
        let (client, connection) = Client::new(Self::options(config), REQUEST_CAPACITY);
        let (event_tx, net_events) = mpsc::sync_channel(EVENT_DEPTH);
        let (redial_tx, redial_rx) = mpsc::sync_channel(1);

        std::thread::Builder::new()
            .name("mqtt-net".into())
            .spawn(move || net_task(connection, &event_tx, &redial_rx))
            .map_err(|_| Error::Init("mqtt-net thread"))?;

        info!(
            "MqttSession: {} as '{}' (keep-alive {}s)",
            config.broker_address(),
            config.client_id,
            config.keep_alive_secs
        );
        Ok(Self {
            client,
            net_events,
            redial: Some(redial_tx),
            awaiting_redial: false,
            clock,
            address: config.broker_address(),
            connected: false,
        })
    }

    fn options(config: &ListenerConfig) -> MqttOptions {
        let mut opts = MqttOptions::new(config.client_id.clone(), config.broker_host.clone(), config.broker_port);
        opts.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
        opts.set_clean_session(true);
        if let Some(user) = &config.username {
            opts.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
        }
        if let Some(topic) = &config.heartbeat_topic {
            opts.set_last_will(LastWill::new(topic.clone(), HEARTBEAT_OFFLINE, QoS::AtLeastOnce, true));
        }
        opts
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Body of the `mqtt-net` thread.  Forwards every event in order and
/// waits for a redial permit after each connection error.
fn net_task(mut connection: Connection, events: &SyncSender<NetEvent>, redial: &Receiver<()>) {
    loop {
        match connection.recv() {
            Ok(Ok(event)) => {
                let closing = matches!(event, Event::Outgoing(Outgoing::Disconnect));
                if events.send(Ok(event)).is_err() || closing {
                    break;
                }
            }
            Ok(Err(e)) => {
                if events.send(Err(e)).is_err() || redial.recv().is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    debug!("MqttSession: network thread stopped");
}

impl BrokerPort for MqttSession {
    fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerEvent>, TransportError> {
        if core::mem::take(&mut self.awaiting_redial) {
            if let Some(redial) = &self.redial {
                let _ = redial.try_send(());
            }
        }

        let event = match self.net_events.recv_timeout(timeout) {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                self.awaiting_redial = true;
                let was_connected = core::mem::replace(&mut self.connected, false);
                return Err(if was_connected {
                    TransportError::Disconnected(e.to_string())
                } else {
                    TransportError::ConnectFailed(e.to_string())
                });
            }
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.connected = false;
                return Err(TransportError::Disconnected("network thread stopped".into()));
            }
        };

        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!("MqttSession: CONNACK {:?}", ack.code);
                self.connected = true;
                Ok(Some(BrokerEvent::Connected))
            }
            Event::Incoming(Packet::Publish(publish)) => Ok(Some(BrokerEvent::Message(RawMessage::new(
                publish.topic,
                publish.payload.to_vec(),
                publish.retain,
                self.clock.now_ms(),
            )))),
            Event::Incoming(Packet::SubAck(suback)) => {
                if suback.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                    warn!("MqttSession: broker refused subscription (pkid {})", suback.pkid);
                    return Ok(Some(BrokerEvent::SubscribeRefused("SUBACK failure".into())));
                }
                Ok(Some(BrokerEvent::Subscribed))
            }
            Event::Incoming(Packet::Disconnect) => {
                self.connected = false;
                Err(TransportError::Disconnected("broker sent DISCONNECT".into()))
            }
            Event::Incoming(_) | Event::Outgoing(_) => Ok(None),
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload.to_vec())
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        // A thread parked between dials exits instead of dialing again.
        self.redial = None;
        self.client
            .disconnect()
            .map_err(|e| TransportError::Disconnected(e.to_string()))?;

        // Wait until DISCONNECT is on the wire, so queued publishes (the
        // offline heartbeat) go out first.  Messages arriving meanwhile are
        // discarded: shutdown has already stopped intake.
        for _ in 0..DISCONNECT_DRAIN_POLLS {
            match self.net_events.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
                Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.connected = false;
        info!("MqttSession: disconnected from {}", self.address);
        Ok(())
    }

    fn broker_address(&self) -> String {
        self.address.clone()
    }
}
