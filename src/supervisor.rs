//! Broker connection supervisor.
//!
//! [`ConnectionSupervisor`] owns the broker session and the
//! [`CounterService`] for one state topic.  A single thread drives it:
//! every broker event (connect ack, subscription ack, message, drop) is
//! handled to completion before the next poll, so delivery order is
//! processing order and the detector needs no lock.
//!
//! ## Link lifecycle
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──ConnAck──▶ Connected
//!                                  │                    │   ▲
//!                                  ▼ timeout / error    │   │ ConnAck
//!                               (fatal)          drop   ▼   │
//!                                              Reconnecting{attempt}
//!                                   shutdown from any state ──▶ Stopped
//! ```
//!
//! ## Reconnection policy
//!
//! After a drop the supervisor waits an exponential backoff (1 s → 2 s →
//! 4 s … capped at 30 s, reset on success) before polling again; the
//! wait ends early on shutdown.  Detector state survives reconnects; only
//! the retained-baseline slot is re-armed on each `ConnAck`.
//!
//! A refused subscription does not drop the link: the session stays up
//! and the subscribe is re-issued on a backoff of its own until the
//! broker accepts it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::adapters::mqtt::{HEARTBEAT_OFFLINE, HEARTBEAT_ONLINE};
use crate::app::events::AppEvent;
use crate::app::ports::{BrokerEvent, BrokerPort, Clock, CountSink, EventSink, TransportError};
use crate::app::service::CounterService;
use crate::config::ListenerConfig;
use crate::detector::admission::RawMessage;
use crate::detector::normalize::CanonicalState;
use crate::error::{Error, Result};

// ───────────────────────────────────────────────────────────────
// Link state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Stopped,
}

// ───────────────────────────────────────────────────────────────
// Backoff
// ───────────────────────────────────────────────────────────────

/// Doubling delay between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to wait now; the following one doubles, up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

// ───────────────────────────────────────────────────────────────
// Status snapshot
// ───────────────────────────────────────────────────────────────

/// Read-only view of the supervisor, serialisable as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub connected: bool,
    pub link: LinkState,
    pub broker_address: String,
    /// Set once the broker acknowledged the subscription.
    pub subscribed_topic: Option<String>,
    pub last_known_state: CanonicalState,
    /// Sessions re-established after the first one.
    pub reconnects: u32,
}

/// Shared handle onto the latest [`SupervisorStatus`].
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<SupervisorStatus>>,
}

impl StatusHandle {
    fn new(broker_address: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SupervisorStatus {
                connected: false,
                link: LinkState::Disconnected,
                broker_address,
                subscribed_topic: None,
                last_known_state: CanonicalState::Unknown,
                reconnects: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> SupervisorStatus {
        self.lock().clone()
    }

    fn update(&self, f: impl FnOnce(&mut SupervisorStatus)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ───────────────────────────────────────────────────────────────
// Shutdown signal
// ───────────────────────────────────────────────────────────────

/// Cloneable stop signal.  Triggering wakes a supervisor sleeping in its
/// reconnect backoff.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cv) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`.  Returns `true` if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cv) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cv
            .wait_timeout_while(guard, timeout, |stop| !*stop)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ───────────────────────────────────────────────────────────────
// Supervisor
// ───────────────────────────────────────────────────────────────

pub struct ConnectionSupervisor<B, S, E, C>
where
    B: BrokerPort,
    S: CountSink,
    E: EventSink,
    C: Clock,
{
    broker: B,
    sink: S,
    events: E,
    clock: C,
    service: CounterService,
    state_topic: String,
    heartbeat_topic: Option<String>,
    connect_timeout_ms: u64,
    poll_interval: Duration,
    backoff: Backoff,
    subscribe_backoff: Backoff,
    subscribe_attempt: u32,
    /// Clock time at which a refused subscription is re-issued.
    resubscribe_at: Option<u64>,
    link: LinkState,
    ever_connected: bool,
    status: StatusHandle,
    shutdown: ShutdownHandle,
}

impl<B, S, E, C> ConnectionSupervisor<B, S, E, C>
where
    B: BrokerPort,
    S: CountSink,
    E: EventSink,
    C: Clock,
{
    pub fn new(config: &ListenerConfig, broker: B, sink: S, events: E, clock: C, shutdown: ShutdownHandle) -> Self {
        let status = StatusHandle::new(broker.broker_address());
        Self {
            broker,
            sink,
            events,
            clock,
            service: CounterService::new(config),
            state_topic: config.state_topic.clone(),
            heartbeat_topic: config.heartbeat_topic.clone(),
            connect_timeout_ms: config.connect_timeout_ms,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_floor_ms),
                Duration::from_millis(config.backoff_ceiling_ms),
            ),
            subscribe_backoff: Backoff::new(
                Duration::from_millis(config.backoff_floor_ms),
                Duration::from_millis(config.backoff_ceiling_ms),
            ),
            subscribe_attempt: 0,
            resubscribe_at: None,
            link: LinkState::Disconnected,
            ever_connected: false,
            status,
            shutdown,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn service(&self) -> &CounterService {
        &self.service
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Establish the first session.  Fails if the broker refuses or does
    /// not acknowledge within the connect timeout.
    pub fn connect(&mut self) -> Result<()> {
        self.set_link(LinkState::Connecting);
        let started = self.clock.now_ms();
        info!("Supervisor: connecting to {}", self.broker.broker_address());

        loop {
            if self.shutdown.is_triggered() {
                return Err(Error::Init("shutdown requested before connect"));
            }
            let elapsed = self.clock.now_ms().saturating_sub(started);
            if elapsed >= self.connect_timeout_ms {
                self.set_link(LinkState::Disconnected);
                return Err(Error::Transport(TransportError::ConnectFailed(format!(
                    "no CONNACK within {}ms",
                    self.connect_timeout_ms
                ))));
            }

            match self.broker.poll(self.poll_interval) {
                Ok(Some(BrokerEvent::Connected)) => {
                    self.on_connected();
                    return Ok(());
                }
                Ok(Some(other)) => debug!("Supervisor: ignoring {:?} before CONNACK", other),
                Ok(None) => {}
                Err(e) => {
                    self.set_link(LinkState::Disconnected);
                    return Err(Error::Transport(e));
                }
            }
        }
    }

    /// Poll until shutdown is triggered, then shut down cleanly.
    pub fn run(&mut self) {
        while !self.shutdown.is_triggered() {
            self.step();
        }
        self.shutdown();
    }

    /// One poll of the broker and the handling of whatever it returned.
    pub fn step(&mut self) {
        self.resubscribe_if_due();
        match self.broker.poll(self.poll_interval) {
            Ok(None) => {}
            Ok(Some(BrokerEvent::Connected)) => self.on_connected(),
            Ok(Some(BrokerEvent::Subscribed)) => self.on_subscribed(),
            Ok(Some(BrokerEvent::SubscribeRefused(reason))) => self.on_subscribe_refused(reason),
            Ok(Some(BrokerEvent::Message(raw))) => self.on_message(&raw),
            Err(e) => self.on_link_lost(&e),
        }
    }

    /// Flush persistence, publish the offline heartbeat, close the session.
    pub fn shutdown(&mut self) {
        if self.link == LinkState::Stopped {
            return;
        }
        self.events.emit(&AppEvent::ShuttingDown);

        if let Err(e) = self.sink.flush() {
            warn!("Supervisor: flushing counts failed: {}", e);
        }

        if self.link == LinkState::Connected {
            if let Some(topic) = &self.heartbeat_topic {
                if let Err(e) = self.broker.publish_retained(topic, HEARTBEAT_OFFLINE.as_bytes()) {
                    warn!("Supervisor: offline heartbeat not sent: {}", e);
                }
            }
        }
        if let Err(e) = self.broker.disconnect() {
            warn!("Supervisor: disconnect failed: {}", e);
        }

        self.set_link(LinkState::Stopped);
        self.status.update(|s| s.subscribed_topic = None);
        info!(
            "Supervisor: stopped ({} counts stored, {} queued, {} refused at intake)",
            self.service.counts_stored(),
            self.service.counts_queued(),
            self.service.counts_lost()
        );
    }

    // ── Event handlers ────────────────────────────────────────

    fn on_connected(&mut self) {
        let reconnected = self.ever_connected;
        self.ever_connected = true;
        self.backoff.reset();
        self.service.on_connect();
        self.set_link(LinkState::Connected);
        if reconnected {
            self.status.update(|s| s.reconnects += 1);
        }
        self.events.emit(&AppEvent::Connected {
            broker: self.broker.broker_address(),
        });

        self.subscribe_attempt = 0;
        self.subscribe_backoff.reset();
        self.resubscribe_at = None;
        self.request_subscription();

        if let Some(topic) = &self.heartbeat_topic {
            if let Err(e) = self.broker.publish_retained(topic, HEARTBEAT_ONLINE.as_bytes()) {
                warn!("Supervisor: online heartbeat not sent: {}", e);
            }
        }
    }

    fn request_subscription(&mut self) {
        if let Err(e) = self.broker.subscribe(&self.state_topic) {
            self.on_subscribe_refused(e.to_string());
        }
    }

    fn resubscribe_if_due(&mut self) {
        let Some(due) = self.resubscribe_at else { return };
        if self.link != LinkState::Connected {
            self.resubscribe_at = None;
            return;
        }
        if self.clock.now_ms() >= due {
            self.resubscribe_at = None;
            debug!("Supervisor: re-issuing subscription (attempt {})", self.subscribe_attempt + 1);
            self.request_subscription();
        }
    }

    fn on_subscribe_refused(&mut self, reason: String) {
        self.subscribe_attempt += 1;
        let retry_in = self.subscribe_backoff.next_delay();
        let retry_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX);
        self.resubscribe_at = Some(self.clock.now_ms().saturating_add(retry_ms));
        self.status.update(|s| s.subscribed_topic = None);
        self.events.emit(&AppEvent::SubscriptionRefused {
            topic: self.state_topic.clone(),
            reason,
            attempt: self.subscribe_attempt,
            retry_in,
        });
    }

    fn on_subscribed(&mut self) {
        self.subscribe_attempt = 0;
        self.subscribe_backoff.reset();
        let topic = self.state_topic.clone();
        self.status.update(|s| s.subscribed_topic = Some(topic.clone()));
        self.events.emit(&AppEvent::Subscribed { topic });
    }

    fn on_message(&mut self, raw: &RawMessage) {
        if raw.topic != self.state_topic {
            debug!("Supervisor: ignoring message on unexpected topic {}", raw.topic);
            return;
        }
        // Rejections are already reported through the event sink.
        let _ = self.service.handle_message(raw, &mut self.sink, &mut self.events);
        let state = self.service.last_state();
        self.status.update(|s| s.last_known_state = state);
    }

    fn on_link_lost(&mut self, error: &TransportError) {
        let attempt = match self.link {
            LinkState::Reconnecting { attempt } => attempt + 1,
            _ => 1,
        };
        let retry_in = self.backoff.next_delay();
        self.set_link(LinkState::Reconnecting { attempt });
        self.resubscribe_at = None;
        self.status.update(|s| s.subscribed_topic = None);
        self.events.emit(&AppEvent::ConnectionLost {
            reason: error.to_string(),
            attempt,
            retry_in,
        });
        self.shutdown.wait_timeout(retry_in);
    }

    fn set_link(&mut self, link: LinkState) {
        self.link = link;
        self.status.update(|s| {
            s.link = link;
            s.connected = link == LinkState::Connected;
        });
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
