//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ CounterService / ConnectionSupervisor
//! ```
//!
//! Driven adapters (broker session, count store, event sinks, clock)
//! implement these traits.  The domain consumes them via generics, so the
//! detector never touches the network or the filesystem directly.

use core::fmt;
use std::time::Duration;

use crate::detector::CountEvent;
use crate::detector::admission::RawMessage;

// ───────────────────────────────────────────────────────────────
// Count sink port (domain → durable storage)
// ───────────────────────────────────────────────────────────────

/// Acknowledgement from a [`CountSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Persisted; `seq` is the store-assigned sequence number.
    Stored { seq: u64 },
    /// Handed to the ordered persistence queue.
    Queued,
}

/// Append-only persistence of detected passes.
///
/// Called synchronously from the message path, once per detected edge.
/// The store assigns the durable timestamp; callers never retry.
pub trait CountSink {
    fn record_count(&mut self, event: &CountEvent) -> Result<Ack, PersistenceError>;

    /// Make everything accepted so far durable.  Called once at shutdown.
    fn flush(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

impl<T: CountSink + ?Sized> CountSink for Box<T> {
    fn record_count(&mut self, event: &CountEvent) -> Result<Ack, PersistenceError> {
        (**self).record_count(event)
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        (**self).flush()
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (log, metrics, ...).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &super::events::AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Broker port (transport ↔ supervisor)
// ───────────────────────────────────────────────────────────────

/// Notifications surfaced by [`BrokerPort::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Session (re)established; the broker acknowledged the connect.
    Connected,
    /// A publish arrived on a subscribed topic.
    Message(RawMessage),
    /// Broker confirmed a subscription.
    Subscribed,
    /// Broker answered the subscription with a failure code.  The session
    /// itself is still up.
    SubscribeRefused(String),
}

/// One publish/subscribe session.
///
/// `poll` drives the session: it blocks for at most `timeout` and returns
/// `Ok(None)` when nothing happened.  An `Err` means the session dropped
/// (or never came up); the next `poll` attempts to reconnect.
pub trait BrokerPort {
    fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerEvent>, TransportError>;

    /// Subscribe to `topic` at QoS "at least once".
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Publish a retained message (heartbeat).
    fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Close the session cleanly (no last will is published).
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// `host:port` of the broker, for status reporting.
    fn broker_address(&self) -> String;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time source in milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`CountSink`] operations.  Each one is a lost count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Backing store unreachable or not opened.
    Unavailable,
    /// Write failed; carries the underlying message.
    WriteFailed(String),
    /// Persistence queue is closed (shutdown in progress).
    QueueClosed,
}

/// Errors from [`BrokerPort`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// TCP/MQTT connect was refused or timed out.
    ConnectFailed(String),
    /// An established session dropped.
    Disconnected(String),
    /// Broker rejected or we failed to queue a subscribe.
    SubscribeFailed(String),
    /// Failed to queue a publish.
    PublishFailed(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "count store unavailable"),
            Self::WriteFailed(msg) => write!(f, "write failed: {}", msg),
            Self::QueueClosed => write!(f, "persistence queue closed"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            Self::Disconnected(msg) => write!(f, "disconnected: {}", msg),
            Self::SubscribeFailed(msg) => write!(f, "subscribe failed: {}", msg),
            Self::PublishFailed(msg) => write!(f, "publish failed: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {}
impl std::error::Error for TransportError {}
