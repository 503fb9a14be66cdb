//! Outbound application events.
//!
//! The [`CounterService`](super::service::CounterService) and the
//! [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor) emit
//! these through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them: log lines,
//! diagnostics counters, etc.
//!
//! Every admitted or rejected message produces exactly one of the first
//! seven variants.  `CountRecorded` / `CountLost` report the sink outcome
//! of a `PassDetected`; with a queued sink they may arrive later, from the
//! writer thread.

use std::time::Duration;

use crate::detector::CountEvent;
use crate::detector::admission::{Rejection, SensorId};
use crate::detector::normalize::CanonicalState;

use super::ports::{Ack, PersistenceError};

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A message failed admission and was dropped.
    MessageRejected { topic: String, reason: Rejection },

    /// Retained message adopted as baseline.
    BaselineSeeded { sensor_id: SensorId, state: CanonicalState },

    /// Retained replay ignored.
    RetainedDropped { sensor_id: SensorId, state: CanonicalState },

    /// State change inside the debounce window; not scored.
    Debounced {
        sensor_id: SensorId,
        from: CanonicalState,
        assumed: CanonicalState,
    },

    /// Live message repeating the current state.
    StateRepeated { sensor_id: SensorId, state: CanonicalState },

    /// Scored, non-countable transition.
    StateChanged {
        sensor_id: SensorId,
        from: CanonicalState,
        to: CanonicalState,
    },

    /// `Interrupted → Clear`.  One per detected pass, before the sink call.
    PassDetected { event: CountEvent },

    /// The count sink accepted a pass.
    CountRecorded { event: CountEvent, ack: Ack },

    /// A pass was detected but persistence failed.  Data loss.
    CountLost { event: CountEvent, error: PersistenceError },

    /// Broker session established.
    Connected { broker: String },

    /// Broker acknowledged the state topic subscription.
    Subscribed { topic: String },

    /// Subscription refused on a live session; re-issued after `retry_in`.
    SubscriptionRefused {
        topic: String,
        reason: String,
        attempt: u32,
        retry_in: Duration,
    },

    /// Session dropped or could not be re-established.
    ConnectionLost {
        reason: String,
        attempt: u32,
        retry_in: Duration,
    },

    /// Shutdown requested; no further messages will be processed.
    ShuttingDown,
}
