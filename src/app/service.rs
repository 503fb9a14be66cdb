//! Counter service — the hexagonal core.
//!
//! [`CounterService`] owns the detector state for one sensor topic and runs
//! each broker message through the full pipeline:
//!
//! ```text
//!  RawMessage ──▶ ┌──────────────────────────────────┐ ──▶ CountSink
//!                 │          CounterService          │
//!                 │ admit · retained · debounce · edge│ ──▶ EventSink
//!                 └──────────────────────────────────┘
//! ```
//!
//! Messages are handled one at a time, in delivery order, by whoever owns
//! the service (the supervisor thread).  A persistence failure never rolls
//! the detector back: detection is decoupled from durability.

use crate::config::ListenerConfig;
use crate::detector::admission::{self, RawMessage, Rejection};
use crate::detector::debounce::DebounceGate;
use crate::detector::normalize::{CanonicalState, StateNormalizer};
use crate::detector::{DetectorState, Outcome, TransitionDetector};

use super::events::AppEvent;
use super::ports::{Ack, CountSink, EventSink};

// ───────────────────────────────────────────────────────────────
// CounterService
// ───────────────────────────────────────────────────────────────

pub struct CounterService {
    detector: TransitionDetector,
    normalizer: StateNormalizer,
    default_sensor_id: String,
    counts_stored: u64,
    counts_queued: u64,
    counts_lost: u64,
}

impl CounterService {
    pub fn new(config: &ListenerConfig) -> Self {
        Self::with_parts(
            StateNormalizer::new(&config.tokens),
            DebounceGate::new(config.debounce_ms),
            &config.default_sensor_id,
        )
    }

    pub fn with_parts(normalizer: StateNormalizer, debounce: DebounceGate, default_sensor_id: &str) -> Self {
        Self {
            detector: TransitionDetector::new(debounce),
            normalizer,
            default_sensor_id: default_sensor_id.to_owned(),
            counts_stored: 0,
            counts_queued: 0,
            counts_lost: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Broker session (re)established.  Keeps detector state, re-arms the
    /// retained-baseline slot.
    pub fn on_connect(&mut self) {
        self.detector.on_connect();
    }

    // ── Per-message pipeline ──────────────────────────────────

    /// Process one message end to end.
    ///
    /// Returns the detector outcome, or the admission rejection.  Sink
    /// failures are reported through `events`, not returned: the outcome
    /// is still `Counted` because the edge was detected.
    pub fn handle_message(
        &mut self,
        raw: &RawMessage,
        sink: &mut impl CountSink,
        events: &mut impl EventSink,
    ) -> Result<Outcome, Rejection> {
        let reading = match admission::admit(raw, &self.normalizer, &self.default_sensor_id) {
            Ok(reading) => reading,
            Err(reason) => {
                events.emit(&AppEvent::MessageRejected {
                    topic: raw.topic.clone(),
                    reason,
                });
                return Err(reason);
            }
        };

        let outcome = self.detector.observe(&reading, raw.retained);
        let sensor_id = reading.sensor_id;

        match &outcome {
            Outcome::Seeded { state } => events.emit(&AppEvent::BaselineSeeded {
                sensor_id,
                state: *state,
            }),
            Outcome::RetainedDropped { state } => events.emit(&AppEvent::RetainedDropped {
                sensor_id,
                state: *state,
            }),
            Outcome::Debounced { from, assumed } => events.emit(&AppEvent::Debounced {
                sensor_id,
                from: *from,
                assumed: *assumed,
            }),
            Outcome::Unchanged { state } => events.emit(&AppEvent::StateRepeated {
                sensor_id,
                state: *state,
            }),
            Outcome::Updated { from, to } => events.emit(&AppEvent::StateChanged {
                sensor_id,
                from: *from,
                to: *to,
            }),
            Outcome::Counted(event) => {
                events.emit(&AppEvent::PassDetected { event: event.clone() });
                match sink.record_count(event) {
                    Ok(ack) => {
                        match ack {
                            Ack::Stored { .. } => self.counts_stored += 1,
                            Ack::Queued => self.counts_queued += 1,
                        }
                        events.emit(&AppEvent::CountRecorded {
                            event: event.clone(),
                            ack,
                        });
                    }
                    Err(e) => {
                        self.counts_lost += 1;
                        events.emit(&AppEvent::CountLost {
                            event: event.clone(),
                            error: e,
                        });
                    }
                }
            }
        }

        Ok(outcome)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn last_state(&self) -> CanonicalState {
        self.detector.last_state()
    }

    pub fn detector_state(&self) -> &DetectorState {
        self.detector.state()
    }

    /// Counts the sink acknowledged as written since startup.
    pub fn counts_stored(&self) -> u64 {
        self.counts_stored
    }

    /// Counts handed to a persistence queue.  Their final outcome is
    /// reported by the queue's writer, not seen here.
    pub fn counts_queued(&self) -> u64 {
        self.counts_queued
    }

    /// Counts the sink refused at intake since startup.
    pub fn counts_lost(&self) -> u64 {
        self.counts_lost
    }
}
