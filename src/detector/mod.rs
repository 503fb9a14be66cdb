//! Barrier state transition detector.
//!
//! Every admitted reading flows through three gates before it can become
//! a count:
//!
//! ```text
//!  SensorReading ──▶ RetainedGuard ──▶ DebounceGate ──▶ edge check ──▶ CountEvent
//!                        │ Seed/Drop        │ Debounced     │ Updated/Unchanged
//!                        ▼                  ▼               ▼
//!                   (baseline only)   (assumed state)  (silent update)
//! ```
//!
//! Only the edge `Interrupted → Clear` is countable.  `Clear → Interrupted`
//! is a silent update and self-transitions change nothing at all, which
//! makes a replayed live message idempotent.
//!
//! A detector instance belongs to exactly one sensor topic and is driven
//! from a single thread; it is never shared.

pub mod admission;
pub mod debounce;
pub mod normalize;
pub mod retained;

use log::debug;

use admission::{SensorId, SensorReading};
use debounce::DebounceGate;
use normalize::CanonicalState;
use retained::{RetainedGuard, RetainedVerdict};

/// Mutable detector bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectorState {
    /// Last canonical state adopted.  Never set to `Unknown` after start.
    pub last_state: CanonicalState,
    /// Monotonic time of the last scored transition; `None` until the first.
    pub last_transition_at: Option<u64>,
    /// A first state (retained seed or live) has been adopted.
    pub baseline_established: bool,
}

/// One detected pass.  Built exactly once per accepted edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountEvent {
    pub sensor_id: SensorId,
    /// Monotonic detection time in milliseconds.  The sink assigns the
    /// durable wall-clock timestamp.
    pub detected_at_ms: u64,
}

/// Result of feeding one reading to the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Retained baseline adopted without edge detection.
    Seeded { state: CanonicalState },
    /// Retained replay after the baseline was known.
    RetainedDropped { state: CanonicalState },
    /// Arrived inside the debounce window; state assumed, not scored.
    Debounced { from: CanonicalState, assumed: CanonicalState },
    /// Same state as before (replay or steady reporting).
    Unchanged { state: CanonicalState },
    /// Scored transition that is not countable.
    Updated { from: CanonicalState, to: CanonicalState },
    /// `Interrupted → Clear`.
    Counted(CountEvent),
}

impl Outcome {
    pub fn count_event(&self) -> Option<&CountEvent> {
        match self {
            Self::Counted(event) => Some(event),
            _ => None,
        }
    }
}

/// The per-topic transition state machine.
#[derive(Debug, Clone)]
pub struct TransitionDetector {
    state: DetectorState,
    guard: RetainedGuard,
    debounce: DebounceGate,
}

impl Default for TransitionDetector {
    fn default() -> Self {
        Self::new(DebounceGate::default())
    }
}

impl TransitionDetector {
    pub fn new(debounce: DebounceGate) -> Self {
        Self {
            state: DetectorState::default(),
            guard: RetainedGuard::new(),
            debounce,
        }
    }

    /// Current bookkeeping (read-only).
    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn last_state(&self) -> CanonicalState {
        self.state.last_state
    }

    /// A broker session was (re)established.  Detector state is kept; only
    /// the retained-seed slot is re-armed.
    pub fn on_connect(&mut self) {
        self.guard.on_connect();
    }

    /// Feed one admitted reading.
    pub fn observe(&mut self, reading: &SensorReading, retained: bool) -> Outcome {
        let to = reading.state;
        debug_assert!(to.is_known(), "admission must reject Unknown states");

        match self.guard.classify(retained, self.state.baseline_established) {
            RetainedVerdict::Seed => {
                self.state.last_state = to;
                self.state.baseline_established = true;
                debug!("detector: baseline seeded from retained message ({})", to);
                return Outcome::Seeded { state: to };
            }
            RetainedVerdict::Drop => return Outcome::RetainedDropped { state: to },
            RetainedVerdict::Live => {}
        }

        let from = self.state.last_state;
        self.state.baseline_established = true;

        if from == to {
            return Outcome::Unchanged { state: to };
        }

        let now = reading.received_at_ms;
        if !self.debounce.admit(now, self.state.last_transition_at) {
            self.state.last_state = to;
            return Outcome::Debounced { from, assumed: to };
        }

        self.state.last_state = to;
        self.state.last_transition_at = Some(self.state.last_transition_at.map_or(now, |t| t.max(now)));

        if from == CanonicalState::Interrupted && to == CanonicalState::Clear {
            Outcome::Counted(CountEvent {
                sensor_id: reading.sensor_id.clone(),
                detected_at_ms: now,
            })
        } else {
            Outcome::Updated { from, to }
        }
    }
}
