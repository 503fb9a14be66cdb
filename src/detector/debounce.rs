//! Time-based debounce gate.
//!
//! Light barriers chatter when an object edge sits on the beam.  A state
//! change that lands within `min_interval_ms` of the last accepted
//! transition is treated as chatter: the caller still records the new
//! state as the assumed current state, but edge detection is skipped.
//!
//! ```text
//!   accepted          rejected   rejected    accepted
//!      │                 │          │           │
//!  ────●─────────────────●──────────●───────────●────▶ t
//!      │◀──── min_interval ────▶│
//! ```

/// Default minimum dwell time between scored transitions.
pub const DEFAULT_DEBOUNCE_MS: u32 = 100;

/// `true` if a message arriving at `now_ms` may be scored as a transition.
///
/// `last_transition_ms == None` means no transition has been scored yet.
/// A zero interval disables debouncing.
pub fn admit_by_timing(now_ms: u64, last_transition_ms: Option<u64>, min_interval_ms: u32) -> bool {
    match last_transition_ms {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= u64::from(min_interval_ms),
    }
}

/// Debounce gate bound to a configured interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceGate {
    min_interval_ms: u32,
}

impl Default for DebounceGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}

impl DebounceGate {
    pub fn new(min_interval_ms: u32) -> Self {
        Self { min_interval_ms }
    }

    pub fn min_interval_ms(&self) -> u32 {
        self.min_interval_ms
    }

    pub fn admit(&self, now_ms: u64, last_transition_ms: Option<u64>) -> bool {
        admit_by_timing(now_ms, last_transition_ms, self.min_interval_ms)
    }
}
