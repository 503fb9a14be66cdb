//! Retained-message guard.
//!
//! On subscribe the broker replays the last retained value so a late
//! joiner learns the current beam state.  That replay is a baseline, not
//! a live edge:
//!
//! | retained | first admitted since connect | baseline | verdict |
//! |----------|------------------------------|----------|---------|
//! | no       | any                          | any      | `Live`  |
//! | yes      | yes                          | any      | `Seed`  |
//! | yes      | no                           | no       | `Seed`  |
//! | yes      | no                           | yes      | `Drop`  |

/// What the detector should do with an admitted reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainedVerdict {
    /// Run debounce and edge detection.
    Live,
    /// Adopt the state as baseline; no edge detection, no timing update.
    Seed,
    /// Broker replay after the baseline is known; ignore entirely.
    Drop,
}

/// Pure decision function.
pub fn admit_retained(retained: bool, first_since_connect: bool, baseline_established: bool) -> RetainedVerdict {
    if !retained {
        RetainedVerdict::Live
    } else if first_since_connect || !baseline_established {
        RetainedVerdict::Seed
    } else {
        RetainedVerdict::Drop
    }
}

/// Tracks the "first message since (re)connect" slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetainedGuard {
    awaiting_first: bool,
}

impl Default for RetainedGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RetainedGuard {
    pub fn new() -> Self {
        Self { awaiting_first: true }
    }

    /// Re-arm after a (re)connect.
    pub fn on_connect(&mut self) {
        self.awaiting_first = true;
    }

    pub fn awaiting_first(&self) -> bool {
        self.awaiting_first
    }

    /// Classify an admitted reading and consume the first-message slot.
    pub fn classify(&mut self, retained: bool, baseline_established: bool) -> RetainedVerdict {
        let verdict = admit_retained(retained, self.awaiting_first, baseline_established);
        self.awaiting_first = false;
        verdict
    }
}
