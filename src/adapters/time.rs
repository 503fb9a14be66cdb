//! Clock adapters.
//!
//! Provides time queries for the listener.
//!
//! - [`MonotonicClock`] — `std::time::Instant` since construction; drives
//!   debounce and detection timestamps.
//! - [`wall_clock_ms`] — Unix milliseconds; used only by count stores to
//!   stamp the durable record.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::app::ports::Clock;

/// Monotonic millisecond clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Seconds since construction.
    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Server wall-clock time in Unix milliseconds.  Zero if the system clock
/// is set before 1970.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
