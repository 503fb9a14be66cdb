//! Runtime diagnostics and lost-count log.
//!
//! [`Diagnostics`] is an [`EventSink`] that tallies every application
//! event into [`RuntimeMetrics`] and keeps the last 8 lost counts in a ring
//! buffer.  Sensor noise (rejections, debounce, retained replays) and data
//! loss (persistence failures) are counted in separate fields.
//!
//! The handle is cheap to clone; the supervisor thread and the persistence
//! worker report into the same instance.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::app::events::AppEvent;
use crate::app::ports::{Ack, EventSink};
use crate::detector::admission::{Rejection, SensorId};

const LOST_RING_SLOTS: usize = 8;

/// One count that was detected but never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostCountEntry {
    pub sensor_id: SensorId,
    pub detected_at_ms: u64,
    pub reason: heapless::String<64>,
}

impl LostCountEntry {
    pub fn new(sensor_id: SensorId, detected_at_ms: u64, reason: &str) -> Self {
        let mut end = reason.len().min(64);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut r = heapless::String::new();
        let _ = r.push_str(&reason[..end]);
        Self {
            sensor_id,
            detected_at_ms,
            reason: r,
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeMetrics {
    pub messages_rejected: [u64; 4],
    pub baselines_seeded: u64,
    pub retained_dropped: u64,
    pub debounced: u64,
    pub repeated: u64,
    pub transitions: u64,
    pub passes_detected: u64,
    /// Counts handed to the persistence queue (final outcome reported later).
    pub counts_queued: u64,
    /// Counts a store acknowledged as written.
    pub counts_recorded: u64,
    pub counts_lost: u64,
    pub connects: u64,
    pub connection_losses: u64,
    pub subscriptions_refused: u64,
}

impl RuntimeMetrics {
    pub fn rejected(&self, reason: Rejection) -> u64 {
        self.messages_rejected[reason.index()]
    }

    pub fn messages_rejected_total(&self) -> u64 {
        self.messages_rejected.iter().sum()
    }

    /// Every message that reached the service, admitted or not.
    pub fn messages_received(&self) -> u64 {
        self.messages_rejected_total()
            + self.baselines_seeded
            + self.retained_dropped
            + self.debounced
            + self.repeated
            + self.transitions
            + self.passes_detected
    }
}

#[derive(Default)]
struct Inner {
    metrics: RuntimeMetrics,
    lost: heapless::Deque<LostCountEntry, LOST_RING_SLOTS>,
}

/// Shared diagnostics handle.
#[derive(Clone, Default)]
pub struct Diagnostics {
    inner: Arc<Mutex<Inner>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> RuntimeMetrics {
        self.lock().metrics.clone()
    }

    /// Lost counts, oldest first (at most 8).
    pub fn lost_counts(&self) -> Vec<LostCountEntry> {
        self.lock().lost.iter().cloned().collect()
    }

    /// Erase the lost-count ring (counters are kept).
    pub fn clear_lost(&self) {
        self.lock().lost.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another reporter panicked mid-update;
        // the counters are still usable.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EventSink for Diagnostics {
    fn emit(&mut self, event: &AppEvent) {
        let mut guard = self.lock();
        let Inner { metrics: m, lost } = &mut *guard;
        match event {
            AppEvent::MessageRejected { reason, .. } => m.messages_rejected[reason.index()] += 1,
            AppEvent::BaselineSeeded { .. } => m.baselines_seeded += 1,
            AppEvent::RetainedDropped { .. } => m.retained_dropped += 1,
            AppEvent::Debounced { .. } => m.debounced += 1,
            AppEvent::StateRepeated { .. } => m.repeated += 1,
            AppEvent::StateChanged { .. } => m.transitions += 1,
            AppEvent::PassDetected { .. } => m.passes_detected += 1,
            AppEvent::CountRecorded { ack: Ack::Queued, .. } => m.counts_queued += 1,
            AppEvent::CountRecorded { ack: Ack::Stored { .. }, .. } => m.counts_recorded += 1,
            AppEvent::CountLost { event, error } => {
                m.counts_lost += 1;
                let entry = LostCountEntry::new(event.sensor_id.clone(), event.detected_at_ms, &error.to_string());
                if lost.is_full() {
                    lost.pop_front();
                }
                let _ = lost.push_back(entry);
            }
            AppEvent::Connected { .. } => m.connects += 1,
            AppEvent::ConnectionLost { .. } => m.connection_losses += 1,
            AppEvent::SubscriptionRefused { .. } => m.subscriptions_refused += 1,
            AppEvent::Subscribed { .. } | AppEvent::ShuttingDown => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Panic hook — logs the reason before the default handler runs
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that routes the panic reason through `log`.
///
/// Must be called once during init, after the logger is installed.
pub fn install_panic_handler() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line()));
        log::error!("PANIC: {} at {}", reason, location.as_deref().unwrap_or("<unknown>"));
        default_hook(info);
    }));
}
