//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events
//! through the `log` facade.  Input noise goes out at `debug`, lost counts
//! at `error`, so the two never blend together in production logs.

use log::{debug, error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{Ack, EventSink};

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::MessageRejected { topic, reason } => {
                debug!("REJECT | topic={} | reason={}", topic, reason);
            }
            AppEvent::BaselineSeeded { sensor_id, state } => {
                info!("BASELINE | sensor={} | state={} (retained)", sensor_id, state);
            }
            AppEvent::RetainedDropped { sensor_id, state } => {
                debug!("REPLAY | sensor={} | state={} dropped", sensor_id, state);
            }
            AppEvent::Debounced { sensor_id, from, assumed } => {
                debug!("DEBOUNCE | sensor={} | {} -> {} not scored", sensor_id, from, assumed);
            }
            AppEvent::StateRepeated { sensor_id, state } => {
                debug!("REPEAT | sensor={} | state={}", sensor_id, state);
            }
            AppEvent::StateChanged { sensor_id, from, to } => {
                debug!("STATE | sensor={} | {} -> {}", sensor_id, from, to);
            }
            AppEvent::PassDetected { event } => {
                info!("PASS | sensor={} | interrupted -> clear at {}ms", event.sensor_id, event.detected_at_ms);
            }
            AppEvent::CountRecorded { event, ack } => match ack {
                Ack::Stored { seq } => {
                    info!("COUNT | sensor={} | stored seq={}", event.sensor_id, seq);
                }
                Ack::Queued => {
                    info!("COUNT | sensor={} | queued", event.sensor_id);
                }
            },
            AppEvent::CountLost { event, error: e } => {
                error!(
                    "COUNT LOST | sensor={} | detected_at={}ms | {}",
                    event.sensor_id, event.detected_at_ms, e
                );
            }
            AppEvent::Connected { broker } => {
                info!("LINK | connected to {}", broker);
            }
            AppEvent::Subscribed { topic } => {
                info!("LINK | subscribed to {} (QoS 1)", topic);
            }
            AppEvent::SubscriptionRefused {
                topic,
                reason,
                attempt,
                retry_in,
            } => {
                warn!(
                    "LINK | subscription to {} refused ({}) | attempt={} | retry in {}ms",
                    topic,
                    reason,
                    attempt,
                    retry_in.as_millis()
                );
            }
            AppEvent::ConnectionLost {
                reason,
                attempt,
                retry_in,
            } => {
                warn!(
                    "LINK | lost ({}) | attempt={} | retry in {}ms",
                    reason,
                    attempt,
                    retry_in.as_millis()
                );
            }
            AppEvent::ShuttingDown => {
                info!("LINK | shutting down");
            }
        }
    }
}
