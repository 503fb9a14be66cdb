//! Message admission: raw broker payload → [`SensorReading`].
//!
//! Accepted wire shape (one JSON object per message):
//!
//! ```text
//! {"state": "interrompida", "id": "ESP32_Barrier_001", "timestamp_ms": 1712345678901}
//! ```
//!
//! `id`, `timestamp` and `timestamp_ms` are optional.  Anything that is not
//! an object carrying a recognised `state` string is rejected before a
//! reading exists, and a rejection never touches detector state.

use core::fmt;

use serde_json::Value;

use super::normalize::{CanonicalState, StateNormalizer};

/// Maximum sensor identifier length in bytes.
pub const SENSOR_ID_CAP: usize = 64;

/// Fixed-capacity sensor identifier.
pub type SensorId = heapless::String<SENSOR_ID_CAP>;

/// Identifier used when a payload carries no usable `id`.
pub const DEFAULT_SENSOR_ID: &str = "ESP32_Barrier_001";

/// Build a [`SensorId`], truncating on a char boundary if `raw` is too long.
pub fn sensor_id(raw: &str) -> SensorId {
    let mut end = raw.len().min(SENSOR_ID_CAP);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    let mut id = SensorId::new();
    // Cannot fail: `end` is within capacity.
    let _ = id.push_str(&raw[..end]);
    id
}

/// One message as delivered by the transport.  Consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Broker flagged this as a retained (replayed) value.
    pub retained: bool,
    /// Monotonic receive time in milliseconds.
    pub arrival_ms: u64,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool, arrival_ms: u64) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained,
            arrival_ms,
        }
    }
}

/// A validated sensor message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    /// The `state` string exactly as published.
    pub raw_state: String,
    /// Always `Interrupted` or `Clear`; `Unknown` is rejected at admission.
    pub state: CanonicalState,
    /// Producer clock, advisory only.
    pub timestamp_hint: Option<i64>,
    pub received_at_ms: u64,
}

/// Why a message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    EmptyPayload,
    MalformedJson,
    NotAnObject,
    MissingOrInvalidState,
}

impl Rejection {
    pub const ALL: [Self; 4] = [
        Self::EmptyPayload,
        Self::MalformedJson,
        Self::NotAnObject,
        Self::MissingOrInvalidState,
    ];

    pub const fn index(self) -> usize {
        match self {
            Self::EmptyPayload => 0,
            Self::MalformedJson => 1,
            Self::NotAnObject => 2,
            Self::MissingOrInvalidState => 3,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPayload => write!(f, "empty payload"),
            Self::MalformedJson => write!(f, "malformed JSON"),
            Self::NotAnObject => write!(f, "JSON is not an object"),
            Self::MissingOrInvalidState => write!(f, "missing or invalid 'state' field"),
        }
    }
}

/// Validate `raw` and turn it into a [`SensorReading`].
pub fn admit(
    raw: &RawMessage,
    normalizer: &StateNormalizer,
    default_sensor_id: &str,
) -> Result<SensorReading, Rejection> {
    if raw.payload.is_empty() {
        return Err(Rejection::EmptyPayload);
    }
    let text = String::from_utf8_lossy(&raw.payload);
    let value: Value = serde_json::from_str(&text).map_err(|_| Rejection::MalformedJson)?;
    let Value::Object(fields) = value else {
        return Err(Rejection::NotAnObject);
    };

    let raw_state = fields.get("state").and_then(Value::as_str);
    let state = normalizer.normalize(raw_state);
    let Some(raw_state) = raw_state.filter(|_| state.is_known()) else {
        return Err(Rejection::MissingOrInvalidState);
    };

    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_sensor_id);

    let timestamp_hint = ["timestamp_ms", "timestamp"]
        .iter()
        .filter_map(|key| fields.get(*key))
        .find_map(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));

    Ok(SensorReading {
        sensor_id: sensor_id(id.trim()),
        raw_state: raw_state.to_owned(),
        state,
        timestamp_hint,
        received_at_ms: raw.arrival_ms,
    })
}
