//! Fuzz target: message admission
//!
//! Feeds arbitrary payload bytes through `admit` and checks that every
//! accepted reading carries a known state and an in-capacity sensor id.
//!
//! cargo fuzz run fuzz_admission

#![no_main]

use beamcount::detector::admission::{DEFAULT_SENSOR_ID, RawMessage, SENSOR_ID_CAP, admit};
use beamcount::detector::normalize::StateNormalizer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let normalizer = StateNormalizer::default();
    let raw = RawMessage::new("sensores/barreira/estado", data, false, 0);

    if let Ok(reading) = admit(&raw, &normalizer, DEFAULT_SENSOR_ID) {
        assert!(reading.state.is_known(), "admitted reading must have a known state");
        assert!(reading.sensor_id.len() <= SENSOR_ID_CAP);
        assert!(!reading.sensor_id.trim().is_empty(), "sensor id must never be blank");
    }
});
