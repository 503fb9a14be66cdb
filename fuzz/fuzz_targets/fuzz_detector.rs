//! Fuzz target: `CounterService::handle_message`
//!
//! Interprets the input as a stream of (flags, gap, payload-length,
//! payload) records and drives the full message pipeline, asserting the
//! counting invariant on every step.
//!
//! cargo fuzz run fuzz_detector

#![no_main]

use beamcount::adapters::count_store::MemoryCountStore;
use beamcount::app::events::AppEvent;
use beamcount::app::ports::EventSink;
use beamcount::app::service::CounterService;
use beamcount::config::ListenerConfig;
use beamcount::detector::admission::RawMessage;
use beamcount::detector::normalize::CanonicalState;
use libfuzzer_sys::fuzz_target;

struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: &AppEvent) {}
}

fuzz_target!(|data: &[u8]| {
    let mut svc = CounterService::new(&ListenerConfig::default());
    let mut store = MemoryCountStore::new();
    let mut now = 0u64;
    let mut rest = data;

    while let [flags, gap, len, tail @ ..] = rest {
        let len = usize::from(*len).min(tail.len());
        let (payload, next) = tail.split_at(len);
        rest = next;
        now += u64::from(*gap) * 4;

        if flags & 0x80 != 0 {
            svc.on_connect();
        }
        let raw = RawMessage::new("sensores/barreira/estado", payload, flags & 1 != 0, now);
        let before = svc.last_state();
        let recorded = store.len();

        if let Ok(outcome) = svc.handle_message(&raw, &mut store, &mut Discard) {
            if outcome.count_event().is_some() {
                assert_eq!(before, CanonicalState::Interrupted);
                assert_eq!(svc.last_state(), CanonicalState::Clear);
                assert!(!raw.retained);
                assert_eq!(store.len(), recorded + 1);
            }
        } else {
            assert_eq!(svc.last_state(), before, "rejections never touch state");
        }
    }
});
