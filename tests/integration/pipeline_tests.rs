//! Integration tests for the message → detector → count sink pipeline.
//!
//! Drive `CounterService` with raw broker messages exactly as the
//! supervisor would and check what reaches the sink and the event stream.

use beamcount::app::events::AppEvent;
use beamcount::app::service::CounterService;
use beamcount::config::ListenerConfig;
use beamcount::detector::Outcome;
use beamcount::detector::admission::Rejection;
use beamcount::detector::normalize::CanonicalState;
use beamcount::diagnostics::Diagnostics;

use super::mock_ports::{MockCountSink, RecordingEvents, message, state};

fn service() -> CounterService {
    CounterService::new(&ListenerConfig::default())
}

// ── Scenario: retained baseline, then a full pass ─────────────

#[test]
fn retained_clear_then_pass_counts_once() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    let outcomes: Vec<Outcome> = [
        message(&state("livre"), true, 0),
        message(&state("interrompida"), false, 500),
        message(&state("livre"), false, 900),
    ]
    .iter()
    .map(|m| svc.handle_message(m, &mut sink, &mut events).unwrap())
    .collect();

    assert_eq!(outcomes[0], Outcome::Seeded {
        state: CanonicalState::Clear
    });
    assert!(outcomes[1].count_event().is_none());
    assert!(outcomes[2].count_event().is_some());
    assert_eq!(sink.stored.len(), 1);
    assert_eq!(sink.stored[0].sensor_id.as_str(), "ESP32_Barrier_001");
    assert_eq!(svc.last_state(), CanonicalState::Clear);
}

// ── Scenario: malformed first message ─────────────────────────

#[test]
fn malformed_then_clear_sets_baseline_silently() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    let first = svc.handle_message(&message("not json", false, 0), &mut sink, &mut events);
    assert_eq!(first, Err(Rejection::MalformedJson));
    assert!(!svc.detector_state().baseline_established);

    let second = svc
        .handle_message(&message(&state("livre"), false, 10), &mut sink, &mut events)
        .unwrap();
    assert_eq!(second, Outcome::Updated {
        from: CanonicalState::Unknown,
        to: CanonicalState::Clear
    });
    assert_eq!(sink.attempts, 0);
    assert_eq!(events.rejected(), 1);
}

#[test]
fn rejection_reasons_reach_diagnostics() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut diag = Diagnostics::new();

    for payload in ["", "{", "[1,2]", r#"{"state":"maybe"}"#, r#"{"id":"x"}"#] {
        let _ = svc.handle_message(&message(payload, false, 0), &mut sink, &mut diag);
    }

    let m = diag.metrics();
    assert_eq!(m.rejected(Rejection::EmptyPayload), 1);
    assert_eq!(m.rejected(Rejection::MalformedJson), 1);
    assert_eq!(m.rejected(Rejection::NotAnObject), 1);
    assert_eq!(m.rejected(Rejection::MissingOrInvalidState), 2);
    assert_eq!(m.messages_received(), 5);
    assert_eq!(svc.last_state(), CanonicalState::Unknown);
}

// ── Persistence failure: no rollback, loud report ─────────────

#[test]
fn persistence_failure_keeps_detector_advanced() {
    let mut svc = service();
    let mut sink = MockCountSink::failing();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(&state("interrompida"), false, 1_000), &mut sink, &mut events)
        .unwrap();
    let out = svc
        .handle_message(&message(&state("livre"), false, 1_300), &mut sink, &mut events)
        .unwrap();

    assert!(out.count_event().is_some(), "edge is still detected");
    assert_eq!(sink.attempts, 1, "exactly one attempt, no retry");
    assert_eq!(svc.last_state(), CanonicalState::Clear);
    assert_eq!(svc.detector_state().last_transition_at, Some(1_300));
    assert_eq!(events.lost(), 1);
    assert_eq!(svc.counts_lost(), 1);

    // Clear replay after the failure must not re-trigger the lost count.
    svc.handle_message(&message(&state("livre"), false, 2_000), &mut sink, &mut events)
        .unwrap();
    assert_eq!(sink.attempts, 1);
}

#[test]
fn lost_count_is_kept_apart_from_noise() {
    let mut svc = service();
    let mut sink = MockCountSink::failing();
    let diag = Diagnostics::new();
    let mut events = (diag.clone(), RecordingEvents::new());

    svc.handle_message(&message("garbage", false, 0), &mut sink, &mut events)
        .unwrap_err();
    svc.handle_message(&message(&state("interrompida"), false, 100), &mut sink, &mut events)
        .unwrap();
    svc.handle_message(&message(&state("livre"), false, 400), &mut sink, &mut events)
        .unwrap();

    let m = diag.metrics();
    assert_eq!(m.messages_rejected_total(), 1);
    assert_eq!(m.passes_detected, 1);
    assert_eq!(m.counts_lost, 1);
    assert_eq!(m.counts_recorded, 0);
    let lost = diag.lost_counts();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].detected_at_ms, 400);
    assert!(lost[0].reason.contains("disk full"));
}

// ── Replay idempotence ────────────────────────────────────────

#[test]
fn replayed_clear_is_idempotent() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(&state("interrompida"), false, 0), &mut sink, &mut events)
        .unwrap();
    let clear = message(&state("livre"), false, 300);
    svc.handle_message(&clear, &mut sink, &mut events).unwrap();
    let before = *svc.detector_state();

    let replay = svc.handle_message(&clear, &mut sink, &mut events).unwrap();
    assert_eq!(replay, Outcome::Unchanged {
        state: CanonicalState::Clear
    });
    assert_eq!(*svc.detector_state(), before);
    assert_eq!(sink.stored.len(), 1);
}

// ── Debounce ──────────────────────────────────────────────────

#[test]
fn clear_inside_window_is_not_counted() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(&state("interrompida"), false, 1_000), &mut sink, &mut events)
        .unwrap();
    let out = svc
        .handle_message(&message(&state("livre"), false, 1_099), &mut sink, &mut events)
        .unwrap();

    assert_eq!(out, Outcome::Debounced {
        from: CanonicalState::Interrupted,
        assumed: CanonicalState::Clear
    });
    assert!(sink.stored.is_empty());
    assert!(events
        .events
        .iter()
        .any(|e| matches!(e, AppEvent::Debounced { .. })));
}

#[test]
fn clear_exactly_at_window_edge_counts() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(&state("interrompida"), false, 1_000), &mut sink, &mut events)
        .unwrap();
    svc.handle_message(&message(&state("livre"), false, 1_100), &mut sink, &mut events)
        .unwrap();
    assert_eq!(sink.stored.len(), 1);
}

#[test]
fn zero_debounce_counts_every_edge() {
    let config = ListenerConfig {
        debounce_ms: 0,
        ..ListenerConfig::default()
    };
    let mut svc = CounterService::new(&config);
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    for (i, token) in ["interrompida", "livre", "interrompida", "livre"].iter().enumerate() {
        svc.handle_message(&message(&state(token), false, i as u64), &mut sink, &mut events)
            .unwrap();
    }
    assert_eq!(sink.stored.len(), 2);
}

// ── Retained handling ─────────────────────────────────────────

#[test]
fn later_retained_with_other_state_is_dropped() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(&state("interrompida"), true, 0), &mut sink, &mut events)
        .unwrap();
    let out = svc
        .handle_message(&message(&state("livre"), true, 1_000), &mut sink, &mut events)
        .unwrap();

    assert_eq!(out, Outcome::RetainedDropped {
        state: CanonicalState::Clear
    });
    assert_eq!(svc.last_state(), CanonicalState::Interrupted);
    assert!(sink.stored.is_empty());
}

#[test]
fn retained_after_reconnect_never_counts() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(&state("interrompida"), false, 0), &mut sink, &mut events)
        .unwrap();
    svc.on_connect();
    // Would be a countable edge if it were live.
    svc.handle_message(&message(&state("livre"), true, 5_000), &mut sink, &mut events)
        .unwrap();
    assert!(sink.stored.is_empty());
    assert_eq!(svc.last_state(), CanonicalState::Clear);
}

// ── Payload details ───────────────────────────────────────────

#[test]
fn missing_id_uses_configured_default() {
    let config = ListenerConfig {
        default_sensor_id: "gate-7".into(),
        ..ListenerConfig::default()
    };
    let mut svc = CounterService::new(&config);
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(r#"{"state":"INTERROMPIDO"}"#, false, 0), &mut sink, &mut events)
        .unwrap();
    svc.handle_message(&message(r#"{"state":"  Livre "}"#, false, 200), &mut sink, &mut events)
        .unwrap();
    assert_eq!(sink.stored[0].sensor_id.as_str(), "gate-7");
}

#[test]
fn english_tokens_are_recognised() {
    let mut svc = service();
    let mut sink = MockCountSink::new();
    let mut events = RecordingEvents::new();

    svc.handle_message(&message(r#"{"state":"interrupted"}"#, false, 0), &mut sink, &mut events)
        .unwrap();
    svc.handle_message(&message(r#"{"state":"clear"}"#, false, 200), &mut sink, &mut events)
        .unwrap();
    assert_eq!(sink.stored.len(), 1);
}
