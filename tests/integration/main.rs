//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem.
//! Most run against mock adapters; `mqtt_session_tests` drives the real
//! MQTT adapter against a loopback broker from `fake_broker`.

mod mqtt_session_tests;
mod pipeline_tests;
mod supervisor_tests;
