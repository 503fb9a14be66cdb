//! Beamcount library.
//!
//! Counts passes through an infrared light barrier that reports its state
//! over MQTT.  One count is recorded for each `interrupted → clear` edge.
//!
//! The pure detection logic (`detector`) and the service core (`app`) have
//! no I/O; `adapters` plug them into a broker, a count store and the log,
//! and `supervisor` keeps the broker session alive.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod supervisor;

mod error;

pub use error::{Error, Result};
