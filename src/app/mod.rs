//! Application core — pure domain logic, zero I/O.
//!
//! This module contains the pass-counting rules: message admission,
//! retained-baseline handling, debounce and edge detection.  All
//! interaction with the broker and storage happens through **port traits**
//! defined in [`ports`], keeping this layer fully testable without a
//! running broker.

pub mod events;
pub mod ports;
pub mod service;
