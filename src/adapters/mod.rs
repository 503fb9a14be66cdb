//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements  | Connects to                    |
//! |----------------|-------------|--------------------------------|
//! | `mqtt`         | BrokerPort  | MQTT broker (rumqttc)          |
//! | `count_store`  | CountSink   | In-memory / JSON-lines journal |
//! | `queued_sink`  | CountSink   | Writer thread + bounded queue  |
//! | `log_sink`     | EventSink   | `log` facade                   |
//! | `time`         | Clock       | `std::time::Instant`           |

pub mod count_store;
pub mod log_sink;
pub mod mqtt;
pub mod queued_sink;
pub mod time;
