//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements                         | Connects to               |
//! |------------|-------------------------------------|---------------------------|
//! | `hardware` | measurement/contactor simulation     | simulated analog front-end|
//! | `log_sink` | `DiagnosticsSink`, `EventSink`        | `log` facade               |
//! | `nvs`      | `StorageBackend`                      | NVS / in-memory store     |
//! | `time`     | `TickSource`                          | monotonic system clock     |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
