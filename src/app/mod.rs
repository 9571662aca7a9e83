//! Application core — pure domain logic, zero I/O.
//!
//! [`service::Core`] owns the pack orchestrator, balancing engine, SOC
//! estimator, task-health monitor and command intake, and drives them from
//! the periodic task bodies. Interaction with hardware happens through the
//! narrow port traits in [`ports`] and the `StorageBackend`/`DiagnosticsSink`
//! traits they re-export, keeping this layer testable without real
//! peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
