//! Outbound application events and the transmitted telemetry frame (§6.2).
//!
//! [`Core`](super::service::Core)'s periodic task bodies emit [`CoreEvent`]s
//! through the [`EventSink`] port. Adapters decide where they go — a log
//! line in simulation, a CAN transmit callback in production (grounded on
//! `can_cbs_tx_bms-state.c` / `can_cbs_tx_state.c`).

use crate::pack::Phase as PackPhase;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    /// The pack orchestrator transitioned between phases.
    PackPhaseChanged { from: PackPhase, to: PackPhase },
    /// A string finished closing and joined the live bus.
    StringClosed(crate::types::StringIndex),
    /// A string was opened (normal sequencing or a fault).
    StringOpened(crate::types::StringIndex),
    /// A string exhausted its precharge retries and was deactivated.
    StringDeactivated(crate::types::StringIndex),
    /// The fatal-diagnostics aggregate transitioned high; the error
    /// deadline has started counting down.
    FaultLatchStarted,
    /// The pending fault transition was aborted because every fatal
    /// condition cleared before the deadline.
    FaultLatchAborted,
    /// `Phase::Error` was entered; contactors have been force-opened.
    FaultLatched,
}

/// A point-in-time snapshot suitable for logging or encoding into the §6.2
/// transmitted state frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub pack_phase: PackPhase,
    pub connected_strings: u32,
    pub soc_avg_perc: [f32; crate::config::NR_STRINGS],
    pub balancing_active: bool,
    pub any_task_violation: bool,
    pub any_fatal_fault: bool,
}

/// The domain emits [`CoreEvent`]s through this port; adapters decide what
/// to do with them (log, publish, update a BLE characteristic).
pub trait EventSink {
    fn emit(&mut self, event: CoreEvent);
}

/// No-op sink for tests that do not care about emitted events.
pub struct NullEventSink;
impl EventSink for NullEventSink {
    fn emit(&mut self, _event: CoreEvent) {}
}
