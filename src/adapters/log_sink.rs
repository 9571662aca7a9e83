//! Log-based diagnostics and event sink adapters.
//!
//! Implements [`DiagnosticsSink`] and [`EventSink`] by writing structured
//! lines to the `log` facade (UART / USB-CDC in production, stderr in
//! simulation). A CAN or host-dashboard adapter would implement the same
//! traits against a transmit queue instead.

use log::{info, warn};

use crate::app::events::{CoreEvent, EventSink};
use crate::diagnostics::{DiagnosticsSink, EventId, Subsystem};

/// Adapter that logs every diagnostics transition to the serial console.
pub struct LogDiagnosticsSink;

impl DiagnosticsSink for LogDiagnosticsSink {
    fn on_transition(&mut self, event: EventId, subsystem: Subsystem, index: u8, active: bool) {
        if active {
            warn!("DIAG | {:?}/{:?}[{}] -> active", subsystem, event, index);
        } else {
            info!("DIAG | {:?}/{:?}[{}] -> cleared", subsystem, event, index);
        }
    }
}

/// Adapter that logs every [`CoreEvent`] to the serial console.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::PackPhaseChanged { from, to } => info!("PACK  | {:?} -> {:?}", from, to),
            CoreEvent::StringClosed(s) => info!("PACK  | string {} closed", s.get()),
            CoreEvent::StringOpened(s) => info!("PACK  | string {} opened", s.get()),
            CoreEvent::StringDeactivated(s) => warn!("PACK  | string {} deactivated (precharge retries exhausted)", s.get()),
            CoreEvent::FaultLatchStarted => warn!("FAULT | transition-to-error started"),
            CoreEvent::FaultLatchAborted => info!("FAULT | transition-to-error aborted, conditions cleared"),
            CoreEvent::FaultLatched => warn!("FAULT | latched, contactors force-opened"),
        }
    }
}
