//! Plausibility, guard and safety-limit checks (§3 "absolute bounds", §7).
//!
//! Run once per tick from [`super::PackOrchestrator::trigger`], before the
//! fault aggregate is polled, so a fault raised this tick is visible to
//! `poll_fault_aggregate` in the same tick. Every check here only ever
//! reports `Severity::NotOk` — all of the events involved are persistent and
//! contribute to the fatal aggregate, so they never self-clear on a healthy
//! reading; clearing is `clear_all_persistent`'s job (command intake, §4.I).

use crate::diagnostics::{DiagnosticsBus, DiagnosticsSink, EventId, Severity, Subsystem};
use crate::measurement::MeasurementSnapshot;
use crate::types::StringIndex;

use super::PackOrchestrator;

pub(super) fn check_plausibility(
    orchestrator: &PackOrchestrator,
    measurements: &MeasurementSnapshot,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    now_ms: u32,
) {
    let limits = &orchestrator.safety_limits;

    for s in StringIndex::all() {
        let sm = measurements.string(s);
        let voltage_spread = sm.max_cell_mv.saturating_sub(sm.min_cell_mv);
        if voltage_spread > limits.cell_voltage_spread_max_mv {
            diagnostics.report(EventId::CellVoltageSpread, Severity::NotOk, Subsystem::PackOrchestrator, s.get() as u8, now_ms, sink);
        }

        let temp_spread = sm.max_cell_temp_ddegc.saturating_sub(sm.min_cell_temp_ddegc);
        if temp_spread > limits.cell_temperature_spread_max_ddegc {
            diagnostics.report(EventId::CellTemperatureSpread, Severity::NotOk, Subsystem::PackOrchestrator, s.get() as u8, now_ms, sink);
        }
    }

    // A pack with nothing closed reads however the driver layer's idle
    // default happens to be (commonly 0); only meaningful once energized.
    let pack_energized = !orchestrator.closed_strings().is_empty();
    if pack_energized {
        let pack_mv = measurements.pack.pack_voltage_mv;
        if pack_mv < limits.pack_voltage_min_mv || pack_mv > limits.pack_voltage_max_mv {
            diagnostics.report(EventId::PackVoltageOutOfBounds, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
        }
    }
}

pub(super) fn check_guards(
    measurements: &MeasurementSnapshot,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    now_ms: u32,
) {
    if !measurements.pack.interlock_closed {
        diagnostics.report(EventId::InterlockOpened, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
    }
    if !measurements.pack.main_fuse_intact {
        diagnostics.report(EventId::MainFuseBlown, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
    }
}

pub(super) fn check_limits(
    orchestrator: &PackOrchestrator,
    measurements: &MeasurementSnapshot,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    now_ms: u32,
) {
    let limits = &orchestrator.safety_limits;

    if measurements.pack.insulation_resistance_kohm < limits.insulation_resistance_min_kohm {
        diagnostics.report(EventId::CriticalLowInsulationResistance, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
    }
    if measurements.pack.pack_current_ma.unsigned_abs() > limits.overcurrent_limit_ma.unsigned_abs() {
        diagnostics.report(EventId::Overcurrent, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
    }
    if measurements.pack.pack_voltage_mv > limits.overvoltage_limit_mv {
        diagnostics.report(EventId::Overvoltage, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
    }
    for s in StringIndex::all() {
        let sm = measurements.string(s);
        if sm.max_cell_temp_ddegc > limits.overtemperature_limit_ddegc {
            diagnostics.report(EventId::Overtemperature, Severity::NotOk, Subsystem::PackOrchestrator, s.get() as u8, now_ms, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CurrentFlowConfig, PackTimingConfig, SafetyLimitsConfig, SocConfig};
    use crate::diagnostics::NullSink;

    fn orchestrator() -> PackOrchestrator {
        PackOrchestrator::new(
            PackTimingConfig::default(),
            CurrentFlowConfig::default(),
            SocConfig::default(),
            SafetyLimitsConfig::default(),
        )
    }

    #[test]
    fn cell_voltage_spread_latches_when_exceeded() {
        let o = orchestrator();
        let mut snap = MeasurementSnapshot::default();
        snap.strings[0].min_cell_mv = 3000;
        snap.strings[0].max_cell_mv = 3300;
        let mut diag = DiagnosticsBus::new();
        let mut sink = NullSink;
        check_plausibility(&o, &snap, &mut diag, &mut sink, 0);
        assert!(diag.is_active(EventId::CellVoltageSpread, Subsystem::PackOrchestrator, 0));
    }

    #[test]
    fn pack_voltage_bounds_ignored_while_not_energized() {
        let o = orchestrator();
        let snap = MeasurementSnapshot::default(); // pack_voltage_mv = 0, no strings closed
        let mut diag = DiagnosticsBus::new();
        let mut sink = NullSink;
        check_plausibility(&o, &snap, &mut diag, &mut sink, 0);
        assert!(!diag.is_active(EventId::PackVoltageOutOfBounds, Subsystem::PackOrchestrator, 0));
    }

    #[test]
    fn pack_voltage_bounds_enforced_once_energized() {
        let mut o = orchestrator();
        o.state.closed_strings.insert(StringIndex::new(0).unwrap());
        let mut snap = MeasurementSnapshot::default();
        snap.pack.pack_voltage_mv = 10; // far below pack_voltage_min_mv
        let mut diag = DiagnosticsBus::new();
        let mut sink = NullSink;
        check_plausibility(&o, &snap, &mut diag, &mut sink, 0);
        assert!(diag.is_active(EventId::PackVoltageOutOfBounds, Subsystem::PackOrchestrator, 0));
    }

    #[test]
    fn interlock_open_latches_guard_fault() {
        let mut snap = MeasurementSnapshot::default();
        snap.pack.interlock_closed = false;
        let mut diag = DiagnosticsBus::new();
        let mut sink = NullSink;
        check_guards(&snap, &mut diag, &mut sink, 0);
        assert!(diag.is_active(EventId::InterlockOpened, Subsystem::PackOrchestrator, 0));
    }

    #[test]
    fn overcurrent_latches_limit_fault() {
        let o = orchestrator();
        let mut snap = MeasurementSnapshot::default();
        snap.pack.pack_current_ma = 500_000;
        let mut diag = DiagnosticsBus::new();
        let mut sink = NullSink;
        check_limits(&o, &snap, &mut diag, &mut sink, 0);
        assert!(diag.is_active(EventId::Overcurrent, Subsystem::PackOrchestrator, 0));
    }

    #[test]
    fn healthy_defaults_never_trip_any_check() {
        let o = orchestrator();
        let snap = MeasurementSnapshot::default();
        let mut diag = DiagnosticsBus::new();
        let mut sink = NullSink;
        check_plausibility(&o, &snap, &mut diag, &mut sink, 0);
        check_guards(&snap, &mut diag, &mut sink, 0);
        check_limits(&o, &snap, &mut diag, &mut sink, 0);
        assert!(!diag.is_any_fatal_set());
    }
}
