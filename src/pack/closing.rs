//! Multi-string selection and open sequencing (§4.H.5, §4.H.6).
//!
//! The first string to close always runs the full precharge algorithm from
//! [`super::precharge`]. Every additional string runs the same algorithm —
//! this machine just decides *which* string goes next and *whether* it is
//! safe to start, gated on the voltage/current settle guard between
//! strings. Once a candidate clears the guard, control hands back to
//! [`super::precharge::handle`] for that string.

use crate::diagnostics::{DiagnosticsBus, DiagnosticsSink, EventId, Severity, Subsystem};
use crate::measurement::{ContactorCommand, ContactorFeedback, ContactorState, MeasurementSnapshot};
use crate::types::StringIndex;

use super::{CurrentFlowState, PackOrchestrator, Phase, Substate};

/// Choose the next eligible string to close, or `None` if every
/// non-deactivated string is already closed.
///
/// With no closed strings yet (selecting the very first one), picks the
/// highest-voltage eligible string for `Normal`/`Standby` mode and the
/// lowest-voltage one for `Charge`. Once at least one string is closed,
/// subsequent picks favor whichever eligible string sits closest to the
/// live pack voltage, minimizing the inrush the next contactor closure
/// sees.
pub(super) fn select_next_string(orchestrator: &PackOrchestrator, measurements: &MeasurementSnapshot, mode: Phase) -> Option<StringIndex> {
    let eligible = |s: StringIndex| {
        !orchestrator.state.closed_strings.contains(s) && !orchestrator.state.deactivated_strings.contains(s)
    };

    if orchestrator.state.closed_strings.is_empty() {
        return if mode == Phase::Charge {
            StringIndex::all().filter(|s| eligible(*s)).min_by_key(|s| measurements.string(*s).string_voltage_mv)
        } else {
            StringIndex::all().filter(|s| eligible(*s)).max_by_key(|s| measurements.string(*s).string_voltage_mv)
        };
    }

    let pack_voltage = measurements.pack.pack_voltage_mv as i64;
    StringIndex::all()
        .filter(|s| eligible(*s))
        .min_by_key(|s| (measurements.string(*s).string_voltage_mv as i64 - pack_voltage).unsigned_abs())
}

fn guard_satisfied(orchestrator: &PackOrchestrator, measurements: &MeasurementSnapshot, candidate: StringIndex) -> bool {
    if orchestrator.state.closed_strings.is_empty() {
        return true;
    }
    let pack_voltage = measurements.pack.pack_voltage_mv as i64;
    let candidate_voltage = measurements.string(candidate).string_voltage_mv as i64;
    let voltage_delta: u64 = (candidate_voltage - pack_voltage).unsigned_abs();
    let avg_current: u64 = u64::from(measurements.average_string_current_ma(orchestrator.state.deactivated_strings).unsigned_abs());

    voltage_delta <= u64::from(orchestrator.timing.next_string_voltage_limit_mv.unsigned_abs())
        && avg_current <= u64::from(orchestrator.timing.average_string_current_limit_ma.unsigned_abs())
}

/// Called after a string finishes precharge (successfully) and whenever the
/// closing loop re-checks for a next candidate. Starts the next string's
/// precharge if one clears the guard; otherwise settles into the steady
/// `Normal`/`Charge` phase and waits.
pub(super) fn advance(orchestrator: &mut PackOrchestrator, measurements: &MeasurementSnapshot, _contactors: &mut ContactorState) {
    let mode = orchestrator.target_phase.unwrap_or(Phase::Normal);

    if let Some(next) = select_next_string(orchestrator, measurements, mode) {
        if guard_satisfied(orchestrator, measurements, next) {
            orchestrator.state.current_string = Some(next);
            orchestrator.state.precharge_try_count = 0;
            orchestrator.state.repeat_count = 0;
            orchestrator.state.phase = Phase::Precharge;
            orchestrator.state.substate = Substate::PrechargeCloseMinus;
            orchestrator.state.timer_ticks = orchestrator.timing.time_wait_after_string_closed;
            return;
        }
    }

    orchestrator.state.phase = mode;
    orchestrator.state.substate = Substate::StringClosingLoop;
}

/// Ticked every time the orchestrator is in `Normal`/`Charge`. Keeps trying
/// to bring in the next string, and starts the open sequence once a standby
/// request arrives.
pub(super) fn handle(
    orchestrator: &mut PackOrchestrator,
    measurements: &MeasurementSnapshot,
    contactors: &mut ContactorState,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    now_ms: u32,
) {
    check_closed_string_feedback(orchestrator, contactors, diagnostics, sink, now_ms);

    if orchestrator.target_phase == Some(Phase::Standby) {
        begin_open_sequence(orchestrator);
        return;
    }

    if orchestrator.state.substate == Substate::StringClosingLoop {
        advance(orchestrator, measurements, contactors);
    }
}

/// Every string this machine believes is closed must still report closed
/// contactor feedback on every tick; a contactor that opened on its own
/// (welded shut is the opposite and undetectable this way) is a fault in
/// that string's power path, not a normal transition.
fn check_closed_string_feedback(
    orchestrator: &PackOrchestrator,
    contactors: &ContactorState,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    now_ms: u32,
) {
    for s in orchestrator.state.closed_strings.iter() {
        let c = contactors.string(s);
        if c.plus.feedback != ContactorFeedback::Closed {
            diagnostics.report(EventId::ContactorInPositivePathOfString, Severity::NotOk, Subsystem::Contactor, s.get() as u8, now_ms, sink);
        }
        if c.minus.feedback != ContactorFeedback::Closed {
            diagnostics.report(EventId::ContactorInNegativePathOfString, Severity::NotOk, Subsystem::Contactor, s.get() as u8, now_ms, sink);
        }
    }
}

fn begin_open_sequence(orchestrator: &mut PackOrchestrator) {
    orchestrator.state.phase = Phase::OpenContactors;
    orchestrator.state.substate = Substate::StringOpenSequence;
    orchestrator.state.current_string = None;
}

/// Open every closed string one at a time, settling `time_wait_after_opening_string`
/// ticks between each (§4.H.6). Waits in [`Substate::ClampSupplyLoss`] for the
/// pack current to settle to rest before opening the last string — opening
/// the only remaining string while current is still flowing would collapse
/// the supply it's carrying.
pub(super) fn handle_open_sequence(orchestrator: &mut PackOrchestrator, contactors: &mut ContactorState) {
    match orchestrator.state.current_string {
        None => {
            let Some(s) = orchestrator.state.closed_strings.iter().next() else {
                orchestrator.state.phase = Phase::Standby;
                orchestrator.state.substate = Substate::Entry;
                orchestrator.target_phase = Some(Phase::Standby);
                return;
            };

            let is_last = orchestrator.state.closed_strings.count() == 1;
            if is_last && orchestrator.get_battery_system_state() != CurrentFlowState::AtRest {
                orchestrator.state.substate = Substate::ClampSupplyLoss;
                return;
            }

            let c = contactors.string_mut(s);
            c.plus.command = ContactorCommand::Open;
            c.minus.command = ContactorCommand::Open;
            orchestrator.state.current_string = Some(s);
            orchestrator.state.substate = Substate::StringOpenSequence;
            orchestrator.state.timer_ticks = orchestrator.timing.string_open_timeout;
        }
        Some(s) => {
            let c = contactors.string(s);
            if c.plus.feedback == ContactorFeedback::Open && c.minus.feedback == ContactorFeedback::Open {
                orchestrator.state.closed_strings.remove(s);
                orchestrator.state.current_string = None;
                orchestrator.state.timer_ticks = orchestrator.timing.time_wait_after_opening_string;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackTimingConfig;

    fn snap_with_voltages(pack_mv: u32, strings_mv: [u32; crate::config::NR_STRINGS]) -> MeasurementSnapshot {
        let mut snap = MeasurementSnapshot::default();
        snap.pack.pack_voltage_mv = pack_mv;
        for (i, v) in strings_mv.into_iter().enumerate() {
            snap.strings[i].string_voltage_mv = v;
        }
        snap
    }

    #[test]
    fn first_pick_in_normal_mode_prefers_highest_voltage() {
        let o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        let snap = snap_with_voltages(0, [280_000, 310_000, 250_000]);
        let picked = select_next_string(&o, &snap, Phase::Normal).unwrap();
        assert_eq!(picked, StringIndex::new(1).unwrap());
    }

    #[test]
    fn first_pick_in_charge_mode_prefers_lowest_voltage() {
        let o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        let snap = snap_with_voltages(0, [280_000, 310_000, 250_000]);
        let picked = select_next_string(&o, &snap, Phase::Charge).unwrap();
        assert_eq!(picked, StringIndex::new(2).unwrap());
    }

    #[test]
    fn subsequent_pick_prefers_closest_to_pack_voltage() {
        let mut o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        o.state.closed_strings.insert(StringIndex::new(0).unwrap());
        let snap = snap_with_voltages(300_000, [300_000, 305_000, 350_000]);
        let picked = select_next_string(&o, &snap, Phase::Normal).unwrap();
        assert_eq!(picked, StringIndex::new(1).unwrap());
    }

    #[test]
    fn guard_blocks_candidate_far_from_pack_voltage() {
        let mut o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        o.state.closed_strings.insert(StringIndex::new(0).unwrap());
        let snap = snap_with_voltages(300_000, [300_000, 0, 0]);
        let candidate = StringIndex::new(1).unwrap();
        assert!(!guard_satisfied(&o, &snap, candidate));
    }

    #[test]
    fn open_sequence_waits_for_rest_before_opening_last_string() {
        let mut o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        let s0 = StringIndex::new(0).unwrap();
        o.state.closed_strings.insert(s0);
        o.state.current_flow_state = CurrentFlowState::Charging;
        let mut contactors = ContactorState::default();

        handle_open_sequence(&mut o, &mut contactors);

        assert_eq!(o.state.substate, Substate::ClampSupplyLoss);
        assert!(o.state.current_string.is_none());
        assert!(o.is_string_closed(s0));
    }

    #[test]
    fn open_sequence_opens_last_string_once_at_rest() {
        let mut o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        let s0 = StringIndex::new(0).unwrap();
        o.state.closed_strings.insert(s0);
        o.state.current_flow_state = CurrentFlowState::AtRest;
        let mut contactors = ContactorState::default();

        handle_open_sequence(&mut o, &mut contactors);

        assert_eq!(o.state.current_string, Some(s0));
        assert_eq!(contactors.string(s0).plus.command, ContactorCommand::Open);
    }

    #[test]
    fn closed_string_feedback_mismatch_reports_fault() {
        let mut o = crate::pack::PackOrchestrator::new(
            PackTimingConfig::default(),
            crate::config::CurrentFlowConfig::default(),
            crate::config::SocConfig::default(),
            crate::config::SafetyLimitsConfig::default(),
        );
        let s0 = StringIndex::new(0).unwrap();
        o.state.closed_strings.insert(s0);
        let mut contactors = ContactorState::default();
        contactors.string_mut(s0).plus.feedback = ContactorFeedback::Open;
        contactors.string_mut(s0).minus.feedback = ContactorFeedback::Closed;

        let mut diagnostics = DiagnosticsBus::new();
        let mut sink = crate::diagnostics::NullSink;
        check_closed_string_feedback(&o, &contactors, &mut diagnostics, &mut sink, 0);

        assert!(diagnostics.is_active(EventId::ContactorInPositivePathOfString, Subsystem::Contactor, s0.get() as u8));
        assert!(!diagnostics.is_active(EventId::ContactorInNegativePathOfString, Subsystem::Contactor, s0.get() as u8));
    }
}
