//! Single-string precharge algorithm (§4.H.4).
//!
//! Close minus, verify feedback, close precharge, sample the string against
//! the pack for the success window, close plus, then open precharge again.
//! Each step issues a contactor command on first entry and waits out the
//! configured settle time before checking feedback on the next call — the
//! commanded state itself marks "already issued" so `handle` is idempotent
//! across repeated calls while `timer_ticks` counts down.

use crate::diagnostics::{DiagnosticsBus, DiagnosticsSink, EventId, Severity, Subsystem};
use crate::error::ContactorFault;
use crate::measurement::{ContactorCommand, ContactorFeedback, ContactorState, MeasurementSnapshot};
use crate::types::StringIndex;

use super::{PackOrchestrator, Phase, Substate};

pub(super) fn handle(
    orchestrator: &mut PackOrchestrator,
    measurements: &MeasurementSnapshot,
    contactors: &mut ContactorState,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    now_ms: u32,
) {
    let Some(s) = orchestrator.state.current_string else {
        return;
    };

    match orchestrator.state.substate {
        Substate::PrechargeCloseMinus => {
            let c = contactors.string_mut(s);
            if c.minus.command == ContactorCommand::Open {
                c.minus.command = ContactorCommand::Close;
                c.minus.last_command_timestamp_ms = now_ms;
                orchestrator.state.timer_ticks = orchestrator.timing.t_wait_minus;
                return;
            }
            if c.minus.feedback != ContactorFeedback::Closed {
                abort_attempt(orchestrator, contactors, diagnostics, sink, s, ContactorFault::FeedbackMismatch(s), now_ms);
                return;
            }
            orchestrator.state.substate = Substate::PrechargeClosePrecharge;
        }
        Substate::PrechargeClosePrecharge => {
            let c = contactors.string_mut(s);
            if c.precharge.command == ContactorCommand::Open {
                c.precharge.command = ContactorCommand::Close;
                c.precharge.last_command_timestamp_ms = now_ms;
                orchestrator.state.timer_ticks = orchestrator.timing.t_wait_precharge;
                return;
            }
            if c.precharge.feedback != ContactorFeedback::Closed {
                abort_attempt(orchestrator, contactors, diagnostics, sink, s, ContactorFault::FeedbackMismatch(s), now_ms);
                return;
            }
            orchestrator.state.timer_ticks = 0;
            orchestrator.state.repeat_count = 0;
            orchestrator.state.substate = Substate::PrechargeEvaluate;
        }
        Substate::PrechargeEvaluate => evaluate(orchestrator, measurements, contactors, diagnostics, sink, s, now_ms),
        Substate::PrechargeOpen => {
            let c = contactors.string_mut(s);
            if c.precharge.command == ContactorCommand::Close {
                if c.plus.feedback != ContactorFeedback::Closed {
                    abort_attempt(orchestrator, contactors, diagnostics, sink, s, ContactorFault::FeedbackMismatch(s), now_ms);
                    return;
                }
                c.precharge.command = ContactorCommand::Open;
                c.precharge.last_command_timestamp_ms = now_ms;
                orchestrator.state.timer_ticks = orchestrator.timing.t_wait_after_opening_precharge;
                return;
            }

            orchestrator.state.closed_strings.insert(s);
            if orchestrator.state.first_closed_string.is_none() {
                orchestrator.state.first_closed_string = Some(s);
            }
            orchestrator.state.current_string = None;
            orchestrator.state.precharge_try_count = 0;
            super::closing::advance(orchestrator, measurements, contactors);
        }
        _ => {}
    }
}

/// Sample the precharge success condition for up to `precharge_close_timeout`
/// ticks: `|string_voltage - pack_voltage| <= precharge_voltage_threshold_mv`
/// and `|string_current| <= precharge_current_threshold_mA`.
fn evaluate(
    orchestrator: &mut PackOrchestrator,
    measurements: &MeasurementSnapshot,
    contactors: &mut ContactorState,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    s: StringIndex,
    now_ms: u32,
) {
    let string_voltage = measurements.string(s).string_voltage_mv as i64;
    let pack_voltage = measurements.pack.pack_voltage_mv as i64;
    let voltage_delta = (string_voltage - pack_voltage).unsigned_abs() as i64;
    let current = measurements.string(s).string_current_ma;

    let voltage_ok = voltage_delta <= i64::from(orchestrator.timing.precharge_voltage_threshold_mv);
    let current_ok = current.unsigned_abs() <= orchestrator.timing.precharge_current_threshold_ma.unsigned_abs();

    if voltage_ok && current_ok {
        let c = contactors.string_mut(s);
        c.plus.command = ContactorCommand::Close;
        c.plus.last_command_timestamp_ms = now_ms;
        orchestrator.state.timer_ticks = orchestrator.timing.t_wait_plus;
        orchestrator.state.substate = Substate::PrechargeOpen;
        return;
    }

    orchestrator.state.repeat_count += 1;
    if orchestrator.state.repeat_count < orchestrator.timing.precharge_close_timeout {
        return;
    }

    let fault = if !voltage_ok {
        diagnostics.report(EventId::PrechargeAbortedDueToVoltage, Severity::NotOk, Subsystem::Contactor, s.get() as u8, now_ms, sink);
        ContactorFault::PrechargeAbortedDueToVoltage(s)
    } else {
        diagnostics.report(EventId::PrechargeAbortedDueToCurrent, Severity::NotOk, Subsystem::Contactor, s.get() as u8, now_ms, sink);
        ContactorFault::PrechargeAbortedDueToCurrent(s)
    };
    retry_or_deactivate(orchestrator, contactors, s, fault);
}

fn abort_attempt(
    orchestrator: &mut PackOrchestrator,
    contactors: &mut ContactorState,
    diagnostics: &mut DiagnosticsBus,
    sink: &mut dyn DiagnosticsSink,
    s: StringIndex,
    fault: ContactorFault,
    now_ms: u32,
) {
    diagnostics.report(EventId::ContactorFeedbackMismatch, Severity::NotOk, Subsystem::Contactor, s.get() as u8, now_ms, sink);
    retry_or_deactivate(orchestrator, contactors, s, fault);
}

/// On a failed attempt, open everything for this string and either retry
/// after `t_wait_after_precharge_fail` or, past `precharge_tries`,
/// permanently deactivate the string and latch `Phase::Error`.
fn retry_or_deactivate(orchestrator: &mut PackOrchestrator, contactors: &mut ContactorState, s: StringIndex, _fault: ContactorFault) {
    let c = contactors.string_mut(s);
    c.plus.command = ContactorCommand::Open;
    c.minus.command = ContactorCommand::Open;
    c.precharge.command = ContactorCommand::Open;

    orchestrator.state.precharge_try_count += 1;
    if orchestrator.state.precharge_try_count >= orchestrator.timing.precharge_tries {
        orchestrator.state.deactivated_strings.insert(s);
        orchestrator.state.current_string = None;
        orchestrator.state.phase = Phase::Error;
        return;
    }

    orchestrator.state.timer_ticks = orchestrator.timing.t_wait_after_precharge_fail;
    orchestrator.state.repeat_count = 0;
    orchestrator.state.substate = Substate::PrechargeCloseMinus;
}
