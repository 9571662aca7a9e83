//! Pack Orchestrator (§4.H) — the master state machine driving contactors
//! across `NR_STRINGS` parallel strings to realize an external mode
//! request while enforcing safety.
//!
//! Split across this module and two sibling files the way the state
//! machine itself is split conceptually: [`precharge`] owns the
//! single-string precharge algorithm (§4.H.4), [`closing`] owns multi-string
//! selection and the open sequence (§4.H.5, §4.H.6). This file owns the
//! tick contract, current-flow classification, and fault propagation that
//! every phase shares.

pub mod closing;
pub mod precharge;
mod safety;
pub mod types;

use crate::clock::Deadline;
use crate::config::{CurrentFlowConfig, NR_STRINGS, PackTimingConfig, SafetyLimitsConfig, SocConfig};
use crate::diagnostics::{DiagnosticsBus, DiagnosticsSink};
use crate::error::PackRequestResult;
use crate::measurement::{ContactorCommand, ContactorState, MeasurementSnapshot};
use crate::types::StringIndex;

pub use types::{CurrentFlowState, Phase, PackRequest, PackState, Substate};

/// Narrow read-only view the balancing engine queries (§9 design note).
impl crate::balancing::PackRestQuery for PackOrchestrator {
    fn is_at_rest(&self) -> bool {
        self.state.current_flow_state == CurrentFlowState::AtRest
    }
}

pub struct PackOrchestrator {
    pub(crate) state: PackState,
    pub(crate) timing: PackTimingConfig,
    pub(crate) current_flow_config: CurrentFlowConfig,
    pub(crate) soc_config: SocConfig,
    pub(crate) safety_limits: SafetyLimitsConfig,
    reentrant: bool,
    pub(crate) target_phase: Option<Phase>,
    low_current_since_ms: Option<u32>,
    last_active_current_ms: Option<u32>,
    error_deadline: Option<Deadline>,
}

impl PackOrchestrator {
    pub fn new(
        timing: PackTimingConfig,
        current_flow_config: CurrentFlowConfig,
        soc_config: SocConfig,
        safety_limits: SafetyLimitsConfig,
    ) -> Self {
        Self {
            state: PackState::default(),
            timing,
            current_flow_config,
            soc_config,
            safety_limits,
            reentrant: false,
            target_phase: None,
            low_current_since_ms: None,
            last_active_current_ms: None,
            error_deadline: None,
        }
    }

    // -- accessors (§4.H.9) -------------------------------------------------

    pub fn get_state(&self) -> Phase {
        self.state.phase
    }

    pub fn get_substate(&self) -> Substate {
        self.state.substate
    }

    pub fn get_battery_system_state(&self) -> CurrentFlowState {
        self.state.current_flow_state
    }

    pub fn is_string_closed(&self, s: StringIndex) -> bool {
        self.state.closed_strings.contains(s)
    }

    pub fn is_string_precharging(&self, s: StringIndex) -> bool {
        self.state.phase == Phase::Precharge && self.state.current_string == Some(s)
    }

    pub fn number_of_connected_strings(&self) -> u32 {
        self.state.closed_strings.count()
    }

    pub fn is_transition_to_error_active(&self) -> bool {
        self.state.transition_to_error
    }

    pub fn closed_strings(&self) -> crate::types::StringSet {
        self.state.closed_strings
    }

    pub fn deactivated_strings(&self) -> crate::types::StringSet {
        self.state.deactivated_strings
    }

    /// Pure classification of a current sample against the rest threshold
    /// and discharge-polarity convention; does not consult or mutate
    /// accumulated state (used by tests and telemetry, §8 sign-symmetry
    /// law).
    pub fn get_current_flow_direction(&self, current_ma: i32) -> CurrentFlowState {
        if current_ma.unsigned_abs() < self.current_flow_config.i_rest_threshold_ma.unsigned_abs() {
            return CurrentFlowState::AtRest;
        }
        if self.is_discharging(current_ma) {
            CurrentFlowState::Discharging
        } else {
            CurrentFlowState::Charging
        }
    }

    fn is_discharging(&self, current_ma: i32) -> bool {
        if self.soc_config.positive_discharge_current {
            current_ma > 0
        } else {
            current_ma < 0
        }
    }

    pub fn set_state_request(&mut self, req: PackRequest) -> PackRequestResult {
        if self.state.phase == Phase::Error && req != PackRequest::Reset {
            return PackRequestResult::ErrorLatched;
        }
        match req {
            PackRequest::Init => {
                if self.state.phase != Phase::Uninitialized {
                    return PackRequestResult::IllegalRequest;
                }
                self.state.phase = Phase::Initialization;
                PackRequestResult::Ok
            }
            PackRequest::Reset => {
                if self.state.phase != Phase::Error {
                    return PackRequestResult::IllegalRequest;
                }
                let timing = self.timing;
                let cfc = self.current_flow_config;
                let soc = self.soc_config;
                let limits = self.safety_limits;
                *self = Self::new(timing, cfc, soc, limits);
                PackRequestResult::Ok
            }
            PackRequest::Standby | PackRequest::Normal | PackRequest::Charge => {
                let requested = match req {
                    PackRequest::Standby => Phase::Standby,
                    PackRequest::Normal => Phase::Normal,
                    PackRequest::Charge => Phase::Charge,
                    _ => unreachable!(),
                };
                if self.target_phase == Some(requested) {
                    return PackRequestResult::AlreadyInRequestedState;
                }
                self.target_phase = Some(requested);
                PackRequestResult::Ok
            }
        }
    }

    // -- tick contract (§4.H.3) ---------------------------------------------

    pub fn trigger(
        &mut self,
        measurements: &MeasurementSnapshot,
        contactors: &mut ContactorState,
        diagnostics: &mut DiagnosticsBus,
        sink: &mut dyn DiagnosticsSink,
        now_ms: u32,
    ) {
        if self.reentrant {
            return;
        }
        self.reentrant = true;

        self.classify_current_flow(measurements.pack.pack_current_ma, now_ms);
        safety::check_plausibility(self, measurements, diagnostics, sink, now_ms);
        safety::check_guards(measurements, diagnostics, sink, now_ms);
        safety::check_limits(self, measurements, diagnostics, sink, now_ms);
        self.poll_fault_aggregate(diagnostics, contactors, now_ms);

        if self.state.timer_ticks > 0 {
            self.state.timer_ticks -= 1;
            self.reentrant = false;
            return;
        }

        match self.state.phase {
            Phase::Uninitialized => {}
            Phase::Initialization => {
                self.state.deactivated_strings = crate::types::StringSet::EMPTY;
                self.state.closed_strings = crate::types::StringSet::EMPTY;
                self.state.phase = Phase::Initialized;
            }
            Phase::Initialized => {
                self.state.phase = Phase::Idle;
            }
            Phase::Idle => {
                if let Some(target) = self.target_phase {
                    self.state.phase = Phase::Standby;
                    self.state.substate = Substate::Entry;
                    let _ = target;
                }
            }
            Phase::Standby => match self.state.substate {
                Substate::Entry => {
                    self.state.substate = Substate::InterlockCheck;
                }
                Substate::InterlockCheck => {
                    if measurements.pack.interlock_closed {
                        self.state.substate = Substate::ErrorFlagGate;
                    }
                    // Else stays here; the interlock-open guard fault raised
                    // by `safety::check_guards` above will eventually force
                    // `Phase::Error` via `poll_fault_aggregate`.
                }
                Substate::ErrorFlagGate => {
                    if !self.state.transition_to_error {
                        match self.target_phase {
                            Some(Phase::Normal) | Some(Phase::Charge) => {
                                self.enter_precharge(measurements, contactors);
                            }
                            _ => {}
                        }
                    }
                }
                _ => {
                    self.state.substate = Substate::Entry;
                }
            },
            Phase::Precharge => precharge::handle(self, measurements, contactors, diagnostics, sink, now_ms),
            Phase::Normal | Phase::Charge => closing::handle(self, measurements, contactors, diagnostics, sink, now_ms),
            Phase::OpenContactors => closing::handle_open_sequence(self, contactors),
            Phase::Error => {}
        }

        self.reentrant = false;
    }

    fn enter_precharge(&mut self, measurements: &MeasurementSnapshot, _contactors: &mut ContactorState) {
        let mode = if self.target_phase == Some(Phase::Charge) { Phase::Charge } else { Phase::Normal };
        if let Some(first) = closing::select_next_string(self, measurements, mode) {
            self.state.current_string = Some(first);
            self.state.precharge_try_count = 0;
            self.state.phase = Phase::Precharge;
            self.state.substate = Substate::PrechargeCloseMinus;
            self.state.timer_ticks = 0;
        } else {
            // Nothing eligible to close; stay in standby.
        }
    }

    fn classify_current_flow(&mut self, pack_current_ma: i32, now_ms: u32) {
        let magnitude = pack_current_ma.unsigned_abs();
        if magnitude < self.current_flow_config.i_rest_threshold_ma.unsigned_abs() {
            let since = *self.low_current_since_ms.get_or_insert(now_ms);
            if crate::clock::elapsed_since(since, now_ms) >= self.current_flow_config.rest_time_ms {
                self.state.current_flow_state = CurrentFlowState::AtRest;
            } else if let Some(last_active) = self.last_active_current_ms {
                if crate::clock::elapsed_since(last_active, now_ms) < self.current_flow_config.relaxation_time_ms {
                    self.state.current_flow_state = CurrentFlowState::Relaxation;
                }
            }
        } else {
            self.low_current_since_ms = None;
            self.last_active_current_ms = Some(now_ms);
            self.state.current_flow_state = self.get_current_flow_direction(pack_current_ma);
        }
    }

    fn poll_fault_aggregate(&mut self, diagnostics: &DiagnosticsBus, contactors: &mut ContactorState, now_ms: u32) {
        let fatal = diagnostics.is_any_fatal_set();
        if fatal && !self.state.transition_to_error {
            self.state.transition_to_error = true;
            let delay = diagnostics.min_active_fatal_delay_ms().unwrap_or(0);
            self.error_deadline = Some(crate::clock::deadline(now_ms, delay));
        } else if !fatal && self.state.transition_to_error {
            self.state.transition_to_error = false;
            self.error_deadline = None;
        }

        if self.state.transition_to_error {
            if let Some(deadline) = self.error_deadline {
                if crate::clock::expired(deadline, now_ms) {
                    self.force_open_all(contactors);
                    self.state.phase = Phase::Error;
                    self.error_deadline = None;
                }
            }
        }
    }

    pub(crate) fn force_open_all(&mut self, contactors: &mut ContactorState) {
        for s in StringIndex::all() {
            let c = contactors.string_mut(s);
            c.plus.command = ContactorCommand::Open;
            c.minus.command = ContactorCommand::Open;
            c.precharge.command = ContactorCommand::Open;
        }
        self.state.closed_strings = crate::types::StringSet::EMPTY;
        self.state.current_string = None;
    }
}

const _: () = assert!(NR_STRINGS > 0);
