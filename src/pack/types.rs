//! Shared types for the pack orchestrator (§3, §4.H).

use crate::types::{StringIndex, StringSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialization,
    Initialized,
    Idle,
    Standby,
    Precharge,
    Normal,
    Charge,
    OpenContactors,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substate {
    Entry,
    InterlockCheck,
    ErrorFlagGate,
    PrechargeCloseMinus,
    PrechargeClosePrecharge,
    PrechargeEvaluate,
    PrechargeOpen,
    StringClosingLoop,
    StringOpenSequence,
    ClampSupplyLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentFlowState {
    Charging,
    Discharging,
    AtRest,
    Relaxation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackRequest {
    Init,
    Standby,
    Normal,
    Charge,
    Reset,
}

/// `(phase, substate, timer_ticks, last_phase, repeat_count, closed_strings,
/// deactivated_strings, precharge_try_count, first_closed_string,
/// transition_to_error, error_delay_remaining_ms)` per §3.
#[derive(Debug, Clone, Copy)]
pub struct PackState {
    pub phase: Phase,
    pub substate: Substate,
    pub timer_ticks: u32,
    pub last_phase: Phase,
    pub repeat_count: u32,
    pub closed_strings: StringSet,
    pub deactivated_strings: StringSet,
    pub precharge_try_count: u8,
    pub first_closed_string: Option<StringIndex>,
    pub transition_to_error: bool,
    pub error_delay_remaining_ms: u32,
    /// String currently being precharged/closed/opened; `None` between
    /// strings. Tracks the "at most one string in precharge" invariant.
    pub current_string: Option<StringIndex>,
    pub current_flow_state: CurrentFlowState,
}

impl Default for PackState {
    fn default() -> Self {
        Self {
            phase: Phase::Uninitialized,
            substate: Substate::Entry,
            timer_ticks: 0,
            last_phase: Phase::Uninitialized,
            repeat_count: 0,
            closed_strings: StringSet::EMPTY,
            deactivated_strings: StringSet::EMPTY,
            precharge_try_count: 0,
            first_closed_string: None,
            transition_to_error: false,
            error_delay_remaining_ms: 0,
            current_string: None,
            current_flow_state: CurrentFlowState::AtRest,
        }
    }
}
