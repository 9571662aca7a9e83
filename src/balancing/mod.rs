//! Balancing Engine (§4.G).
//!
//! A single state machine sweeps every cell in the pack once per trigger,
//! bleeding any cell sitting more than `threshold_mV` above its string's
//! minimum, but only while the pack reports `at_rest` and balancing is
//! allowed both globally (external request) and locally (reserved for an
//! internal gate, e.g. the pack orchestrator forcing balancing off during a
//! fault — no caller currently exercises it, but the phase machine already
//! honors it uniformly with `globally_allowed`).

use crate::config::{BalancingConfig, NR_CELL_BLOCKS_PER_MODULE, NR_MODULES_PER_STRING, NR_STRINGS};
use crate::error::BalRequestResult;
use crate::measurement::MeasurementSnapshot;
use crate::types::{CellBlockIndex, ModuleIndex, StringIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialization,
    Initialized,
    CheckBalancing,
    Balancing,
    GlobalDisable,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancingSubstate {
    Entry,
    CheckLowestVoltage,
    CheckCurrent,
    Activate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancingRequest {
    Init,
    GlobalEnable,
    GlobalDisable,
}

/// A narrow read-only view the balancing engine queries for pack state,
/// resolving the cyclic pack↔balancing reference without a textual cycle
/// (§9 design note).
pub trait PackRestQuery {
    fn is_at_rest(&self) -> bool;
}

type ActivateMap = [[[bool; NR_CELL_BLOCKS_PER_MODULE]; NR_MODULES_PER_STRING]; NR_STRINGS];

pub struct BalancingEngine {
    config: BalancingConfig,
    phase: Phase,
    substate: BalancingSubstate,
    timer_ticks: u32,
    reentrant: bool,
    globally_allowed: bool,
    locally_allowed: bool,
    threshold_mv: u16,
    active: bool,
    activate: ActivateMap,
    balanced_count: u32,
    illegal_request_count: u32,
}

impl BalancingEngine {
    pub fn new(config: BalancingConfig) -> Self {
        Self {
            config,
            phase: Phase::Uninitialized,
            substate: BalancingSubstate::Entry,
            timer_ticks: 0,
            reentrant: false,
            globally_allowed: false,
            locally_allowed: true,
            threshold_mv: config.base_threshold_mv + config.hysteresis_mv,
            active: false,
            activate: [[[false; NR_CELL_BLOCKS_PER_MODULE]; NR_MODULES_PER_STRING]; NR_STRINGS],
            balanced_count: 0,
            illegal_request_count: 0,
        }
    }

    pub fn get_init_state(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn get_threshold_mv(&self) -> u16 {
        self.threshold_mv
    }

    pub fn set_threshold_mv(&mut self, v: u16) {
        self.threshold_mv = v;
    }

    pub fn illegal_request_count(&self) -> u32 {
        self.illegal_request_count
    }

    pub fn is_cell_activated(&self, s: StringIndex, m: ModuleIndex, cb: CellBlockIndex) -> bool {
        self.activate[s.get()][m.get()][cb.get()]
    }

    /// External reset, e.g. on `clear_persistent_flags`.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    pub fn enter_error(&mut self) {
        self.deactivate_all();
        self.phase = Phase::Error;
    }

    pub fn set_state_request(&mut self, req: BalancingRequest) -> BalRequestResult {
        match req {
            BalancingRequest::Init => {
                if self.phase != Phase::Uninitialized {
                    self.illegal_request_count += 1;
                    return BalRequestResult::IllegalRequest;
                }
                self.phase = Phase::Initialization;
                BalRequestResult::Ok
            }
            BalancingRequest::GlobalEnable => {
                if self.globally_allowed {
                    return BalRequestResult::AlreadyInRequestedState;
                }
                self.globally_allowed = true;
                if self.phase == Phase::GlobalDisable {
                    self.phase = Phase::CheckBalancing;
                }
                BalRequestResult::Ok
            }
            BalancingRequest::GlobalDisable => {
                if !self.globally_allowed {
                    return BalRequestResult::AlreadyInRequestedState;
                }
                self.globally_allowed = false;
                self.deactivate_all();
                if matches!(self.phase, Phase::Balancing | Phase::CheckBalancing) {
                    self.phase = Phase::GlobalDisable;
                }
                BalRequestResult::Ok
            }
        }
    }

    fn deactivate_all(&mut self) {
        self.active = false;
        self.activate = [[[false; NR_CELL_BLOCKS_PER_MODULE]; NR_MODULES_PER_STRING]; NR_STRINGS];
        self.balanced_count = 0;
    }

    fn leave_balancing_early(&mut self) {
        self.deactivate_all();
        if !self.config.threshold_persists_across_idle {
            self.threshold_mv = self.config.base_threshold_mv + self.config.hysteresis_mv;
        }
        self.phase = Phase::CheckBalancing;
    }

    /// Advance the machine one tick; must be called at a fixed cadence
    /// (nominally 100 ms). Re-entrant calls are refused and return
    /// immediately — this core has no preemption, so a bare flag stands in
    /// for the hardware critical section the original guarded this counter
    /// with (§5).
    pub fn trigger(&mut self, pack: &dyn PackRestQuery, measurements: &MeasurementSnapshot) {
        if self.reentrant {
            return;
        }
        self.reentrant = true;

        if self.timer_ticks > 0 {
            self.timer_ticks -= 1;
            self.reentrant = false;
            return;
        }

        match self.phase {
            Phase::Uninitialized | Phase::Error => {}
            Phase::Initialization => {
                self.deactivate_all();
                self.phase = Phase::Initialized;
            }
            Phase::Initialized => {
                self.phase = Phase::CheckBalancing;
            }
            Phase::GlobalDisable => {}
            Phase::CheckBalancing => {
                if self.locally_allowed && self.globally_allowed && pack.is_at_rest() {
                    self.substate = BalancingSubstate::Entry;
                    self.phase = Phase::Balancing;
                } else {
                    self.deactivate_all();
                }
            }
            Phase::Balancing => self.run_balancing_substate(pack, measurements),
        }

        self.reentrant = false;
    }

    fn run_balancing_substate(&mut self, pack: &dyn PackRestQuery, measurements: &MeasurementSnapshot) {
        match self.substate {
            BalancingSubstate::Entry => {
                self.substate = BalancingSubstate::CheckLowestVoltage;
            }
            BalancingSubstate::CheckLowestVoltage => {
                let guard_tripped = StringIndex::all().any(|s| {
                    let sm = measurements.string(s);
                    sm.min_cell_mv <= self.config.lower_voltage_limit_mv
                        || sm.max_cell_temp_ddegc >= self.config.upper_temperature_limit_ddegc
                });
                if guard_tripped {
                    self.leave_balancing_early();
                } else {
                    self.substate = BalancingSubstate::CheckCurrent;
                }
            }
            BalancingSubstate::CheckCurrent => {
                if !pack.is_at_rest() {
                    self.leave_balancing_early();
                } else {
                    self.substate = BalancingSubstate::Activate;
                }
            }
            BalancingSubstate::Activate => {
                self.sweep(measurements);
            }
        }
    }

    fn sweep(&mut self, measurements: &MeasurementSnapshot) {
        let mut any_selected = false;
        self.activate = [[[false; NR_CELL_BLOCKS_PER_MODULE]; NR_MODULES_PER_STRING]; NR_STRINGS];

        for s in StringIndex::all() {
            let v_min_string = measurements.string(s).min_cell_mv;
            for m in ModuleIndex::all() {
                for cb in CellBlockIndex::all() {
                    let v_cell = measurements.cell_block_mv(s, m, cb);
                    if v_cell as u32 > v_min_string as u32 + self.threshold_mv as u32 {
                        self.activate[s.get()][m.get()][cb.get()] = true;
                        any_selected = true;
                    }
                }
            }
        }

        self.balanced_count = self
            .activate
            .iter()
            .flatten()
            .flatten()
            .filter(|&&a| a)
            .count() as u32;
        self.active = any_selected;

        if any_selected {
            self.threshold_mv = self.threshold_mv.saturating_sub(self.config.hysteresis_mv);
            self.substate = BalancingSubstate::Entry;
        } else {
            self.threshold_mv = self.config.base_threshold_mv + self.config.hysteresis_mv;
            self.phase = Phase::CheckBalancing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::StringMeasurement;

    struct AlwaysAtRest(bool);
    impl PackRestQuery for AlwaysAtRest {
        fn is_at_rest(&self) -> bool {
            self.0
        }
    }

    fn initialized_engine() -> BalancingEngine {
        let mut e = BalancingEngine::new(BalancingConfig::default());
        assert_eq!(e.set_state_request(BalancingRequest::Init), BalRequestResult::Ok);
        let pack = AlwaysAtRest(false);
        let snap = MeasurementSnapshot::default();
        e.trigger(&pack, &snap); // Initialization -> Initialized
        e.trigger(&pack, &snap); // Initialized -> CheckBalancing
        e.set_state_request(BalancingRequest::GlobalEnable);
        e
    }

    fn snapshot_with_spread() -> MeasurementSnapshot {
        let mut snap = MeasurementSnapshot::default();
        for s in StringIndex::all() {
            let sm = &mut snap.strings[s.get()];
            sm.min_cell_mv = 3700;
            sm.max_cell_temp_ddegc = 300;
            for m in ModuleIndex::all() {
                for cb in CellBlockIndex::all() {
                    sm.cell_block_mv[m.get()][cb.get()] = 3700;
                }
            }
        }
        // Bump one cell well above the string minimum.
        snap.strings[0].cell_block_mv[0][0] = 3750;
        snap
    }

    #[test]
    fn stays_in_check_balancing_when_not_at_rest() {
        let mut e = initialized_engine();
        let pack = AlwaysAtRest(false);
        let snap = snapshot_with_spread();
        e.trigger(&pack, &snap);
        assert_eq!(e.phase, Phase::CheckBalancing);
        assert!(!e.is_active());
    }

    #[test]
    fn activates_selected_cells_at_rest() {
        let mut e = initialized_engine();
        let pack = AlwaysAtRest(true);
        let snap = snapshot_with_spread();
        e.trigger(&pack, &snap); // CheckBalancing -> Balancing(Entry)
        e.trigger(&pack, &snap); // Entry -> CheckLowestVoltage
        e.trigger(&pack, &snap); // CheckLowestVoltage -> CheckCurrent
        e.trigger(&pack, &snap); // CheckCurrent -> Activate
        e.trigger(&pack, &snap); // Activate: sweep
        assert!(e.is_active());
        let s0 = StringIndex::new(0).unwrap();
        let m0 = ModuleIndex::new(0).unwrap();
        let cb0 = CellBlockIndex::new(0).unwrap();
        assert!(e.is_cell_activated(s0, m0, cb0));
    }

    #[test]
    fn under_voltage_guard_blocks_balancing() {
        let mut e = initialized_engine();
        let pack = AlwaysAtRest(true);
        let mut snap = snapshot_with_spread();
        snap.strings[0].min_cell_mv = BalancingConfig::default().lower_voltage_limit_mv;
        e.trigger(&pack, &snap); // -> Balancing(Entry)
        e.trigger(&pack, &snap); // Entry -> CheckLowestVoltage
        e.trigger(&pack, &snap); // guard trips -> CheckBalancing
        assert_eq!(e.phase, Phase::CheckBalancing);
        assert!(!e.is_active());
    }

    #[test]
    fn global_disable_clears_everything_immediately() {
        let mut e = initialized_engine();
        let pack = AlwaysAtRest(true);
        let snap = snapshot_with_spread();
        e.trigger(&pack, &snap);
        e.trigger(&pack, &snap);
        e.trigger(&pack, &snap);
        e.trigger(&pack, &snap);
        e.trigger(&pack, &snap);
        assert!(e.is_active());
        e.set_state_request(BalancingRequest::GlobalDisable);
        assert!(!e.is_active());
        assert_eq!(e.phase, Phase::GlobalDisable);
    }

    #[test]
    fn repeated_global_disable_is_a_no_op() {
        let mut e = initialized_engine();
        e.set_state_request(BalancingRequest::GlobalDisable);
        assert_eq!(e.set_state_request(BalancingRequest::GlobalDisable), BalRequestResult::AlreadyInRequestedState);
    }

    #[test]
    fn init_request_outside_uninitialized_is_illegal() {
        let mut e = BalancingEngine::new(BalancingConfig::default());
        assert_eq!(e.set_state_request(BalancingRequest::Init), BalRequestResult::Ok);
        let result = e.set_state_request(BalancingRequest::Init);
        assert_eq!(result, BalRequestResult::IllegalRequest);
        assert_eq!(e.illegal_request_count(), 1);
    }
}
