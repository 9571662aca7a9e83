//! Compile-time configuration parameters.
//!
//! Pack topology (`NR_*` sizes) is fixed at compile time because every
//! per-string/per-module/per-cell-block array in the core is statically
//! allocated — there is no heap. Timing parameters are expressed as tick
//! counts of the owning task, not milliseconds, per the tick-vs-wall-clock
//! rule the state machines depend on (10 ms ticks for the pack orchestrator,
//! 100 ms ticks for the balancing engine).

/// Number of parallel strings in the pack.
pub const NR_STRINGS: usize = 3;
/// Number of modules per string.
pub const NR_MODULES_PER_STRING: usize = 2;
/// Number of cell blocks per module.
pub const NR_CELL_BLOCKS_PER_MODULE: usize = 12;

const _: () = assert!(NR_STRINGS > 0, "pack must have at least one string");
const _: () = assert!(NR_STRINGS <= 16, "StringSet is backed by a u16 bitset");
const _: () = assert!(NR_MODULES_PER_STRING > 0);
const _: () = assert!(NR_CELL_BLOCKS_PER_MODULE > 0);

/// Pack orchestrator timing, selection and fault thresholds.
///
/// Grounded on `bms_cfg.h`: every field here has a direct counterpart in the
/// original compile-time macro set, kept in the same units (ticks of the
/// 10 ms pack task, mV, mA).
#[derive(Debug, Clone, Copy)]
pub struct PackTimingConfig {
    /// Ticks to wait after closing the minus contactor before checking feedback.
    pub t_wait_minus: u32,
    /// Ticks to wait after closing the precharge contactor before sampling.
    pub t_wait_precharge: u32,
    /// Ticks to wait after closing the plus contactor before checking feedback.
    pub t_wait_plus: u32,
    /// Ticks to wait after opening the precharge contactor.
    pub t_wait_after_opening_precharge: u32,
    /// Ticks to wait after a failed precharge attempt before retrying.
    pub t_wait_after_precharge_fail: u32,
    /// Ticks allowed to observe the precharge voltage/current condition.
    pub precharge_close_timeout: u32,
    /// Ticks allowed for precharge contactor to report open.
    pub precharge_open_timeout: u32,
    /// Ticks allowed for a string-close sequence before declaring timeout.
    pub string_close_timeout: u32,
    /// Ticks allowed for a string-open sequence before declaring timeout.
    pub string_open_timeout: u32,
    /// Settle time after a string closes, in ticks, before the next string
    /// close is attempted.
    pub time_wait_after_string_closed: u32,
    /// Settle time after a string opens, in ticks.
    pub time_wait_after_opening_string: u32,
    /// Number of precharge retries allowed before deactivating a string.
    pub precharge_tries: u8,
    /// Precharge success window: `|string_voltage - pack_voltage| <= this`.
    pub precharge_voltage_threshold_mv: i32,
    /// Precharge success window: `|precharge_current| <= this`.
    pub precharge_current_threshold_ma: i32,
    /// Ticks after an open/close cycle before the same string may close again.
    pub oscillation_timeout: u32,
    /// Max voltage difference (mV) between strings to allow closing the next one.
    pub next_string_voltage_limit_mv: i32,
    /// Max average string current (mA) to allow closing the next string.
    pub average_string_current_limit_ma: i32,
    /// Ticks to wait for `next_string_voltage_limit_mv` to be satisfied.
    pub next_string_closed_timer: u32,
}

impl Default for PackTimingConfig {
    fn default() -> Self {
        Self {
            t_wait_minus: 5,
            t_wait_precharge: 5,
            t_wait_plus: 5,
            t_wait_after_opening_precharge: 50,
            t_wait_after_precharge_fail: 300,
            precharge_close_timeout: 500,
            precharge_open_timeout: 500,
            string_close_timeout: 500,
            string_open_timeout: 1000,
            time_wait_after_string_closed: 20,
            time_wait_after_opening_string: 10,
            precharge_tries: 3,
            precharge_voltage_threshold_mv: 1000,
            precharge_current_threshold_ma: 50,
            oscillation_timeout: 1000,
            next_string_voltage_limit_mv: 3000,
            average_string_current_limit_ma: 20_000,
            next_string_closed_timer: 20,
        }
    }
}

/// Current-flow classification thresholds (§4.H.8).
#[derive(Debug, Clone, Copy)]
pub struct CurrentFlowConfig {
    /// Magnitude below which current is considered "at rest", in mA.
    pub i_rest_threshold_ma: i32,
    /// Continuous duration below threshold required to latch `at_rest`, ms.
    pub rest_time_ms: u32,
    /// Window after leaving an active current for which state is `relaxation`, ms.
    pub relaxation_time_ms: u32,
}

impl Default for CurrentFlowConfig {
    fn default() -> Self {
        Self {
            i_rest_threshold_ma: 500,
            rest_time_ms: 2_000,
            relaxation_time_ms: 600_000,
        }
    }
}

/// Balancing engine thresholds (§4.G). Ticks are of the 100 ms balancing task.
#[derive(Debug, Clone, Copy)]
pub struct BalancingConfig {
    /// Default bleed threshold above the string minimum, mV.
    pub base_threshold_mv: u16,
    /// Hysteresis subtracted from the threshold while a sweep is selecting cells.
    pub hysteresis_mv: u16,
    /// Cells at or below this voltage are never balanced.
    pub lower_voltage_limit_mv: u16,
    /// Cells at or above this temperature stop all balancing.
    pub upper_temperature_limit_ddegc: i16,
    /// Whether the reduced (threshold - hysteresis) value persists into the
    /// next `check_balancing -> balancing` entry, or resets to
    /// `base_threshold_mv` every time the machine leaves `balancing`.
    ///
    /// The original firmware's behavior here is ambiguous (see design notes);
    /// both modes are implemented and selectable.
    pub threshold_persists_across_idle: bool,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self {
            base_threshold_mv: 20,
            hysteresis_mv: 5,
            lower_voltage_limit_mv: 2700,
            upper_temperature_limit_ddegc: 600,
            threshold_persists_across_idle: false,
        }
    }
}

/// Task-health monitor declared cycle/jitter budgets (§4.E, §6.4).
#[derive(Debug, Clone, Copy)]
pub struct TaskTimingConfig {
    pub cycle_ms: u32,
    pub max_jitter_ms: u32,
}

/// Per-task declared timing, indexed by [`crate::task_health::TaskId`].
#[derive(Debug, Clone, Copy)]
pub struct TaskHealthConfig {
    pub engine: TaskTimingConfig,
    pub task_1ms: TaskTimingConfig,
    pub task_10ms: TaskTimingConfig,
    pub task_100ms: TaskTimingConfig,
    pub task_100ms_algorithm: TaskTimingConfig,
}

impl Default for TaskHealthConfig {
    fn default() -> Self {
        Self {
            engine: TaskTimingConfig { cycle_ms: 1, max_jitter_ms: 1 },
            task_1ms: TaskTimingConfig { cycle_ms: 1, max_jitter_ms: 1 },
            task_10ms: TaskTimingConfig { cycle_ms: 10, max_jitter_ms: 2 },
            task_100ms: TaskTimingConfig { cycle_ms: 100, max_jitter_ms: 5 },
            task_100ms_algorithm: TaskTimingConfig { cycle_ms: 100, max_jitter_ms: 10 },
        }
    }
}

impl TaskHealthConfig {
    fn of(&self, task: crate::task_health::TaskId) -> TaskTimingConfig {
        use crate::task_health::TaskId;
        match task {
            TaskId::Engine => self.engine,
            TaskId::Task1ms => self.task_1ms,
            TaskId::Task10ms => self.task_10ms,
            TaskId::Task100ms => self.task_100ms,
            TaskId::Task100msAlgorithm => self.task_100ms_algorithm,
        }
    }

    pub fn cycle_ms(&self, task: crate::task_health::TaskId) -> u32 {
        self.of(task).cycle_ms
    }

    pub fn jitter_ms(&self, task: crate::task_health::TaskId) -> u32 {
        self.of(task).max_jitter_ms
    }
}

/// SOC estimator constants (§4.F).
#[derive(Debug, Clone, Copy)]
pub struct SocConfig {
    /// Nominal string capacity in ampere-seconds, used for coulomb-count scaling.
    pub string_capacity_as: f32,
    /// Nominal string capacity in milliampere-seconds, used for plain current
    /// integration (no coulomb-counter present).
    pub string_capacity_ma_s: f32,
    /// Discharge-current polarity convention: `true` means a positive
    /// `current_mA` reading represents discharge current. The core negates
    /// SOC deltas exactly once, at ingest, according to this flag (see
    /// design notes on the single polarity contract).
    pub positive_discharge_current: bool,
    /// Whether each string's current sensor exposes a dedicated coulomb
    /// counter. Hardware wiring, not a runtime measurement, so it lives in
    /// config rather than [`crate::measurement::StringMeasurement`].
    pub coulomb_counter_present: [bool; NR_STRINGS],
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            string_capacity_as: 3600.0 * 100.0,
            string_capacity_ma_s: 3600.0 * 100.0 * 1000.0,
            positive_discharge_current: true,
            coulomb_counter_present: [true; NR_STRINGS],
        }
    }
}

/// Plausibility/guard/safety-limit thresholds (§3 "absolute bounds", §7).
///
/// Defaults are calibrated against the simulated plant's steady-state
/// readings (`adapters::hardware::SimulatedPlant`) so a healthy simulation
/// run never spuriously trips one of these.
#[derive(Debug, Clone, Copy)]
pub struct SafetyLimitsConfig {
    /// Max allowed `max_cell_mv - min_cell_mv` within a string before
    /// `CellVoltageSpread` latches.
    pub cell_voltage_spread_max_mv: u16,
    /// Max allowed `max_cell_temp_ddegc - min_cell_temp_ddegc` within a
    /// string before `CellTemperatureSpread` latches.
    pub cell_temperature_spread_max_ddegc: i16,
    /// Lower bound on plausible pack voltage while the pack is energized
    /// (at least one string closed), mV.
    pub pack_voltage_min_mv: u32,
    /// Upper bound on plausible pack voltage while the pack is energized, mV.
    pub pack_voltage_max_mv: u32,
    /// Hard overcurrent limit, mA (magnitude, either polarity).
    pub overcurrent_limit_ma: i32,
    /// Hard overvoltage limit, mV.
    pub overvoltage_limit_mv: u32,
    /// Hard overtemperature limit, in tenths of a degree C.
    pub overtemperature_limit_ddegc: i16,
    /// Below this insulation resistance, `CriticalLowInsulationResistance`
    /// latches (§3 glossary "Interlock"), kOhm.
    pub insulation_resistance_min_kohm: u32,
}

impl Default for SafetyLimitsConfig {
    fn default() -> Self {
        Self {
            cell_voltage_spread_max_mv: 200,
            cell_temperature_spread_max_ddegc: 150,
            pack_voltage_min_mv: 50_000,
            pack_voltage_max_mv: 600_000,
            overcurrent_limit_ma: 300_000,
            overvoltage_limit_mv: 420_000,
            overtemperature_limit_ddegc: 600,
            insulation_resistance_min_kohm: 100,
        }
    }
}

/// Command intake debounce/rate-limit parameters (§4.I).
#[derive(Debug, Clone, Copy)]
pub struct CommandIntakeConfig {
    /// Window after which a repeated identical `requested_mode` is still
    /// forwarded as pending (slot considered stale), ms.
    pub request_update_window_ms: u32,
    /// Maximum accepted requests per second before frames are dropped.
    pub max_requests_per_second: u32,
}

impl Default for CommandIntakeConfig {
    fn default() -> Self {
        Self {
            request_update_window_ms: 3_000,
            max_requests_per_second: 20,
        }
    }
}

/// Top-level compile-time configuration, grouped by owning component.
#[derive(Debug, Clone, Copy, Default)]
pub struct BmsConfig {
    pub pack_timing: PackTimingConfig,
    pub current_flow: CurrentFlowConfig,
    pub balancing: BalancingConfig,
    pub task_health: TaskHealthConfig,
    pub soc: SocConfig,
    pub command_intake: CommandIntakeConfig,
    pub safety_limits: SafetyLimitsConfig,
}

impl BmsConfig {
    /// Sanity-check every parameter; called once at startup. Several fields
    /// are cross-referential (e.g. hysteresis must not exceed the base
    /// threshold), which is easiest to express against a concrete instance
    /// rather than as freestanding `const` assertions.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pack_timing.precharge_tries == 0 {
            return Err("precharge_tries must be > 0");
        }
        if self.balancing.hysteresis_mv > self.balancing.base_threshold_mv {
            return Err("balancing hysteresis must not exceed base threshold");
        }
        if self.soc.string_capacity_as <= 0.0 || self.soc.string_capacity_ma_s <= 0.0 {
            return Err("string capacity must be positive");
        }
        if self.command_intake.max_requests_per_second == 0 {
            return Err("max_requests_per_second must be > 0");
        }
        if self.safety_limits.pack_voltage_min_mv >= self.safety_limits.pack_voltage_max_mv {
            return Err("pack_voltage_min_mv must be less than pack_voltage_max_mv");
        }
        Ok(())
    }
}
