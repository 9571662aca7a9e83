//! Simulated measurement/contactor adapter.
//!
//! Bridges the domain core to a simple in-process plant model instead of
//! real analog-front-end and contactor-driver peripherals (both explicitly
//! out of scope, §1). Contactor feedback tracks the last commanded state
//! with one tick of latency, the simplest model that still exercises the
//! pack orchestrator's feedback-mismatch guard meaningfully in simulation.

use crate::config::NR_STRINGS;
use crate::measurement::{ContactorFeedback, ContactorState, MeasurementSnapshot, PackMeasurement, StringMeasurement};

/// A minimal constant-OCV, no-internal-resistance string model: enough to
/// drive the pack orchestrator and balancing engine through their state
/// machines without claiming any electrical fidelity.
#[derive(Debug, Clone, Copy)]
struct StringPlant {
    cell_mv: u16,
    temp_ddegc: i16,
}

impl Default for StringPlant {
    fn default() -> Self {
        Self { cell_mv: 3700, temp_ddegc: 250 }
    }
}

/// Owns the simulated plant and reflects contactor commands into feedback.
pub struct SimulatedPlant {
    strings: [StringPlant; NR_STRINGS],
}

impl Default for SimulatedPlant {
    fn default() -> Self {
        Self { strings: [StringPlant::default(); NR_STRINGS] }
    }
}

impl SimulatedPlant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh measurement snapshot from current plant state.
    pub fn measure(&self, now_ms: u32) -> MeasurementSnapshot {
        let mut snap = MeasurementSnapshot::default();
        for (i, plant) in self.strings.iter().enumerate() {
            snap.strings[i] = StringMeasurement {
                min_cell_mv: plant.cell_mv,
                avg_cell_mv: plant.cell_mv,
                max_cell_mv: plant.cell_mv,
                min_cell_temp_ddegc: plant.temp_ddegc,
                max_cell_temp_ddegc: plant.temp_ddegc,
                string_current_ma: 0,
                string_voltage_mv: u32::from(plant.cell_mv) * 96,
                coulomb_count_as: 0.0,
                cell_block_mv: [[plant.cell_mv; crate::config::NR_CELL_BLOCKS_PER_MODULE]; crate::config::NR_MODULES_PER_STRING],
                timestamp_ms: now_ms,
            };
        }
        snap.pack = PackMeasurement {
            pack_voltage_mv: snap.strings[0].string_voltage_mv,
            pack_current_ma: 0,
            insulation_resistance_kohm: 5_000,
            interlock_closed: true,
            main_fuse_intact: true,
            timestamp_ms: now_ms,
        };
        snap
    }

    /// Advance contactor feedback one step toward its commanded state.
    pub fn step_contactors(&self, contactors: &mut ContactorState, now_ms: u32) {
        for s in contactors.strings.iter_mut() {
            for c in [&mut s.plus, &mut s.minus, &mut s.precharge] {
                c.feedback = match c.command {
                    crate::measurement::ContactorCommand::Open => ContactorFeedback::Open,
                    crate::measurement::ContactorCommand::Close => ContactorFeedback::Closed,
                };
                c.last_command_timestamp_ms = now_ms;
            }
        }
    }
}
