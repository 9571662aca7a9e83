//! Measurement Snapshot (§3, §4.D) and Contactor State (§3).
//!
//! `MeasurementSnapshot` is owned by the driver layer (analog front-end and
//! current-sensor HAL, explicitly out of scope here) and read-only from the
//! core's perspective; the core only ever sees [`MeasurementSnapshot`]
//! values handed to it at the top of a tick, never a live reference into
//! the producer's double buffer. A real driver publishes a new snapshot by
//! writing into an off-screen buffer and swapping a pointer — the "partial
//! frames are never exposed" invariant lives entirely in that adapter; this
//! type only has to represent the result.

use heapless::Vec;

use crate::config::{NR_CELL_BLOCKS_PER_MODULE, NR_MODULES_PER_STRING, NR_STRINGS};
use crate::types::StringIndex;

/// Per-string measurement values, all carrying the timestamp (ms) of the
/// sample they were derived from.
#[derive(Debug, Clone, Copy)]
pub struct StringMeasurement {
    pub min_cell_mv: u16,
    pub avg_cell_mv: u16,
    pub max_cell_mv: u16,
    pub min_cell_temp_ddegc: i16,
    pub max_cell_temp_ddegc: i16,
    pub string_current_ma: i32,
    pub string_voltage_mv: u32,
    /// Cumulative coulomb count in ampere-seconds, from a dedicated
    /// current-sensor coulomb counter if present.
    pub coulomb_count_as: f32,
    /// Per-cell-block voltage, needed by the balancing engine's per-cell
    /// selection sweep (§4.G); the string-level min/avg/max fields above
    /// cannot answer "is this specific cell above the string minimum".
    pub cell_block_mv: [[u16; NR_CELL_BLOCKS_PER_MODULE]; NR_MODULES_PER_STRING],
    pub timestamp_ms: u32,
}

impl Default for StringMeasurement {
    fn default() -> Self {
        Self {
            min_cell_mv: 0,
            avg_cell_mv: 0,
            max_cell_mv: 0,
            min_cell_temp_ddegc: 0,
            max_cell_temp_ddegc: 0,
            string_current_ma: 0,
            string_voltage_mv: 0,
            coulomb_count_as: 0.0,
            cell_block_mv: [[0; NR_CELL_BLOCKS_PER_MODULE]; NR_MODULES_PER_STRING],
            timestamp_ms: 0,
        }
    }
}

/// Pack-level scalar measurements.
#[derive(Debug, Clone, Copy)]
pub struct PackMeasurement {
    pub pack_voltage_mv: u32,
    pub pack_current_ma: i32,
    pub insulation_resistance_kohm: u32,
    /// External safety interlock loop feedback; `false` means the loop is
    /// open and signals an emergency shutdown request (§3 glossary
    /// "Interlock").
    pub interlock_closed: bool,
    /// Main fuse continuity feedback; `false` means the fuse has blown.
    pub main_fuse_intact: bool,
    pub timestamp_ms: u32,
}

impl Default for PackMeasurement {
    /// `interlock_closed`/`main_fuse_intact` default `true` and
    /// `insulation_resistance_kohm` defaults to a safe high reading: an
    /// absent driver-layer measurement must never read as an active guard
    /// fault (§3: partial/unavailable frames are never exposed as faulted
    /// ones by this type).
    fn default() -> Self {
        Self {
            pack_voltage_mv: 0,
            pack_current_ma: 0,
            insulation_resistance_kohm: 100_000,
            interlock_closed: true,
            main_fuse_intact: true,
            timestamp_ms: 0,
        }
    }
}

/// A complete, internally-consistent frame of measurement data.
///
/// Readers must compare `timestamp_ms` fields against the caller's
/// staleness threshold before trusting a given sub-frame; this type makes
/// no freshness guarantee on its own.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementSnapshot {
    pub strings: [StringMeasurement; NR_STRINGS],
    pub pack: PackMeasurement,
}

impl Default for MeasurementSnapshot {
    fn default() -> Self {
        Self {
            strings: [StringMeasurement::default(); NR_STRINGS],
            pack: PackMeasurement::default(),
        }
    }
}

impl MeasurementSnapshot {
    pub fn string(&self, s: StringIndex) -> &StringMeasurement {
        &self.strings[s.get()]
    }

    pub fn cell_block_mv(
        &self,
        s: StringIndex,
        m: crate::types::ModuleIndex,
        cb: crate::types::CellBlockIndex,
    ) -> u16 {
        self.strings[s.get()].cell_block_mv[m.get()][cb.get()]
    }

    /// `true` if the string's sub-frame is no older than `max_age_ms`.
    pub fn is_fresh(&self, s: StringIndex, now_ms: u32, max_age_ms: u32) -> bool {
        crate::clock::elapsed_since(self.string(s).timestamp_ms, now_ms) <= max_age_ms
    }

    /// Average string current across all non-deactivated strings, used by
    /// the multi-string closing guard (§4.H.5).
    pub fn average_string_current_ma(&self, exclude: crate::types::StringSet) -> i32 {
        let mut sum: i64 = 0;
        let mut count: i64 = 0;
        for s in StringIndex::all() {
            if exclude.contains(s) {
                continue;
            }
            sum += i64::from(self.string(s).string_current_ma);
            count += 1;
        }
        if count == 0 {
            0
        } else {
            (sum / count) as i32
        }
    }
}

// ---------------------------------------------------------------------------
// Contactor state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactorCommand {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactorFeedback {
    Open,
    Closed,
    Unknown,
}

/// One physical contactor's commanded state, observed feedback and the
/// timestamp of the last command issued to it.
#[derive(Debug, Clone, Copy)]
pub struct Contactor {
    pub command: ContactorCommand,
    pub feedback: ContactorFeedback,
    pub last_command_timestamp_ms: u32,
}

impl Default for Contactor {
    fn default() -> Self {
        Self {
            command: ContactorCommand::Open,
            feedback: ContactorFeedback::Unknown,
            last_command_timestamp_ms: 0,
        }
    }
}

/// The three contactors belonging to one string: plus, minus, precharge.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringContactors {
    pub plus: Contactor,
    pub minus: Contactor,
    pub precharge: Contactor,
}

impl StringContactors {
    /// Closed iff both plus and minus report closed feedback.
    pub fn is_closed(&self) -> bool {
        self.plus.feedback == ContactorFeedback::Closed
            && self.minus.feedback == ContactorFeedback::Closed
    }

    /// Precharging iff the precharge contactor reports closed and main-plus
    /// reports open.
    pub fn is_precharging(&self) -> bool {
        self.precharge.feedback == ContactorFeedback::Closed
            && self.plus.feedback == ContactorFeedback::Open
    }
}

/// All contactor state for the pack, indexed by string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactorState {
    pub strings: [StringContactors; NR_STRINGS],
}

impl ContactorState {
    pub fn string(&self, s: StringIndex) -> &StringContactors {
        &self.strings[s.get()]
    }

    pub fn string_mut(&mut self, s: StringIndex) -> &mut StringContactors {
        &mut self.strings[s.get()]
    }
}

/// A cell-block address within the pack: `(string, module, cell_block)`.
/// Used by the balancing engine's `activate` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellAddress {
    pub string: StringIndex,
    pub module: crate::types::ModuleIndex,
    pub cell_block: crate::types::CellBlockIndex,
}

/// Enumerate every valid cell-block address in the pack.
pub fn all_cell_addresses() -> Vec<CellAddress, { NR_STRINGS * NR_MODULES_PER_STRING * NR_CELL_BLOCKS_PER_MODULE }> {
    let mut out = Vec::new();
    for string in StringIndex::all() {
        for module in crate::types::ModuleIndex::all() {
            for cell_block in crate::types::CellBlockIndex::all() {
                let _ = out.push(CellAddress { string, module, cell_block });
            }
        }
    }
    out
}
