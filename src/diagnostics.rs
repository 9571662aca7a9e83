//! Diagnostics Bus (§4.C).
//!
//! A sink for `(event_id, severity, subsystem, index)` tuples reported by
//! every other component. Each event id carries a static configuration —
//! the cooldown window between two reports being treated as a fresh
//! transition, whether the condition is persistent (requires an explicit
//! `clear()`/`clear_all_persistent()` rather than clearing itself on the
//! next `Ok` report), and whether it contributes to the fatal aggregate the
//! pack orchestrator polls every tick. Reporting the same state repeatedly
//! is a no-op — slots only transition, they don't re-arm on every call.
//!
//! The bus itself only tracks latched state; where a report ultimately goes
//! (serial log, CAN telemetry, a host-side dashboard) is the job of a
//! [`DiagnosticsSink`] implementation, out of scope here.

use heapless::Vec;

const MAX_SLOTS: usize = 96;

/// Identity of a reportable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    CellVoltageSpread,
    CellTemperatureSpread,
    PackVoltageOutOfBounds,
    ContactorFeedbackMismatch,
    ContactorInPositivePathOfString,
    ContactorInNegativePathOfString,
    PrechargeAbortedDueToVoltage,
    PrechargeAbortedDueToCurrent,
    IllegalRequest,
    TaskTimingViolation,
    InterlockOpened,
    MainFuseBlown,
    CriticalLowInsulationResistance,
    NvmReadCrcError,
    NvmWriteError,
    Overcurrent,
    Overvoltage,
    Overtemperature,
}

/// Which subsystem raised the event; kept distinct from `EventId` because
/// several components can raise the same kind of event (e.g. both the pack
/// orchestrator and the balancing engine can report plausibility faults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Contactor,
    PackOrchestrator,
    BalancingEngine,
    TaskHealth,
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Ok,
    NotOk,
}

/// Static configuration for one event id, looked up on every report.
#[derive(Debug, Clone, Copy)]
pub struct EventConfig {
    /// Minimum spacing between two `NotOk` reports for the second to be
    /// treated as a fresh transition rather than a duplicate.
    pub cooldown_ms: u32,
    /// If true, the event stays active across `Ok` reports until explicitly
    /// cleared; if false, an `Ok` report immediately clears it.
    pub persistent: bool,
    /// Whether an active occurrence of this event counts toward
    /// `is_any_fatal_set()`.
    pub contributes_to_fatal: bool,
    /// Minimum active-delay window (ms) the pack orchestrator should apply
    /// before acting on this event rising, per §4.H.7. Irrelevant for
    /// non-fatal events.
    pub fatal_delay_ms: u32,
}

impl EventId {
    pub const fn config(self) -> EventConfig {
        use EventId::*;
        match self {
            CellVoltageSpread | CellTemperatureSpread | PackVoltageOutOfBounds => EventConfig {
                cooldown_ms: 100,
                persistent: true,
                contributes_to_fatal: true,
                fatal_delay_ms: 500,
            },
            ContactorFeedbackMismatch
            | ContactorInPositivePathOfString
            | ContactorInNegativePathOfString => EventConfig {
                cooldown_ms: 0,
                persistent: true,
                contributes_to_fatal: true,
                fatal_delay_ms: 0,
            },
            PrechargeAbortedDueToVoltage | PrechargeAbortedDueToCurrent => EventConfig {
                cooldown_ms: 0,
                persistent: true,
                contributes_to_fatal: false,
                fatal_delay_ms: 0,
            },
            IllegalRequest => EventConfig {
                cooldown_ms: 0,
                persistent: false,
                contributes_to_fatal: false,
                fatal_delay_ms: 0,
            },
            TaskTimingViolation => EventConfig {
                cooldown_ms: 0,
                persistent: true,
                contributes_to_fatal: false,
                fatal_delay_ms: 0,
            },
            InterlockOpened | MainFuseBlown => EventConfig {
                cooldown_ms: 0,
                persistent: true,
                contributes_to_fatal: true,
                fatal_delay_ms: 0,
            },
            CriticalLowInsulationResistance => EventConfig {
                cooldown_ms: 0,
                persistent: true,
                contributes_to_fatal: true,
                fatal_delay_ms: 1_000,
            },
            NvmReadCrcError | NvmWriteError => EventConfig {
                cooldown_ms: 1_000,
                persistent: false,
                contributes_to_fatal: false,
                fatal_delay_ms: 0,
            },
            Overcurrent | Overvoltage | Overtemperature => EventConfig {
                cooldown_ms: 0,
                persistent: true,
                contributes_to_fatal: true,
                fatal_delay_ms: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Key {
    event: EventId,
    subsystem: Subsystem,
    index: u8,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: Key,
    active: bool,
    last_report_tick: u32,
}

/// Out-of-scope collaborator: wherever a report should ultimately surface
/// (log line, CAN telemetry frame, host dashboard). The bus calls this on
/// every state transition, not on every duplicate report.
pub trait DiagnosticsSink {
    fn on_transition(&mut self, key_event: EventId, subsystem: Subsystem, index: u8, active: bool);
}

/// No-op sink used where diagnostics output is not wired up (tests).
#[derive(Default)]
pub struct NullSink;
impl DiagnosticsSink for NullSink {
    fn on_transition(&mut self, _event: EventId, _subsystem: Subsystem, _index: u8, _active: bool) {}
}

/// Diagnostics Bus (§4.C).
#[derive(Default)]
pub struct DiagnosticsBus {
    slots: Vec<Slot, MAX_SLOTS>,
}

impl DiagnosticsBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, key: Key) -> Option<usize> {
        self.slots.iter().position(|s| s.key == key)
    }

    fn find_or_insert(&mut self, key: Key) -> usize {
        if let Some(i) = self.find(key) {
            return i;
        }
        let _ = self.slots.push(Slot { key, active: false, last_report_tick: 0 });
        self.slots.len() - 1
    }

    /// Report a condition. Idempotent: reporting the same severity again
    /// for an already-active/inactive slot does not re-trigger the sink.
    pub fn report(
        &mut self,
        event: EventId,
        severity: Severity,
        subsystem: Subsystem,
        index: u8,
        now_ms: u32,
        sink: &mut dyn DiagnosticsSink,
    ) {
        let cfg = event.config();
        let key = Key { event, subsystem, index };
        let i = self.find_or_insert(key);
        let slot = &mut self.slots[i];

        match severity {
            Severity::NotOk => {
                let within_cooldown = slot.active
                    && crate::clock::elapsed_since(slot.last_report_tick, now_ms) < cfg.cooldown_ms;
                if !slot.active || !within_cooldown {
                    if !slot.active {
                        slot.active = true;
                        sink.on_transition(event, subsystem, index, true);
                    }
                    slot.last_report_tick = now_ms;
                }
            }
            Severity::Ok => {
                if slot.active && !cfg.persistent {
                    slot.active = false;
                    sink.on_transition(event, subsystem, index, false);
                }
                // Persistent events require an explicit clear(); an Ok
                // report is recorded but does not deactivate the slot.
            }
        }
    }

    /// Clear one specific event regardless of its persistence setting.
    pub fn clear(&mut self, event: EventId, subsystem: Subsystem, index: u8, sink: &mut dyn DiagnosticsSink) {
        let key = Key { event, subsystem, index };
        if let Some(i) = self.find(key) {
            if self.slots[i].active {
                self.slots[i].active = false;
                sink.on_transition(event, subsystem, index, false);
            }
        }
    }

    /// Clear every persistent event currently latched (used by
    /// `clear_persistent_flags` in the command-intake wire frame).
    pub fn clear_all_persistent(&mut self, sink: &mut dyn DiagnosticsSink) {
        for slot in &mut self.slots {
            if slot.active && slot.key.event.config().persistent {
                slot.active = false;
                sink.on_transition(slot.key.event, slot.key.subsystem, slot.key.index, false);
            }
        }
    }

    /// True if any active event contributes to the fatal aggregate.
    pub fn is_any_fatal_set(&self) -> bool {
        self.slots.iter().any(|s| s.active && s.key.event.config().contributes_to_fatal)
    }

    /// Minimum `fatal_delay_ms` across every currently-active fatal event,
    /// used to size the pack orchestrator's `error_delay_remaining_ms`
    /// window (§4.H.7). Returns `None` if no fatal event is active.
    pub fn min_active_fatal_delay_ms(&self) -> Option<u32> {
        self.slots
            .iter()
            .filter(|s| s.active && s.key.event.config().contributes_to_fatal)
            .map(|s| s.key.event.config().fatal_delay_ms)
            .min()
    }

    pub fn is_active(&self, event: EventId, subsystem: Subsystem, index: u8) -> bool {
        self.find(Key { event, subsystem, index })
            .is_some_and(|i| self.slots[i].active)
    }
}
