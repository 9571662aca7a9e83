//! Periodic Driver (§4.J).
//!
//! A single cooperative loop stands in for the five preemptive FreeRTOS
//! tasks the original firmware runs (`ftsk_taskEngine`, `ftsk_task1ms`,
//! `ftsk_task10ms`, `ftsk_task100ms`, `ftsk_task100msAlgorithm`): each tick
//! of the driver checks every task's due time against [`TaskHealthConfig`]'s
//! declared `cycle_ms`, and calls the matching [`Core`] task body at most
//! once per `run()` invocation, highest priority first, so a single slow
//! call never starves a higher-priority one within the same tick.
//!
//! The driver does not itself measure jitter against the task's budget —
//! that is [`TaskHealthMonitor`](crate::task_health::TaskHealthMonitor)'s
//! job, driven from inside [`Core::run_engine_task`]. The driver only
//! decides *when* to call each task body.

use log::info;

use crate::app::events::EventSink;
use crate::app::service::Core;
use crate::clock::TickSource;
use crate::command_intake;
use crate::config::TaskHealthConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::measurement::{ContactorState, MeasurementSnapshot};
use crate::nvm::StorageBackend;
use crate::task_health::TaskId;

/// Per-task next-due bookkeeping, in priority order (highest first).
struct TaskSchedule {
    task: TaskId,
    cycle_ms: u32,
    next_due: Option<crate::clock::Deadline>,
}

/// Drives [`Core`]'s periodic task bodies from a single-threaded tick loop.
///
/// A table of independently timed entries advanced once per call, the same
/// shape as a calendar scheduler but keyed on fixed task cadences instead
/// of wall-clock schedules.
pub struct PeriodicDriver {
    schedules: [TaskSchedule; 5],
}

impl PeriodicDriver {
    pub fn new(config: &TaskHealthConfig) -> Self {
        let mk = |task: TaskId| TaskSchedule { task, cycle_ms: config.cycle_ms(task), next_due: None };
        Self {
            schedules: [
                mk(TaskId::Engine),
                mk(TaskId::Task1ms),
                mk(TaskId::Task10ms),
                mk(TaskId::Task100ms),
                mk(TaskId::Task100msAlgorithm),
            ],
        }
    }

    /// Run every task whose cycle has elapsed, in priority order. Intended
    /// to be called as often as the host loop can manage (at least as
    /// often as the fastest task's cycle, nominally 1 ms).
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        core: &mut Core,
        measurements: &MeasurementSnapshot,
        contactors: &mut ContactorState,
        backend: &mut dyn StorageBackend,
        diag_sink: &mut dyn DiagnosticsSink,
        event_sink: &mut dyn EventSink,
        now_ms: u32,
    ) {
        command_intake::set_current_tick_ms(now_ms);

        for sched in &mut self.schedules {
            if let Some(due) = sched.next_due {
                if !crate::clock::expired(due, now_ms) {
                    continue;
                }
            }
            sched.next_due = Some(crate::clock::deadline(now_ms, sched.cycle_ms));

            match sched.task {
                TaskId::Engine => core.run_engine_task(now_ms, backend, diag_sink),
                TaskId::Task1ms => core.run_task_1ms(now_ms),
                TaskId::Task10ms => core.run_task_10ms(measurements, contactors, diag_sink, now_ms, event_sink),
                TaskId::Task100ms => core.run_task_100ms(measurements, now_ms),
                TaskId::Task100msAlgorithm => core.run_task_100ms_algorithm(measurements, now_ms, diag_sink),
            }
        }
    }
}

/// Runs [`PeriodicDriver`] against a real [`TickSource`] in a blocking
/// loop; used by the simulation binary. Exits only if `should_stop`
/// returns `true`, since the real firmware's task loop never returns.
pub fn run_forever(
    driver: &mut PeriodicDriver,
    core: &mut Core,
    clock: &dyn TickSource,
    plant: &crate::adapters::hardware::SimulatedPlant,
    contactors: &mut ContactorState,
    backend: &mut dyn StorageBackend,
    diag_sink: &mut dyn DiagnosticsSink,
    event_sink: &mut dyn EventSink,
    mut should_stop: impl FnMut(u32) -> bool,
) {
    info!("periodic driver starting");
    loop {
        let now_ms = clock.now_ms();
        if should_stop(now_ms) {
            break;
        }
        plant.step_contactors(contactors, now_ms);
        let measurements = plant.measure(now_ms);
        driver.run(core, &measurements, contactors, backend, diag_sink, event_sink, now_ms);
    }
}
