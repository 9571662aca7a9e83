//! Application core — the hexagonal aggregate root.
//!
//! [`Core`] owns exactly one instance of every state machine (§9: "global
//! mutable state becomes one owned value"). Each periodic task body
//! (`run_*`) borrows only the fields it needs for one `trigger()`/`compute()`
//! call; no borrow crosses a tick boundary.

use log::{info, warn};

use crate::balancing::{BalancingEngine, BalancingRequest};
use crate::command_intake::{BalancingRequestedState, CommandIntake, RequestedMode};
use crate::config::{BmsConfig, SocConfig};
use crate::diagnostics::{DiagnosticsBus, DiagnosticsSink, EventId, Severity, Subsystem};
use crate::error::PackRequestResult;
use crate::measurement::{ContactorState, MeasurementSnapshot};
use crate::nvm::records::SocRecord;
use crate::nvm::{NvmStore, RecordId, StorageBackend};
use crate::pack::{PackOrchestrator, PackRequest, Phase as PackPhase};
use crate::soc::SocEstimator;
use crate::task_health::{TaskHealthMonitor, TaskId};
use crate::types::StringIndex;

use super::commands::CoreCommand;
use super::events::{CoreEvent, EventSink, TelemetryFrame};

pub struct Core {
    pack: PackOrchestrator,
    balancing: BalancingEngine,
    soc: SocEstimator,
    soc_config: SocConfig,
    task_health: TaskHealthMonitor,
    command_intake: CommandIntake,
    diagnostics: DiagnosticsBus,
    nvm: NvmStore,
    soc_values: SocRecord,
    soc_initialized: bool,
}

impl Core {
    pub fn new(config: BmsConfig) -> Self {
        Self {
            pack: PackOrchestrator::new(config.pack_timing, config.current_flow, config.soc, config.safety_limits),
            balancing: BalancingEngine::new(config.balancing),
            soc: SocEstimator::new(config.soc),
            soc_config: config.soc,
            task_health: TaskHealthMonitor::new(config.task_health),
            command_intake: CommandIntake::new(config.command_intake),
            diagnostics: DiagnosticsBus::new(),
            nvm: NvmStore::new(),
            soc_values: SocRecord::default(),
            soc_initialized: false,
        }
    }

    /// Load every persisted record from `backend` and seed the respective
    /// component. Call once at boot, before any `run_*` task.
    pub fn restore_from_nvm(&mut self, backend: &dyn StorageBackend, now_ms: u32, sink: &mut dyn DiagnosticsSink) {
        let (sys_mon, sys_mon_result): (crate::nvm::records::SysMonSummaryRecord, _) =
            self.nvm.read(backend, RecordId::SysMonSummary);
        if sys_mon_result.is_err() {
            self.diagnostics.report(EventId::NvmReadCrcError, Severity::NotOk, Subsystem::Persistence, 0, now_ms, sink);
        }
        self.task_health.restore(sys_mon);

        let (soc, soc_result): (SocRecord, _) = self.nvm.read(backend, RecordId::Soc);
        if soc_result.is_err() {
            self.diagnostics.report(EventId::NvmReadCrcError, Severity::NotOk, Subsystem::Persistence, 1, now_ms, sink);
        }
        self.soc_values = soc;
    }

    /// Seed the SOC estimator for every string from the restored record.
    /// Requires `coulomb_counter_present`/`coulomb_count_as` per string from
    /// the measurement backend, since the core holds no opinion on whether
    /// a given string's AFE exposes a coulomb counter.
    pub fn initialize_soc(&mut self, measurements: &MeasurementSnapshot, now_ms: u32) {
        let persisted = self.soc_values;
        for s in StringIndex::all() {
            let sm = measurements.string(s);
            let has_cc = self.soc_config.coulomb_counter_present[s.get()];
            self.soc.initialize(s, has_cc, sm.coulomb_count_as, now_ms, &persisted, &mut self.soc_values);
        }
        self.soc_initialized = true;
    }

    pub fn issue_command(&mut self, cmd: CoreCommand, sink: &mut dyn DiagnosticsSink, now_ms: u32) {
        match cmd {
            CoreCommand::Pack(req) => {
                if self.pack.set_state_request(req) == PackRequestResult::IllegalRequest {
                    self.diagnostics.report(EventId::IllegalRequest, Severity::NotOk, Subsystem::PackOrchestrator, 0, now_ms, sink);
                }
            }
            CoreCommand::Balancing(req) => {
                let _ = self.balancing.set_state_request(req);
            }
            CoreCommand::ClearPersistentFlags => self.clear_persistent_flags(sink),
        }
    }

    /// §6.1: a set `clear_persistent_flags` bit clears every persistent
    /// diagnostics latch, resets task-health violations, and resets the
    /// balancing engine's illegal-request bookkeeping.
    fn clear_persistent_flags(&mut self, sink: &mut dyn DiagnosticsSink) {
        self.diagnostics.clear_all_persistent(sink);
        self.task_health.clear_all_violations();
        self.balancing.reset();
        info!("persistent flags cleared by external request");
    }

    /// Decode one incoming §6.1 request frame and apply its effects for this
    /// tick (mode request, balancing enable/threshold, clear-flags bit).
    pub fn receive_request_frame(&mut self, frame: &[u8; 8], now_ms: u32, sink: &mut dyn DiagnosticsSink) {
        self.command_intake.receive_bms_request(frame, now_ms);
        let slot = *self.command_intake.slot();

        if slot.clear_persistent_flags {
            self.clear_persistent_flags(sink);
        }

        let pack_req = match slot.pending_mode {
            RequestedMode::Standby => Some(PackRequest::Standby),
            RequestedMode::Normal => Some(PackRequest::Normal),
            RequestedMode::Charge => Some(PackRequest::Charge),
            RequestedMode::None => None,
        };
        if let Some(req) = pack_req {
            let _ = self.pack.set_state_request(req);
        }

        match slot.balancing_enable {
            BalancingRequestedState::On => {
                let _ = self.balancing.set_state_request(BalancingRequest::GlobalEnable);
            }
            BalancingRequestedState::Off => {
                let _ = self.balancing.set_state_request(BalancingRequest::GlobalDisable);
            }
            BalancingRequestedState::None => {}
        }
        if let Some(threshold) = slot.balancing_threshold_mv {
            self.balancing.set_threshold_mv(threshold);
        }
    }

    // -- periodic task bodies (§4.J), named after their cadence ------------

    /// Highest-priority task: detects tasks that have stopped notifying and
    /// flushes the task-health summary to NVM when it changes.
    pub fn run_engine_task(&mut self, now_ms: u32, backend: &mut dyn StorageBackend, sink: &mut dyn DiagnosticsSink) {
        self.task_health.notify(TaskId::Engine, now_ms);
        for overdue in self.task_health.check_notifications(now_ms) {
            warn!("task {:?} overdue", overdue);
            self.diagnostics.report(EventId::TaskTimingViolation, Severity::NotOk, Subsystem::TaskHealth, overdue as u8, now_ms, sink);
            let entry_tick = self.task_health.last_notify_tick(overdue);
            let violating_duration_ms = self.task_health.overdue_amount_ms(overdue, now_ms);
            self.task_health.record_violation(overdue, violating_duration_ms, entry_tick);
        }
        if let Some(summary) = self.task_health.flush_if_dirty() {
            if self.nvm.write(RecordId::SysMonSummary, &summary).is_err() {
                self.diagnostics.report(EventId::NvmWriteError, Severity::NotOk, Subsystem::Persistence, 0, now_ms, sink);
            }
        }
        if self.nvm.poll(backend).is_none() {
            // nothing queued this tick
        }
    }

    /// 1 ms task: the pack orchestrator's current-flow classification and
    /// fault-aggregate polling run inside `trigger()` itself, so this task
    /// only needs to keep the liveness notification current.
    pub fn run_task_1ms(&mut self, now_ms: u32) {
        self.task_health.notify(TaskId::Task1ms, now_ms);
    }

    /// 10 ms task: drives the pack orchestrator, the system's highest-rate
    /// safety-relevant state machine.
    pub fn run_task_10ms(
        &mut self,
        measurements: &MeasurementSnapshot,
        contactors: &mut ContactorState,
        sink: &mut dyn DiagnosticsSink,
        now_ms: u32,
        event_sink: &mut dyn EventSink,
    ) {
        self.task_health.notify(TaskId::Task10ms, now_ms);
        let before = self.pack.get_state();
        let closed_before = self.pack.closed_strings();
        let deactivated_before = self.pack.deactivated_strings();
        let latching_before = self.pack.is_transition_to_error_active();

        self.pack.trigger(measurements, contactors, &mut self.diagnostics, sink, now_ms);

        let after = self.pack.get_state();
        let closed_after = self.pack.closed_strings();
        let deactivated_after = self.pack.deactivated_strings();
        let latching_after = self.pack.is_transition_to_error_active();

        for s in closed_after.iter().filter(|s| !closed_before.contains(*s)) {
            event_sink.emit(CoreEvent::StringClosed(s));
        }
        for s in closed_before.iter().filter(|s| !closed_after.contains(*s)) {
            event_sink.emit(CoreEvent::StringOpened(s));
        }
        for s in deactivated_after.iter().filter(|s| !deactivated_before.contains(*s)) {
            event_sink.emit(CoreEvent::StringDeactivated(s));
        }
        if latching_after && !latching_before {
            event_sink.emit(CoreEvent::FaultLatchStarted);
        } else if latching_before && !latching_after {
            event_sink.emit(CoreEvent::FaultLatchAborted);
        }

        if after != before {
            event_sink.emit(CoreEvent::PackPhaseChanged { from: before, to: after });
            if after == PackPhase::Error {
                event_sink.emit(CoreEvent::FaultLatched);
            }
        }
    }

    /// 100 ms task: balancing only runs while the pack reports at-rest.
    pub fn run_task_100ms(&mut self, measurements: &MeasurementSnapshot, now_ms: u32) {
        self.task_health.notify(TaskId::Task100ms, now_ms);
        self.balancing.trigger(&self.pack, measurements);
        let _ = now_ms;
    }

    /// 100 ms algorithm task: the SOC estimator, run at the same cadence as
    /// balancing but kept on its own task per the original task split
    /// (`ftsk_task100msAlgorithm`).
    pub fn run_task_100ms_algorithm(&mut self, measurements: &MeasurementSnapshot, now_ms: u32, sink: &mut dyn DiagnosticsSink) {
        self.task_health.notify(TaskId::Task100msAlgorithm, now_ms);
        if !self.soc_initialized {
            return;
        }
        let at_rest = self.pack.get_battery_system_state() == crate::pack::CurrentFlowState::AtRest;
        self.soc.compute(at_rest, measurements, &mut self.soc_values);
        if self.nvm.write(RecordId::Soc, &self.soc_values).is_err() {
            self.diagnostics.report(EventId::NvmWriteError, Severity::NotOk, Subsystem::Persistence, 1, now_ms, sink);
        }
    }

    // -- queries -------------------------------------------------------

    pub fn telemetry(&self) -> TelemetryFrame {
        TelemetryFrame {
            pack_phase: self.pack.get_state(),
            connected_strings: self.pack.number_of_connected_strings(),
            soc_avg_perc: self.soc_values.avg_perc,
            balancing_active: self.balancing.is_active(),
            any_task_violation: self.task_health.get_recorded_violations().any_violation,
            any_fatal_fault: self.diagnostics.is_any_fatal_set(),
        }
    }

    pub fn pack(&self) -> &PackOrchestrator {
        &self.pack
    }

    pub fn balancing(&self) -> &BalancingEngine {
        &self.balancing
    }

    pub fn diagnostics(&self) -> &DiagnosticsBus {
        &self.diagnostics
    }
}
