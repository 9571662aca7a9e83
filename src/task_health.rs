//! Task Health Monitor (§4.E).
//!
//! Each periodic task calls [`TaskHealthMonitor::notify`] once per cycle;
//! a lower-priority task (conventionally the 100 ms task) calls
//! [`TaskHealthMonitor::check_notifications`] to detect a task that has
//! stopped notifying (blocked, panicked, or lost), and
//! [`TaskHealthMonitor::record_violation`] to log an overrun measured by
//! the caller against its own cycle/jitter budget. Violations persist to
//! `sys_mon_summary` via [`TaskHealthMonitor::flush_if_dirty`].

use crate::config::TaskHealthConfig;
use crate::nvm::records::{SysMonSummaryRecord, TaskViolation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskId {
    Engine,
    Task1ms,
    Task10ms,
    Task100ms,
    Task100msAlgorithm,
}

impl TaskId {
    const ALL: [TaskId; 5] = [
        TaskId::Engine,
        TaskId::Task1ms,
        TaskId::Task10ms,
        TaskId::Task100ms,
        TaskId::Task100msAlgorithm,
    ];

    fn index(self) -> usize {
        match self {
            TaskId::Engine => 0,
            TaskId::Task1ms => 1,
            TaskId::Task10ms => 2,
            TaskId::Task100ms => 3,
            TaskId::Task100msAlgorithm => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskRecord {
    last_notify_tick: u32,
    notified_at_least_once: bool,
    violation: TaskViolation,
}

pub struct TaskHealthMonitor {
    config: TaskHealthConfig,
    records: [TaskRecord; 5],
    any_violation: bool,
    dirty: bool,
}

impl TaskHealthMonitor {
    pub fn new(config: TaskHealthConfig) -> Self {
        Self {
            config,
            records: [TaskRecord::default(); 5],
            any_violation: false,
            dirty: false,
        }
    }

    /// Restore the persisted summary after a reset (§4.E: survives across
    /// a reset so a recurring pre-reset overrun stays visible).
    pub fn restore(&mut self, record: SysMonSummaryRecord) {
        self.records[TaskId::Engine.index()].violation = record.engine;
        self.records[TaskId::Task1ms.index()].violation = record.task_1ms;
        self.records[TaskId::Task10ms.index()].violation = record.task_10ms;
        self.records[TaskId::Task100ms.index()].violation = record.task_100ms;
        self.records[TaskId::Task100msAlgorithm.index()].violation = record.task_100ms_algorithm;
        self.any_violation = record.any_violation;
        self.dirty = false;
    }

    /// A task calls this once at the top of its own cycle.
    pub fn notify(&mut self, task: TaskId, now_ms: u32) {
        let rec = &mut self.records[task.index()];
        rec.last_notify_tick = now_ms;
        rec.notified_at_least_once = true;
    }

    /// Detect tasks that have gone silent for longer than their cycle plus
    /// jitter budget. Returns the list of tasks currently overdue.
    pub fn check_notifications(&self, now_ms: u32) -> heapless::Vec<TaskId, 5> {
        let mut overdue = heapless::Vec::new();
        for task in TaskId::ALL {
            let rec = &self.records[task.index()];
            if !rec.notified_at_least_once {
                continue;
            }
            let budget = self.config.cycle_ms(task) + self.config.jitter_ms(task);
            if crate::clock::elapsed_since(rec.last_notify_tick, now_ms) > budget {
                let _ = overdue.push(task);
            }
        }
        overdue
    }

    /// Tick at which `task` last notified; the overdue window's entry point.
    pub fn last_notify_tick(&self, task: TaskId) -> u32 {
        self.records[task.index()].last_notify_tick
    }

    /// How far past its cycle+jitter budget `task` currently is, given it
    /// was found overdue at `now_ms`.
    pub fn overdue_amount_ms(&self, task: TaskId, now_ms: u32) -> u32 {
        let rec = &self.records[task.index()];
        let budget = self.config.cycle_ms(task) + self.config.jitter_ms(task);
        crate::clock::elapsed_since(rec.last_notify_tick, now_ms).saturating_sub(budget)
    }

    /// Record a measured overrun: `violating_duration_ms` is how long the
    /// task ran beyond its cycle+jitter budget, `entry_tick` the tick at
    /// which the overrun started. Only the worst overrun per task is kept.
    pub fn record_violation(&mut self, task: TaskId, violating_duration_ms: u32, entry_tick: u32) {
        let rec = &mut self.records[task.index()];
        if violating_duration_ms > rec.violation.violating_duration_ms {
            rec.violation = TaskViolation { violating_duration_ms, entry_tick };
            self.any_violation = true;
            self.dirty = true;
        }
    }

    pub fn get_recorded_violations(&self) -> SysMonSummaryRecord {
        SysMonSummaryRecord {
            any_violation: self.any_violation,
            engine: self.records[TaskId::Engine.index()].violation,
            task_1ms: self.records[TaskId::Task1ms.index()].violation,
            task_10ms: self.records[TaskId::Task10ms.index()].violation,
            task_100ms: self.records[TaskId::Task100ms.index()].violation,
            task_100ms_algorithm: self.records[TaskId::Task100msAlgorithm.index()].violation,
        }
    }

    /// Explicit clear, e.g. in response to a `clear_persistent_flags`
    /// command (§6.1).
    pub fn clear_all_violations(&mut self) {
        for rec in &mut self.records {
            rec.violation = TaskViolation::default();
        }
        self.any_violation = false;
        self.dirty = true;
    }

    /// If the summary has changed since the last flush, queue it for
    /// persistence and return the record to write; otherwise `None`.
    pub fn flush_if_dirty(&mut self) -> Option<SysMonSummaryRecord> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.get_recorded_violations())
    }
}
