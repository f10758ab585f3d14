//! Metrics collector for the orchestrator
//!
//! Handles are registered once through the `metrics` facade; the binary
//! decides whether an exporter is installed.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

use orchestrator_core::models::TaskState;

/// Metrics collector for the orchestrator
pub struct MetricsCollector {
    tasks_submitted_total: Counter,
    tasks_finished_total: Counter,
    tasks_aborted_total: Counter,
    dispatch_failures_total: Counter,
    checkpoints_reached_total: Counter,
    scheduler_passes_total: Counter,
    scheduler_pass_duration: Histogram,
    registered_hosts: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_submitted_total: counter!("orchestrator_tasks_submitted_total"),
            tasks_finished_total: counter!("orchestrator_tasks_completed_total", "state" => "finished"),
            tasks_aborted_total: counter!("orchestrator_tasks_completed_total", "state" => "aborted"),
            dispatch_failures_total: counter!("orchestrator_dispatch_failures_total"),
            checkpoints_reached_total: counter!("orchestrator_checkpoints_reached_total"),
            scheduler_passes_total: counter!("orchestrator_scheduler_passes_total"),
            scheduler_pass_duration: histogram!("orchestrator_scheduler_pass_duration_seconds"),
            registered_hosts: gauge!("orchestrator_registered_hosts"),
        }
    }

    pub fn record_task_submitted(&self) {
        self.tasks_submitted_total.increment(1);
    }

    pub fn record_task_completed(&self, state: TaskState) {
        match state {
            TaskState::Finished => self.tasks_finished_total.increment(1),
            TaskState::Aborted => self.tasks_aborted_total.increment(1),
            _ => {}
        }
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures_total.increment(1);
    }

    pub fn record_checkpoint_reached(&self) {
        self.checkpoints_reached_total.increment(1);
    }

    pub fn record_scheduler_pass(&self, duration_seconds: f64) {
        self.scheduler_passes_total.increment(1);
        self.scheduler_pass_duration.record(duration_seconds);
    }

    pub fn set_registered_hosts(&self, count: usize) {
        self.registered_hosts.set(count as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
