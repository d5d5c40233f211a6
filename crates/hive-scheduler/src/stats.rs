use crate::registry::WorkerHealth;
use chrono::{DateTime, Utc};
use hive_core::{HiveResult, TaskId};
use serde::{Deserialize, Serialize};

/// Snapshot returned by `get_manager_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub manager_id: String,
    /// Tasks waiting in the queue.
    pub queue_size: usize,
    pub total_tasks: usize,
    /// Assigned or in progress.
    pub active_tasks: usize,
    pub completed_tasks: usize,
    /// Terminally failed.
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    /// Pending tasks that can never run because a dependency, directly or
    /// transitively, failed or was cancelled.
    #[serde(default)]
    pub blocked_tasks: usize,
    pub total_workers: usize,
    /// Workers currently in the eligible pool.
    pub available_workers: usize,
    /// `completed / (completed + failed)`, 1.0 before any outcome.
    pub success_rate: f64,
    /// Seconds, blended as `(avg + d) / 2` on every completion.
    pub avg_task_completion_time: f64,
    /// Failed attempts that went back to the queue.
    pub tasks_retried: u64,
    /// In-flight tasks returned to the queue by unregistration or timeout.
    pub tasks_reassigned: u64,
    pub workers: Vec<WorkerHealth>,
    pub timestamp: DateTime<Utc>,
}

impl ManagerStats {
    /// Every task is terminal or blocked behind one that will never complete.
    pub fn is_settled(&self) -> bool {
        self.completed_tasks + self.failed_tasks + self.cancelled_tasks + self.blocked_tasks
            == self.total_tasks
    }
}

/// Self-reported view of a worker actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub manager_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub current_task: Option<TaskId>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    /// Seconds.
    pub avg_task_duration: f64,
    pub is_available: bool,
}

/// Aggregate over every manager and worker of a [`crate::HiveSystem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_managers: usize,
    pub total_workers: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub queued_tasks: usize,
    #[serde(default)]
    pub blocked_tasks: usize,
    /// Seconds since the system was created.
    pub uptime: f64,
    pub managers: Vec<ManagerStats>,
    pub workers: Vec<WorkerStats>,
    pub timestamp: DateTime<Utc>,
}

impl SystemStats {
    /// Sum the per-manager counters.
    pub fn aggregate(
        managers: Vec<ManagerStats>,
        workers: Vec<WorkerStats>,
        uptime: f64,
    ) -> Self {
        Self {
            total_managers: managers.len(),
            total_workers: workers.len(),
            total_tasks: managers.iter().map(|m| m.total_tasks).sum(),
            completed_tasks: managers.iter().map(|m| m.completed_tasks).sum(),
            failed_tasks: managers.iter().map(|m| m.failed_tasks).sum(),
            queued_tasks: managers.iter().map(|m| m.queue_size).sum(),
            blocked_tasks: managers.iter().map(|m| m.blocked_tasks).sum(),
            uptime,
            managers,
            workers,
            timestamp: Utc::now(),
        }
    }

    /// Whether every manager is settled.
    pub fn is_settled(&self) -> bool {
        self.managers.iter().all(ManagerStats::is_settled)
    }

    /// Pretty-printed JSON for dashboards and the CLI.
    pub fn to_json(&self) -> HiveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
