use chrono::{DateTime, Utc};
use hive_core::{PerformanceMetrics, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A worker as seen by its manager.
///
/// Only the manager mutates this record, from its own API calls and event
/// handlers. `current_load` never exceeds `load_capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: BTreeSet<String>,
    pub load_capacity: usize,
    pub current_load: usize,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub performance_metrics: PerformanceMetrics,
    /// Consecutive heartbeats reporting no load while the manager still
    /// records tasks on this worker.
    #[serde(skip)]
    pub(crate) idle_reports: u32,
}

impl WorkerRecord {
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
        load_capacity: usize,
        prior_success_rate: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            capabilities: capabilities.into_iter().collect(),
            load_capacity,
            current_load: 0,
            is_active: true,
            registered_at: now,
            last_heartbeat: now,
            performance_metrics: PerformanceMetrics::with_success_rate(prior_success_rate),
            idle_reports: 0,
        }
    }

    pub fn has_capability(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.load_capacity
    }

    /// Fraction of capacity in use, in `[0, 1]`.
    pub fn load_ratio(&self) -> f64 {
        if self.load_capacity == 0 {
            return 1.0;
        }
        self.current_load as f64 / self.load_capacity as f64
    }

    /// Take a load slot. Returns `false` when the worker is full.
    pub(crate) fn acquire(&mut self) -> bool {
        if !self.has_capacity() {
            return false;
        }
        self.current_load += 1;
        true
    }

    /// Give back a load slot.
    pub(crate) fn release(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
    }

    /// Fold a heartbeat's self-reported metrics into the record.
    ///
    /// Reports without any recorded outcome are ignored, so the prior
    /// success rate survives until the worker has a history.
    pub(crate) fn merge_reported(&mut self, reported: &PerformanceMetrics) {
        if reported.total() == 0 {
            return;
        }
        self.performance_metrics.success_rate = reported.success_rate.clamp(0.0, 1.0);
        self.performance_metrics.avg_duration = reported.avg_duration;
        self.performance_metrics.tasks_completed = reported.tasks_completed;
        self.performance_metrics.tasks_failed = reported.tasks_failed;
    }
}

/// Health snapshot of one worker, part of the manager stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub current_load: usize,
    pub load_capacity: usize,
    pub is_active: bool,
    /// Member of the eligible pool.
    pub is_available: bool,
    pub seconds_since_heartbeat: f64,
    /// Heartbeat is within the timeout.
    pub healthy: bool,
    pub in_flight: Vec<TaskId>,
    pub performance_metrics: PerformanceMetrics,
}
