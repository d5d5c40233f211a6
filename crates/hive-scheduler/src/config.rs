use hive_core::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing, scoring and buffer settings shared by managers and workers.
///
/// Every field has a default so a partial `[scheduler]` table is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatch loop sleep when no task can be assigned.
    #[serde(default = "default_dispatch_idle_ms")]
    pub dispatch_idle_ms: u64,
    /// Interval between health-monitor passes.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// A worker silent for longer than this is declared dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Interval between worker heartbeats.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Success rate assumed for a worker with no recorded outcomes.
    #[serde(default = "default_success_rate")]
    pub default_success_rate: f64,
    /// Weight of free capacity in the worker score.
    #[serde(default = "default_load_weight")]
    pub load_weight: f64,
    /// Weight of the success rate in the worker score.
    #[serde(default = "default_performance_weight")]
    pub performance_weight: f64,
    /// Undelivered events retained per subscriber by the in-memory bus.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Pending API calls buffered per manager.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_dispatch_idle_ms() -> u64 {
    1_000
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    300_000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_success_rate() -> f64 {
    0.8
}
fn default_load_weight() -> f64 {
    0.6
}
fn default_performance_weight() -> f64 {
    0.4
}
fn default_event_buffer() -> usize {
    1024
}
fn default_command_buffer() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_idle_ms: default_dispatch_idle_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            default_success_rate: default_success_rate(),
            load_weight: default_load_weight(),
            performance_weight: default_performance_weight(),
            event_buffer: default_event_buffer(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl SchedulerConfig {
    pub fn dispatch_idle(&self) -> Duration {
        Duration::from_millis(self.dispatch_idle_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reject settings under which the scheduler cannot behave sensibly.
    pub fn validate(&self) -> HiveResult<()> {
        if self.dispatch_idle_ms == 0
            || self.health_check_interval_ms == 0
            || self.heartbeat_interval_ms == 0
        {
            return Err(HiveError::Config(
                "loop intervals must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(HiveError::Config(format!(
                "heartbeat_timeout_ms ({}) is shorter than heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.default_success_rate) {
            return Err(HiveError::Config(
                "default_success_rate must be within [0, 1]".to_string(),
            ));
        }
        if self.load_weight < 0.0
            || self.performance_weight < 0.0
            || self.load_weight + self.performance_weight == 0.0
        {
            return Err(HiveError::Config(
                "scoring weights must be non-negative and not both zero".to_string(),
            ));
        }
        if self.event_buffer == 0 || self.command_buffer == 0 {
            return Err(HiveError::Config("buffers must be non-empty".to_string()));
        }
        Ok(())
    }
}
