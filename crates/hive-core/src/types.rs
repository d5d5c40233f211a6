use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifier of a task. Generated by the manager on creation.
pub type TaskId = Uuid;

/// Metadata key controlling whether a failed task is re-queued.
pub const RETRYABLE_KEY: &str = "retryable";

/// Priority of a task. Higher variants are dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work.
    Low = 1,
    /// The default priority.
    #[default]
    Normal = 2,
    /// Ahead of normal work.
    High = 3,
    /// Dispatched before everything else.
    Critical = 4,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A single typed value in a task's metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A flag.
    Bool(bool),
    /// An integer setting.
    Int(i64),
    /// A floating-point setting.
    Float(f64),
    /// A free-form string.
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// Typed key-value configuration attached to a task.
///
/// The only key the scheduler interprets is [`RETRYABLE_KEY`]; a missing or
/// non-boolean value counts as `true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskMetadata(BTreeMap<String, MetadataValue>);

impl TaskMetadata {
    /// Empty metadata (retryable by default).
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a failed task should return to the queue.
    pub fn retryable(&self) -> bool {
        match self.0.get(RETRYABLE_KEY) {
            Some(MetadataValue::Bool(flag)) => *flag,
            _ => true,
        }
    }

    /// Set the `retryable` flag.
    pub fn set_retryable(&mut self, retryable: bool) {
        self.0
            .insert(RETRYABLE_KEY.to_string(), MetadataValue::Bool(retryable));
    }

    /// Insert an arbitrary entry, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Option<MetadataValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no entries are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rolling performance figures for a worker.
///
/// `success_rate` is a fraction in `[0, 1]`; durations and uptime are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub success_rate: f64,
    pub avg_duration: f64,
    pub uptime: f64,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub tasks_failed: u64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::with_success_rate(1.0)
    }
}

impl PerformanceMetrics {
    /// Fresh metrics with a prior success rate used until the first outcome.
    pub fn with_success_rate(prior: f64) -> Self {
        Self {
            success_rate: prior.clamp(0.0, 1.0),
            avg_duration: 0.0,
            uptime: 0.0,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    /// Record a successful task of `duration` seconds.
    pub fn record_success(&mut self, duration: f64) {
        self.tasks_completed += 1;
        self.avg_duration = (self.avg_duration + duration) / 2.0;
        self.recompute_success_rate();
    }

    /// Record a failed task.
    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.recompute_success_rate();
    }

    /// Total recorded outcomes.
    pub fn total(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    fn recompute_success_rate(&mut self) {
        let total = self.total();
        if total > 0 {
            self.success_rate = self.tasks_completed as f64 / total as f64;
        }
    }
}
