use chrono::{DateTime, Utc};
use hive_bus::TaskAssignment;
use hive_core::{MetadataValue, TaskId, TaskMetadata, TaskPriority};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the manager's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Statuses in which a worker holds the task.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Arguments for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    /// Capability a worker must declare to run the task.
    pub task_type: String,
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Estimated duration in seconds.
    #[serde(default)]
    pub estimated_duration: Option<f64>,
    #[serde(default)]
    pub subtasks: Vec<TaskId>,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl TaskSpec {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        task_type: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            task_type: task_type.into(),
            priority,
            dependencies: Vec::new(),
            estimated_duration: None,
            subtasks: Vec::new(),
            metadata: TaskMetadata::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_estimated_duration(mut self, seconds: f64) -> Self {
        self.estimated_duration = Some(seconds);
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<TaskId>) -> Self {
        self.subtasks = subtasks;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.metadata.set_retryable(retryable);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

/// A task owned by a manager.
///
/// `assigned_worker` is set exactly while the status is `Assigned` or
/// `InProgress`; the transition methods below keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assigned_worker: Option<String>,
    pub manager_id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_duration: Option<f64>,
    pub actual_duration: Option<f64>,
    pub dependencies: Vec<TaskId>,
    pub subtasks: Vec<TaskId>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: TaskMetadata,
    /// How many times the task has been handed to a worker.
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    /// Build a pending task from `spec` with a fresh id.
    pub fn new(spec: TaskSpec, manager_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: spec.title,
            description: spec.description,
            task_type: spec.task_type,
            priority: spec.priority,
            status: TaskStatus::Pending,
            assigned_worker: None,
            manager_id: manager_id.into(),
            created_at: now,
            started_at: None,
            completed_at: None,
            estimated_duration: spec.estimated_duration,
            actual_duration: None,
            dependencies: spec.dependencies,
            subtasks: spec.subtasks,
            result: None,
            error: None,
            metadata: spec.metadata,
            attempts: 0,
        }
    }

    /// First dependency for which `is_completed` is false.
    pub fn unsatisfied_dependency(&self, is_completed: impl Fn(&TaskId) -> bool) -> Option<TaskId> {
        self.dependencies.iter().find(|dep| !is_completed(dep)).copied()
    }

    pub fn retryable(&self) -> bool {
        self.metadata.retryable()
    }

    pub(crate) fn mark_assigned(&mut self, worker_id: &str) {
        self.status = TaskStatus::Assigned;
        self.assigned_worker = Some(worker_id.to_string());
        self.attempts += 1;
    }

    pub(crate) fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(now);
    }

    pub(crate) fn mark_completed(
        &mut self,
        result: serde_json::Value,
        duration: f64,
        now: DateTime<Utc>,
    ) {
        self.status = TaskStatus::Completed;
        self.assigned_worker = None;
        self.result = Some(result);
        self.actual_duration = Some(duration);
        self.completed_at = Some(now);
    }

    pub(crate) fn mark_failed(&mut self, error: String, duration: f64, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.assigned_worker = None;
        self.error = Some(error);
        self.actual_duration = Some(duration);
        self.completed_at = Some(now);
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.assigned_worker = None;
        self.completed_at = Some(now);
    }

    /// Return an in-flight task to the pending state.
    pub(crate) fn reset_to_pending(&mut self) {
        self.status = TaskStatus::Pending;
        self.assigned_worker = None;
        self.started_at = None;
        self.error = None;
    }

    /// The copy handed to a worker.
    pub fn to_assignment(&self) -> TaskAssignment {
        TaskAssignment {
            task_id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            task_type: self.task_type.clone(),
            priority: self.priority,
            estimated_duration: self.estimated_duration,
            dependencies: self.dependencies.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            TaskSpec::new("Summarise", "Summarise the report", "text_processing", TaskPriority::High),
            "m1",
            Utc::now(),
        )
    }

    #[test]
    fn test_task_creation() {
        let task = task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.manager_id, "m1");
        assert!(task.assigned_worker.is_none());
        assert!(task.retryable());
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn test_unsatisfied_dependency() {
        let dep = Uuid::new_v4();
        let mut task = task();
        task.dependencies = vec![dep];
        assert_eq!(task.unsatisfied_dependency(|_| false), Some(dep));
        assert_eq!(task.unsatisfied_dependency(|id| *id == dep), None);
    }

    #[test]
    fn test_assigned_worker_tracks_in_flight_status() {
        let mut task = task();
        task.mark_assigned("w1");
        assert!(task.status.is_in_flight());
        assert_eq!(task.assigned_worker.as_deref(), Some("w1"));

        task.mark_started(Utc::now());
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.started_at.is_some());

        task.reset_to_pending();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_worker.is_none());

        task.mark_assigned("w2");
        task.mark_failed("boom".into(), 1.0, Utc::now());
        assert!(task.status.is_terminal());
        assert!(task.assigned_worker.is_none());
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert_eq!(task.attempts, 2);
    }

    #[test]
    fn test_spec_builder() {
        let spec = TaskSpec::new("Report", "", "data_analysis", TaskPriority::Low)
            .with_estimated_duration(5.0)
            .retryable(false)
            .with_metadata("dataset", "sales");
        let task = Task::new(spec, "m1", Utc::now());
        assert_eq!(task.estimated_duration, Some(5.0));
        assert!(!task.retryable());
        assert_eq!(task.metadata.len(), 2);

        let assignment = task.to_assignment();
        assert_eq!(assignment.task_id, task.id);
        assert_eq!(assignment.task_type, "data_analysis");
        assert!(!assignment.metadata.retryable());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
    }
}
