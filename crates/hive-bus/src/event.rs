use chrono::{DateTime, Utc};
use hive_core::{PerformanceMetrics, TaskId, TaskMetadata, TaskPriority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Topic of an event. Subscribers filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskAssignment,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRejected,
    WorkerHeartbeat,
    WorkerAvailable,
    WorkerBusy,
}

impl EventType {
    /// Topics a manager consumes.
    pub const WORKER_EVENTS: [EventType; 7] = [
        EventType::TaskStarted,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::TaskRejected,
        EventType::WorkerHeartbeat,
        EventType::WorkerAvailable,
        EventType::WorkerBusy,
    ];
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topic = match self {
            EventType::TaskAssignment => "task_assignment",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TaskRejected => "task_rejected",
            EventType::WorkerHeartbeat => "worker_heartbeat",
            EventType::WorkerAvailable => "worker_available",
            EventType::WorkerBusy => "worker_busy",
        };
        f.write_str(topic)
    }
}

/// Delivery priority attached to an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl From<TaskPriority> for EventPriority {
    fn from(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::Low => EventPriority::Low,
            TaskPriority::Normal => EventPriority::Normal,
            TaskPriority::High => EventPriority::High,
            TaskPriority::Critical => EventPriority::Critical,
        }
    }
}

/// Transient copy of a task handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub task_type: String,
    pub priority: TaskPriority,
    /// Estimated duration in seconds.
    pub estimated_duration: Option<f64>,
    pub dependencies: Vec<TaskId>,
    pub metadata: TaskMetadata,
}

/// Periodic liveness report from a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub current_load: usize,
    pub is_available: bool,
    pub performance_metrics: PerformanceMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Typed body of an [`Event`]; the variant determines the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Manager → worker: execute this task.
    TaskAssignment(TaskAssignment),
    /// Worker → manager: the assignment was accepted and execution began.
    TaskStarted { task_id: TaskId, worker_id: String },
    /// Worker → manager: the handler returned a result.
    TaskCompleted {
        task_id: TaskId,
        worker_id: String,
        result: serde_json::Value,
        /// Elapsed seconds.
        duration: f64,
    },
    /// Worker → manager: the handler raised a `TaskExecutionError`.
    TaskFailed {
        task_id: TaskId,
        worker_id: String,
        error: String,
        /// Elapsed seconds.
        duration: f64,
    },
    /// Worker → manager: the assignment arrived while another task was running.
    TaskRejected {
        task_id: TaskId,
        worker_id: String,
        reason: String,
    },
    /// Worker → manager: liveness and metrics.
    WorkerHeartbeat(Heartbeat),
    /// Worker → manager: ready for more work.
    WorkerAvailable { worker_id: String },
    /// Worker → manager: do not send more work.
    WorkerBusy { worker_id: String },
}

impl EventPayload {
    /// Topic of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TaskAssignment(_) => EventType::TaskAssignment,
            EventPayload::TaskStarted { .. } => EventType::TaskStarted,
            EventPayload::TaskCompleted { .. } => EventType::TaskCompleted,
            EventPayload::TaskFailed { .. } => EventType::TaskFailed,
            EventPayload::TaskRejected { .. } => EventType::TaskRejected,
            EventPayload::WorkerHeartbeat(_) => EventType::WorkerHeartbeat,
            EventPayload::WorkerAvailable { .. } => EventType::WorkerAvailable,
            EventPayload::WorkerBusy { .. } => EventType::WorkerBusy,
        }
    }
}

/// Envelope published on the event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: Uuid,
    /// Id of the publishing manager or worker.
    pub source: String,
    /// Addressee, or `None` for anyone subscribed to the topic.
    pub target: Option<String>,
    pub payload: EventPayload,
    pub priority: EventPriority,
    /// Links related events, e.g. an assignment and its outcome.
    pub correlation_id: Uuid,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an untargeted event with normal priority.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            target: None,
            payload,
            priority: EventPriority::Normal,
            correlation_id: Uuid::new_v4(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Address the event to a single component.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Topic of this event.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
