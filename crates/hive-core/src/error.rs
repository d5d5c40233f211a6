use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`HiveError`].
pub type HiveResult<T> = Result<T, HiveError>;

/// Top-level error type for the Hive framework.
///
/// Admission failures (`Validation`, `CapacityExceeded`, `DependencyNotSatisfied`)
/// are always raised before any state is mutated.
#[derive(Error, Debug)]
pub enum HiveError {
    /// Bad registration or task arguments.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The worker has no free load slot.
    #[error("Worker '{worker_id}' is at capacity ({capacity})")]
    CapacityExceeded {
        /// Worker that rejected the assignment.
        worker_id: String,
        /// Its configured load capacity.
        capacity: usize,
    },

    /// A dependency of the task has not completed yet.
    #[error("Dependency '{dependency}' of task '{task_id}' is not completed")]
    DependencyNotSatisfied {
        /// Task that was being assigned.
        task_id: String,
        /// First unsatisfied dependency.
        dependency: String,
    },

    /// The worker does not declare the capability the task requires.
    #[error("Worker '{worker_id}' lacks capability '{capability}'")]
    MissingCapability {
        /// Worker that was considered.
        worker_id: String,
        /// Capability the task requires.
        capability: String,
    },

    /// No worker with this id is registered.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// No task with this id is known.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// A worker with this id is already registered.
    #[error("Worker already registered: {0}")]
    DuplicateWorker(String),

    /// A manager with this id already exists.
    #[error("Manager already exists: {0}")]
    DuplicateManager(String),

    /// No manager with this id exists.
    #[error("Unknown manager: {0}")]
    UnknownManager(String),

    /// The task is not in a state that allows the requested transition.
    #[error("Invalid transition for task '{task_id}': {reason}")]
    InvalidTransition {
        /// Task that was being mutated.
        task_id: String,
        /// Why the transition was refused.
        reason: String,
    },

    /// Publishing to or receiving from the event channel failed.
    #[error("Event bus error: {0}")]
    Bus(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The actor behind a handle is no longer running.
    #[error("Actor stopped: {0}")]
    ActorStopped(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error raised by a task handler while a worker executes a task.
///
/// Workers never propagate it further: it is converted into a
/// `task_failed` event carrying its display text.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TaskExecutionError {
    /// The handler ran and reported a failure.
    #[error("task execution failed: {0}")]
    Failed(String),

    /// No handler accepts this task type.
    #[error("unsupported task type: {0}")]
    Unsupported(String),

    /// The handler panicked or its task was aborted.
    #[error("task handler panicked: {0}")]
    Panicked(String),
}
