//! Hierarchical task scheduling for Hive.
//!
//! A [`Manager`] owns a priority queue of tasks and a registry of workers.
//! It admits a task to a worker only when the worker declares the task's
//! capability, has a free load slot and every dependency of the task has
//! completed; among qualifying workers the highest [`ScoringStrategy`] score
//! wins. [`Worker`]s execute one task at a time, report outcomes over the
//! event bus and send heartbeats; a worker that stops heartbeating is
//! removed and its tasks go back to the queue.
//!
//! # Main types
//!
//! - [`HiveSystem`] — Creates managers and workers and aggregates their stats.
//! - [`ManagerHandle`] / [`WorkerHandle`] — Cloneable handles to the running actors.
//! - [`ManagerState`] — The manager's synchronous core: admission, selection,
//!   event handling and health checks.
//! - [`TaskQueue`] — Pending tasks ordered by priority, then creation order.
//! - [`HandlerRegistry`] — Task handlers a worker dispatches to by task type.

/// Wall-clock abstraction.
pub mod clock;
/// Scheduler settings.
pub mod config;
/// Task handlers executed by workers.
pub mod handler;
/// Manager actor and its handle.
pub mod manager;
/// Worker registration records.
pub mod registry;
/// Worker scoring strategies.
pub mod scoring;
/// Manager state machine.
pub mod state;
/// Stats snapshots.
pub mod stats;
/// System coordinator.
pub mod system;
/// Task records.
pub mod task;
/// Priority task queue.
pub mod task_queue;
/// Worker actor and its handle.
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use handler::{HandlerRegistry, SimulatedHandler, SimulatedKind, TaskHandler};
pub use manager::{Manager, ManagerHandle};
pub use registry::{WorkerHealth, WorkerRecord};
pub use scoring::{ScoringStrategy, WeightedScore};
pub use state::ManagerState;
pub use stats::{ManagerStats, SystemStats, WorkerStats};
pub use system::HiveSystem;
pub use task::{Task, TaskSpec, TaskStatus};
pub use task_queue::TaskQueue;
pub use worker::{TaskOutcome, Worker, WorkerHandle, WorkerIdentity, HISTORY_LIMIT};
