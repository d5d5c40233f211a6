//! Core error definitions and shared value types for the Hive task-scheduling framework.
//!
//! Every Hive crate reports failures through the types defined here, so that
//! the manager, the workers and the event channel agree on one taxonomy.
//!
//! # Main types
//!
//! - [`HiveError`] — Unified error enum for scheduler, bus and configuration failures.
//! - [`HiveResult`] — Convenience alias for `Result<T, HiveError>`.
//! - [`TaskExecutionError`] — Raised by task handlers inside a worker.
//! - [`TaskPriority`], [`TaskMetadata`], [`PerformanceMetrics`] — Value types
//!   that cross the manager/worker boundary.

/// Error types.
pub mod error;
/// Value types shared by the event channel and the scheduler.
pub mod types;

pub use error::{HiveError, HiveResult, TaskExecutionError};
pub use types::{
    MetadataValue, PerformanceMetrics, TaskId, TaskMetadata, TaskPriority, RETRYABLE_KEY,
};
