//! Event channel connecting a Hive manager to its workers.
//!
//! The manager publishes task assignments addressed to a worker; workers
//! publish lifecycle events (started, completed, failed, rejected), availability
//! changes and heartbeats addressed to their manager.
//!
//! # Main types
//!
//! - [`Event`] — Envelope carrying a typed [`EventPayload`] plus routing data.
//! - [`EventBus`] — Publish/subscribe contract used by managers and workers.
//! - [`InMemoryBus`] — In-process implementation backed by a tokio broadcast channel.
//! - [`Subscription`] — Filtered receiving end returned by [`EventBus::subscribe`].

/// Publish/subscribe contract and the in-memory implementation.
pub mod bus;
/// Event envelope and payload types.
pub mod event;

pub use bus::{BusMetrics, EventBus, InMemoryBus, Subscription, SubscriptionFilter};
pub use event::{
    Event, EventPayload, EventPriority, EventType, Heartbeat, TaskAssignment,
};
