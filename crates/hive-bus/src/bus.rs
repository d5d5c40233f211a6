use crate::event::{Event, EventType};
use async_trait::async_trait;
use hive_core::{HiveError, HiveResult};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Publish/subscribe transport between managers and workers.
///
/// Delivery is best-effort and ordered per publisher; there is no ordering
/// guarantee across publishers. A subscriber that falls further behind than
/// the bus buffer loses the oldest events, so consumers must be able to
/// recover state from later events (managers reconcile from heartbeats).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to every matching subscription.
    async fn publish(&self, event: Event) -> HiveResult<()>;

    /// Open a subscription for the topics and addressee in `filter`.
    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription;
}

/// Blanket implementation so `Arc<dyn EventBus>` can be used directly.
#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, event: Event) -> HiveResult<()> {
        (**self).publish(event).await
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        (**self).subscribe(filter)
    }
}

/// Which events a [`Subscription`] yields.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    topics: HashSet<EventType>,
    addressee: Option<String>,
}

impl SubscriptionFilter {
    /// Match events whose topic is in `topics`, whatever their target.
    /// An empty list matches every topic.
    pub fn topics(topics: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            addressee: None,
        }
    }

    /// Additionally require the event to be untargeted or targeted at `id`.
    pub fn addressed_to(mut self, id: impl Into<String>) -> Self {
        self.addressee = Some(id.into());
        self
    }

    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.topics.is_empty() && !self.topics.contains(&event.event_type()) {
            return false;
        }
        match (&self.addressee, &event.target) {
            (Some(me), Some(target)) => me == target,
            _ => true,
        }
    }
}

/// Receiving end of a filtered subscription.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: SubscriptionFilter,
}

impl Subscription {
    /// Wrap a raw broadcast receiver with a filter.
    pub fn new(receiver: broadcast::Receiver<Event>, filter: SubscriptionFilter) -> Self {
        Self { receiver, filter }
    }

    /// Wait for the next matching event.
    ///
    /// A subscriber that falls behind skips the overwritten events, logs how
    /// many were lost and keeps receiving; an error is returned only once the
    /// bus is closed.
    pub async fn recv(&mut self) -> HiveResult<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(HiveError::Bus("event bus closed".to_string()));
                }
            }
        }
    }
}

/// Counters exposed by [`InMemoryBus::metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusMetrics {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Live subscriptions.
    pub subscribers: usize,
}

/// In-process event bus backed by a tokio broadcast channel.
///
/// Every subscription sees every published event in publish order and filters
/// locally, which gives per-publisher FIFO delivery.
pub struct InMemoryBus {
    sender: broadcast::Sender<Event>,
    published: AtomicU64,
}

impl InMemoryBus {
    /// Create a bus retaining up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Current counters.
    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            published: self.published.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, event: Event) -> HiveResult<()> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let topic = event.event_type();
        // No subscribers is not an error: the event is simply dropped.
        if self.sender.send(event).is_err() {
            debug!(%topic, "Event published with no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        Subscription::new(self.sender.subscribe(), filter)
    }
}
