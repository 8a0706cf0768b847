//! Real-time status notifications
//!
//! Every recorded status transition is pushed to the owning user's topic.
//! Delivery is fire-and-forget: nothing is persisted or retried, a lagging
//! subscriber loses the oldest events, and a user with no open connection
//! simply gets nothing. Clients treat events as a hint to refresh.
//!
//! # Example
//!
//! ```
//! use libschedcast::notify::NotificationEmitter;
//!
//! let emitter = NotificationEmitter::new(16);
//! let subscription = emitter.registry().subscribe("user-1");
//! assert_eq!(emitter.registry().subscriber_count("user-1"), 1);
//! drop(subscription);
//! assert_eq!(emitter.registry().subscriber_count("user-1"), 0);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::types::{Platform, PostStatus, ScheduledPost};

/// Payload pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub post_id: String,
    pub owner_id: String,
    pub status: PostStatus,
    pub platform: Platform,
    pub timestamp: i64,
}

impl StatusEvent {
    pub fn for_post(post: &ScheduledPost) -> Self {
        Self {
            post_id: post.id.clone(),
            owner_id: post.owner_id.clone(),
            status: post.status,
            platform: post.platform,
            timestamp: post.updated_at,
        }
    }
}

/// Per-user topics. Subscribing and dropping a [`Subscription`] are the only
/// ways the map changes.
pub struct SubscriberRegistry {
    topics: Mutex<HashMap<String, broadcast::Sender<StatusEvent>>>,
    capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        })
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<StatusEvent>>> {
        // A panic while holding the lock leaves the map itself intact
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a subscription on `owner_id`'s topic.
    pub fn subscribe(self: &Arc<Self>, owner_id: &str) -> Subscription {
        let receiver = self
            .topics()
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        tracing::debug!(owner_id = %owner_id, "Notification subscriber added");

        Subscription {
            owner_id: owner_id.to_string(),
            receiver: Some(receiver),
            registry: Arc::clone(self),
        }
    }

    fn remove(&self, owner_id: &str) {
        let mut topics = self.topics();
        let empty = topics
            .get(owner_id)
            .map(|sender| sender.receiver_count() == 0)
            .unwrap_or(false);
        if empty {
            topics.remove(owner_id);
        }
        tracing::debug!(owner_id = %owner_id, "Notification subscriber removed");
    }

    /// Returns how many subscribers received the event.
    fn publish(&self, event: StatusEvent) -> usize {
        let topics = self.topics();
        match topics.get(&event.owner_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.topics()
            .get(owner_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }
}

/// A live connection to one user's topic. Dropping it unsubscribes.
pub struct Subscription {
    owner_id: String,
    receiver: Option<broadcast::Receiver<StatusEvent>>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Next event, skipping over any that were dropped because this
    /// subscriber lagged. `None` once the registry is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(owner_id = %self.owner_id, skipped, "Notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.receiver.as_mut()?.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.registry.remove(&self.owner_id);
    }
}

/// Publishes status transitions. Cheap to clone.
#[derive(Clone)]
pub struct NotificationEmitter {
    registry: Arc<SubscriberRegistry>,
}

impl NotificationEmitter {
    pub fn new(capacity: usize) -> Self {
        Self::with_registry(SubscriberRegistry::new(capacity))
    }

    pub fn with_registry(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Never fails and never blocks on subscribers.
    pub fn emit(&self, event: StatusEvent) {
        let delivered = self.registry.publish(event.clone());
        tracing::debug!(
            post_id = %event.post_id,
            owner_id = %event.owner_id,
            status = %event.status,
            delivered,
            "Status notification emitted"
        );
    }

    pub fn emit_post(&self, post: &ScheduledPost) {
        self.emit(StatusEvent::for_post(post));
    }
}
