//! Best-effort multicast notification bus
//!
//! Sibling engine contexts share time samples and plugin updates through this
//! bus. Delivery is advisory: at most once, unordered, and never to the
//! publishing context itself. A receiver that falls behind silently loses the
//! oldest messages. Every consumer must stay correct if nothing ever arrives.
//!
//! # Topics
//!
//! | Topic | Payload |
//! |-------|---------|
//! | `time-cache` | `{ "type": "time-update", "data": TimeSample }` |
//! | `plugin:<store>` | `{ "tabId", "key", "value" }` |

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::metrics;

/// Topic carrying shared time samples
pub const TIME_TOPIC: &str = "time-cache";

/// Topic carrying updates for a plugin store
pub fn plugin_topic(store: &str) -> String {
    format!("plugin:{store}")
}

/// A message as seen by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    topic: Arc<str>,
    payload: Value,
}

/// Publish/subscribe capabilities of a transport
pub trait NotificationBus: Send + Sync {
    /// Publish a payload; never blocks and never fails
    fn publish(&self, topic: &str, payload: Value);

    /// Subscribe to a set of topics
    fn subscribe(&self, topics: &[String]) -> Subscription;
}

// ============================================================================
// In-process transport
// ============================================================================

/// Shared in-process bus
///
/// Each context attaches to get its own [`BusHandle`] with a distinct origin.
#[derive(Debug, Clone)]
pub struct InProcessBus {
    sender: broadcast::Sender<Envelope>,
}

impl InProcessBus {
    /// Create a bus that buffers up to `capacity` undelivered messages
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attach a new context to the bus
    pub fn attach(&self) -> BusHandle {
        BusHandle {
            sender: self.sender.clone(),
            origin: Uuid::new_v4(),
        }
    }
}

/// One context's connection to the bus
#[derive(Debug, Clone)]
pub struct BusHandle {
    sender: broadcast::Sender<Envelope>,
    origin: Uuid,
}

impl BusHandle {
    /// Identity of this context on the bus
    pub fn origin(&self) -> Uuid {
        self.origin
    }
}

impl NotificationBus for BusHandle {
    fn publish(&self, topic: &str, payload: Value) {
        let envelope = Envelope {
            origin: self.origin,
            topic: Arc::from(topic),
            payload,
        };
        // No receivers is not an error for advisory delivery
        let delivered = self.sender.send(envelope).unwrap_or(0);
        debug!(topic = topic, receivers = delivered, "Published bus message");
        metrics::record_bus_published(topic);
    }

    fn subscribe(&self, topics: &[String]) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            origin: self.origin,
            topics: topics.iter().cloned().collect(),
        }
    }
}

/// Receiving side of a bus subscription
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Envelope>,
    origin: Uuid,
    topics: HashSet<String>,
}

impl Subscription {
    /// Wait for the next message on a subscribed topic
    ///
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if envelope.origin == self.origin || !self.topics.contains(&*envelope.topic) {
                        continue;
                    }
                    return Some(BusMessage {
                        topic: envelope.topic.to_string(),
                        payload: envelope.payload,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "Bus subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Topics this subscription listens to
    pub fn topics(&self) -> &HashSet<String> {
        &self.topics
    }
}
