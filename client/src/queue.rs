//! Outbound message queue decoupling event production from delivery.
//!
//! The coordination server can burst dozens of gameplay events in one
//! frame while downstream chat surfaces rate-limit aggressively, so the
//! queue drains exactly one event per flush tick. Delivery is best-effort:
//! each registered listener gets at most one attempt per event.

use log::warn;
use shared::ItemImportance;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Duration};

/// Fixed drain cadence: one event per tick, by design. This respects the
/// rate limits of downstream chat surfaces and is not a backpressure knob.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

pub type DeliveryResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
pub type DeliveryFn = Box<dyn Fn(&BroadcastMessage) -> DeliveryResult + Send + Sync>;

/// One translated cross-player item transfer, ready for a chat surface.
/// Immutable once constructed; ownership passes to the queue on enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub sender: String,
    pub receiver: String,
    pub item: String,
    pub location: String,
    pub importance: ItemImportance,
}

/// Unbounded FIFO buffer between the coordination client and delivery
/// listeners. Append and pop happen under the queue lock; listeners are
/// invoked in registration order, outside any ordering guarantees beyond
/// the queue's own FIFO property.
pub struct MessageQueue {
    queue: RwLock<VecDeque<BroadcastMessage>>,
    listeners: RwLock<Vec<DeliveryFn>>,
}

impl MessageQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: RwLock::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Appends to the tail. Never blocks on delivery, never drops.
    pub async fn enqueue(&self, message: BroadcastMessage) {
        self.queue.write().await.push_back(message);
    }

    /// Adds a delivery callback. Every registered listener is invoked for
    /// every flushed event.
    pub async fn register_listener<F>(&self, listener: F)
    where
        F: Fn(&BroadcastMessage) -> DeliveryResult + Send + Sync + 'static,
    {
        self.listeners.write().await.push(Box::new(listener));
    }

    pub async fn len(&self) -> usize {
        self.queue.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.read().await.is_empty()
    }

    /// Flush duty: drains one event per tick until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => self.flush_one().await,
            }
        }
    }

    /// Delivers the head event to every listener, then removes it. The
    /// event stays at the head while deliveries run, so a crash before the
    /// pop cannot lose it. Listener failures are logged and dropped; there
    /// are no retries.
    pub async fn flush_one(&self) {
        let listeners = self.listeners.read().await;
        if listeners.is_empty() {
            return;
        }

        let next = self.queue.read().await.front().cloned();
        let Some(message) = next else {
            return;
        };

        for listener in listeners.iter() {
            if let Err(e) = listener(&message) {
                warn!("error delivering message: {e}");
            }
        }

        self.queue.write().await.pop_front();
    }
}
