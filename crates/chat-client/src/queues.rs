//! Typed notification queues for a client session.
//!
//! The receive loop is the only producer; the polling side (UI or
//! tests) is the only consumer. Both notification FIFOs sit behind a
//! single lock, so pushes and pops across categories serialize; the
//! error FIFO has its own lock because errors are recorded from the
//! synchronous call path, not the receive loop.
//!
//! The queues are unbounded, matching the engine's no-backpressure
//! contract: a consumer that never polls lets memory grow without
//! limit. Callers that care must drain.

use std::collections::VecDeque;
use std::sync::Mutex;

use chat_core::{Category, ReceivedMessage};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Notifications {
    broadcast: VecDeque<ReceivedMessage>,
    direct: VecDeque<ReceivedMessage>,
}

impl Notifications {
    fn queue_mut(&mut self, category: Category) -> &mut VecDeque<ReceivedMessage> {
        match category {
            Category::Broadcast => &mut self.broadcast,
            Category::Direct => &mut self.direct,
        }
    }
}

/// FIFO storage per message category plus the error queue.
#[derive(Debug, Default)]
pub struct MessageQueues {
    notifications: Mutex<Notifications>,
    errors: Mutex<VecDeque<String>>,
    broadcast_ready: Notify,
    direct_ready: Notify,
}

impl MessageQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn ready(&self, category: Category) -> &Notify {
        match category {
            Category::Broadcast => &self.broadcast_ready,
            Category::Direct => &self.direct_ready,
        }
    }

    /// Append a message to its category queue. Insertion order is
    /// delivery order.
    pub fn push(&self, msg: ReceivedMessage) {
        let category = msg.category;
        {
            let mut guard = self.notifications.lock().expect("queue lock poisoned");
            guard.queue_mut(category).push_back(msg);
        }
        self.ready(category).notify_one();
    }

    /// Non-blocking pop, oldest first. `None` when the queue is empty.
    pub fn try_pop(&self, category: Category) -> Option<ReceivedMessage> {
        let mut guard = self.notifications.lock().expect("queue lock poisoned");
        guard.queue_mut(category).pop_front()
    }

    /// Pop the oldest message of a category, waiting for one to arrive
    /// if the queue is currently empty.
    pub async fn pop(&self, category: Category) -> ReceivedMessage {
        loop {
            if let Some(msg) = self.try_pop(category) {
                return msg;
            }
            self.ready(category).notified().await;
        }
    }

    /// Number of queued messages in one category.
    pub fn len(&self, category: Category) -> usize {
        let mut guard = self.notifications.lock().expect("queue lock poisoned");
        guard.queue_mut(category).len()
    }

    pub fn is_empty(&self, category: Category) -> bool {
        self.len(category) == 0
    }

    /// Record a server-reported error for later retrieval.
    pub fn push_error(&self, message: String) {
        let mut guard = self.errors.lock().expect("error queue lock poisoned");
        guard.push_back(message);
    }

    /// Pop the oldest recorded error, if any.
    pub fn last_error(&self) -> Option<String> {
        let mut guard = self.errors.lock().expect("error queue lock poisoned");
        guard.pop_front()
    }
}
