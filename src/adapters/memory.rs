use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};

use crate::core::feedback::{FeedbackError, FeedbackStore, TokenFeedback, DEFAULT_STORE_LIMIT};
use crate::core::queue::{Queue, QueueError, QueueFactory, QueuedMessage};

/// In-memory FIFO queue. Not persistent: messages are lost on process exit.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn queue(&self, raw: &[u8]) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.messages.lock().await.push_back(raw.to_vec());
        self.notify.notify_one();
        Ok(())
    }

    async fn get(&self) -> Result<QueuedMessage, QueueError> {
        loop {
            // Register for a wakeup before re-checking state, so a push or
            // shutdown between the check and the await is not missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(raw) = self.messages.lock().await.pop_front() {
                return Ok(QueuedMessage::new(raw));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Closed);
            }

            notified.await;
        }
    }

    async fn remove(&self, _msg: QueuedMessage) -> Result<(), QueueError> {
        // The dequeue already took the message out.
        Ok(())
    }

    async fn requeue(&self, msg: QueuedMessage) -> Result<(), QueueError> {
        self.messages.lock().await.push_back(msg.into_raw());
        self.notify.notify_one();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Hands out one shared in-memory queue per service id.
#[derive(Debug, Default)]
pub struct MemoryQueueFactory {
    queues: DashMap<String, Arc<MemoryQueue>>,
}

impl MemoryQueueFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the queue for `service_id` if one was created already. Useful
    /// for inspection in tests.
    pub fn queue_handle(&self, service_id: &str) -> Option<Arc<MemoryQueue>> {
        self.queues.get(service_id).map(|entry| Arc::clone(&entry))
    }
}

#[async_trait]
impl QueueFactory for MemoryQueueFactory {
    async fn queue(&self, service_id: &str) -> Result<Arc<dyn Queue>, QueueError> {
        let queue = self
            .queues
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new()))
            .clone();
        Ok(queue)
    }
}

/// In-memory feedback store. Feedback is lost on restart; the redis store
/// persists across restarts.
#[derive(Debug, Default)]
pub struct MemoryFeedbackStore {
    entries: Mutex<VecDeque<TokenFeedback>>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_STORE_LIMIT
    } else {
        limit
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn push(&self, feedback: TokenFeedback) -> Result<(), FeedbackError> {
        self.entries.lock().await.push_front(feedback);
        Ok(())
    }

    async fn pop(&self, limit: usize) -> Result<Vec<TokenFeedback>, FeedbackError> {
        let limit = effective_limit(limit);
        let mut entries = self.entries.lock().await;
        let mut result = Vec::with_capacity(limit.min(entries.len()));
        while result.len() < limit {
            let Some(oldest) = entries.pop_back() else {
                break;
            };
            result.push(oldest);
        }
        Ok(result)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<TokenFeedback>, FeedbackError> {
        let limit = effective_limit(limit);
        let entries = self.entries.lock().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn len(&self) -> Result<u64, FeedbackError> {
        Ok(self.entries.lock().await.len() as u64)
    }

    async fn close(&self) -> Result<(), FeedbackError> {
        Ok(())
    }
}
