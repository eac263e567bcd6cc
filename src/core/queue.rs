use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced past the queue boundary. Backend-specific failures are
/// translated here so callers never see substrate error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was shut down; no further messages will be delivered.
    #[error("queue is shut down")]
    Closed,
    /// Transient backend failure; the operation may be retried.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),
    /// Permanent backend failure.
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A message leased from a queue. Between `get` and `remove`/`requeue` the
/// message is in flight and invisible to other consumers of the same queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    raw: Vec<u8>,
}

impl QueuedMessage {
    pub(crate) fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

/// FIFO of opaque payloads for one service, with blocking dequeue and
/// explicit ack/requeue.
#[async_trait]
pub trait Queue: Send + Sync + fmt::Debug {
    /// Appends a raw payload at the tail of the queue.
    async fn queue(&self, raw: &[u8]) -> Result<(), QueueError>;

    /// Blocks until a message is available and leases it from the head.
    ///
    /// Transient backend failures are retried internally; this call only
    /// returns a message, or `QueueError::Closed` once the queue is shut down.
    async fn get(&self) -> Result<QueuedMessage, QueueError>;

    /// Acknowledges an in-flight message, removing it permanently.
    async fn remove(&self, msg: QueuedMessage) -> Result<(), QueueError>;

    /// Returns an in-flight message to the queue for a later retry.
    async fn requeue(&self, msg: QueuedMessage) -> Result<(), QueueError>;

    /// Unblocks pending and future `get` calls with `QueueError::Closed`.
    async fn shutdown(&self) -> Result<(), QueueError>;
}

/// Produces `Queue` instances bound to a service id.
#[async_trait]
pub trait QueueFactory: Send + Sync {
    async fn queue(&self, service_id: &str) -> Result<Arc<dyn Queue>, QueueError>;
}
