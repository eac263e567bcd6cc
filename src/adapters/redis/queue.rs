use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{is_connection_error, queue_key};
use crate::core::queue::{Queue, QueueError, QueueFactory, QueuedMessage};

/// Bounded wait per blocking pop, so a dropped `get` future never lingers
/// for long on the server side.
const POP_BLOCK_SECS: f64 = 5.0;

const RETRY_MIN_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
const RETRY_FACTOR: f32 = 1.5;

fn reconnect_backoff() -> backon::ExponentialBackoff {
    ExponentialBuilder::default()
        .with_min_delay(RETRY_MIN_DELAY)
        .with_max_delay(RETRY_MAX_DELAY)
        .with_factor(RETRY_FACTOR)
        .without_max_times()
        .build()
}

fn translate(err: &redis::RedisError) -> QueueError {
    if is_connection_error(err) {
        QueueError::Unavailable(err.to_string())
    } else {
        QueueError::Backend(err.to_string())
    }
}

/// Redis-list-backed queue at `shove:<serviceID>`. Enqueue pushes to the
/// head; the blocking pop drains the tail, so the list is FIFO. The pop is
/// destructive, which makes `remove` a no-op; the lease contract is upheld
/// by holding the message until its terminal classification.
pub struct RedisQueue {
    client: redis::Client,
    publisher: ConnectionManager,
    key: String,
    // Dedicated connection for blocking pops; a blocking command would stall
    // every other command multiplexed on the shared manager.
    pop_conn: Mutex<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").field("key", &self.key).finish()
    }
}

impl RedisQueue {
    fn new(client: redis::Client, publisher: ConnectionManager, key: String) -> Self {
        Self {
            client,
            publisher,
            key,
            pop_conn: Mutex::new(None),
        }
    }

    /// One bounded blocking pop. A timed-out wait yields `Ok(None)`; the
    /// caller polls again.
    async fn blocking_pop(&self) -> Result<Option<Vec<u8>>, redis::RedisError> {
        let mut guard = self.pop_conn.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };

        let popped: Option<(String, Vec<u8>)> = conn.brpop(&self.key, POP_BLOCK_SECS).await?;
        // The connection survived the round trip; keep it for the next pop.
        *guard = Some(conn);
        Ok(popped.map(|(_, raw)| raw))
    }

    async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.publisher.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn queue(&self, raw: &[u8]) -> Result<(), QueueError> {
        let mut conn = self.publisher.clone();
        conn.lpush::<_, _, ()>(&self.key, raw)
            .await
            .map_err(|err| translate(&err))
    }

    async fn get(&self) -> Result<QueuedMessage, QueueError> {
        let mut backoff = reconnect_backoff();
        loop {
            match self.blocking_pop().await {
                Ok(Some(raw)) => return Ok(QueuedMessage::new(raw)),
                Ok(None) => {
                    // An empty, healthy wait resets the reconnect state.
                    backoff = reconnect_backoff();
                }
                Err(err) if is_connection_error(&err) => {
                    let delay = backoff.next().unwrap_or(RETRY_MAX_DELAY);
                    tracing::warn!(
                        error = %err,
                        queue = %self.key,
                        ?delay,
                        "Queue connection lost, backing off"
                    );
                    tokio::time::sleep(delay).await;

                    // Probe before resuming normal dequeues; a failed probe
                    // keeps the backoff growing.
                    if let Err(ping_err) = self.ping().await {
                        tracing::warn!(error = %ping_err, queue = %self.key, "Queue backend still unreachable");
                    }
                }
                Err(err) => return Err(translate(&err)),
            }
        }
    }

    async fn remove(&self, _msg: QueuedMessage) -> Result<(), QueueError> {
        // The blocking pop already removed the message.
        Ok(())
    }

    async fn requeue(&self, msg: QueuedMessage) -> Result<(), QueueError> {
        let mut conn = self.publisher.clone();
        conn.lpush::<_, _, ()>(&self.key, msg.raw())
            .await
            .map_err(|err| translate(&err))
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        // Nothing to release; the bounded pop unblocks on its own and the
        // pump stops polling.
        Ok(())
    }
}

/// Creates `shove:<serviceID>` queues sharing one pooled connection manager.
pub struct RedisQueueFactory {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisQueueFactory {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut publisher = client.get_connection_manager().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut publisher)
            .await?;
        tracing::info!("Connected to Redis");
        Ok(Self { client, publisher })
    }

    /// Shared connection manager, reusable by the feedback store.
    pub fn publisher(&self) -> ConnectionManager {
        self.publisher.clone()
    }
}

#[async_trait]
impl QueueFactory for RedisQueueFactory {
    async fn queue(&self, service_id: &str) -> Result<Arc<dyn Queue>, QueueError> {
        let key = queue_key(service_id);
        tracing::info!(queue = %key, "Creating Redis queue");
        Ok(Arc::new(RedisQueue::new(
            self.client.clone(),
            self.publisher.clone(),
            key,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = reconnect_backoff();
        let first = backoff.next().unwrap();
        assert_eq!(first, RETRY_MIN_DELAY);

        let mut last = first;
        for _ in 0..40 {
            let next = backoff.next().unwrap();
            assert!(next >= last);
            assert!(next <= RETRY_MAX_DELAY);
            last = next;
        }
        assert_eq!(last, RETRY_MAX_DELAY);
    }
}
