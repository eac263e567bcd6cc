use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::FEEDBACK_KEY;
use crate::core::feedback::{FeedbackError, FeedbackStore, TokenFeedback, DEFAULT_STORE_LIMIT};

fn translate(err: &redis::RedisError) -> FeedbackError {
    FeedbackError::Backend(err.to_string())
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_STORE_LIMIT
    } else {
        limit
    }
}

/// Parses a raw list entry, dropping unparseable records with a warning
/// instead of aborting the batch.
fn decode(items: Vec<Vec<u8>>) -> Vec<TokenFeedback> {
    let mut result = Vec::with_capacity(items.len());
    // The list head holds the newest entry, so the tail window comes back
    // newest-first; reverse it for oldest-first batches.
    for item in items.into_iter().rev() {
        match serde_json::from_slice::<TokenFeedback>(&item) {
            Ok(feedback) => result.push(feedback),
            Err(err) => tracing::warn!(error = %err, "Failed to parse feedback entry"),
        }
    }
    result
}

/// Redis-backed feedback store at `shove:feedback`. Feedback survives server
/// restarts and external systems can consume the list directly.
pub struct RedisFeedbackStore {
    publisher: ConnectionManager,
}

impl std::fmt::Debug for RedisFeedbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFeedbackStore")
            .field("key", &FEEDBACK_KEY)
            .finish()
    }
}

impl RedisFeedbackStore {
    /// Reuses an existing pooled connection, typically the queue factory's.
    pub fn with_connection(publisher: ConnectionManager) -> Self {
        Self { publisher }
    }

    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut publisher = client.get_connection_manager().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut publisher)
            .await?;
        tracing::info!(key = FEEDBACK_KEY, "Redis feedback store connected");
        Ok(Self { publisher })
    }
}

#[async_trait]
impl FeedbackStore for RedisFeedbackStore {
    async fn push(&self, feedback: TokenFeedback) -> Result<(), FeedbackError> {
        let data =
            serde_json::to_vec(&feedback).map_err(|err| FeedbackError::Backend(err.to_string()))?;
        let mut conn = self.publisher.clone();
        conn.lpush::<_, _, ()>(FEEDBACK_KEY, data)
            .await
            .map_err(|err| translate(&err))
    }

    async fn pop(&self, limit: usize) -> Result<Vec<TokenFeedback>, FeedbackError> {
        let limit = effective_limit(limit) as isize;
        let mut conn = self.publisher.clone();

        // Range and trim must land together so a concurrent pop cannot read
        // the same tail window.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrange(FEEDBACK_KEY, -limit, -1)
            .ltrim(FEEDBACK_KEY, 0, -(limit + 1));
        let (items, ()): (Vec<Vec<u8>>, ()) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| translate(&err))?;

        Ok(decode(items))
    }

    async fn peek(&self, limit: usize) -> Result<Vec<TokenFeedback>, FeedbackError> {
        let limit = effective_limit(limit) as isize;
        let mut conn = self.publisher.clone();
        let items: Vec<Vec<u8>> = conn
            .lrange(FEEDBACK_KEY, -limit, -1)
            .await
            .map_err(|err| translate(&err))?;
        Ok(decode(items))
    }

    async fn len(&self) -> Result<u64, FeedbackError> {
        let mut conn = self.publisher.clone();
        conn.llen(FEEDBACK_KEY)
            .await
            .map_err(|err| translate(&err))
    }

    async fn close(&self) -> Result<(), FeedbackError> {
        // Pooled connections are released on drop.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feedback::FeedbackReason;

    #[test]
    fn decode_reverses_to_oldest_first_and_skips_garbage() {
        let newest = TokenFeedback {
            service: "fcm".to_string(),
            token: "new".to_string(),
            replacement: None,
            reason: FeedbackReason::Invalid,
            timestamp: 2,
        };
        let oldest = TokenFeedback {
            service: "fcm".to_string(),
            token: "old".to_string(),
            replacement: None,
            reason: FeedbackReason::Invalid,
            timestamp: 1,
        };
        // Tail window as redis returns it: newest first, oldest last.
        let items = vec![
            serde_json::to_vec(&newest).unwrap(),
            b"not json".to_vec(),
            serde_json::to_vec(&oldest).unwrap(),
        ];

        let decoded = decode(items);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].token, "old");
        assert_eq!(decoded[1].token, "new");
    }

    #[test]
    fn zero_limit_falls_back_to_default() {
        assert_eq!(effective_limit(0), DEFAULT_STORE_LIMIT);
        assert_eq!(effective_limit(7), 7);
    }
}
