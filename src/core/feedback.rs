use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::telemetry::PushMetrics;

/// Default number of entries returned by a store `pop`/`peek` when the caller
/// passes `0`.
pub const DEFAULT_STORE_LIMIT: usize = 100;

const FEEDBACK_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackReason {
    Invalid,
    Replaced,
}

/// Feedback about an invalid or replaced device token. The JSON field names
/// are part of the external contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFeedback {
    pub service: String,
    pub token: String,
    #[serde(
        rename = "replacement_token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub replacement: Option<String>,
    pub reason: FeedbackReason,
    pub timestamp: i64,
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback backend error: {0}")]
    Backend(String),
}

/// Append-and-drain log of token-feedback records.
#[async_trait]
pub trait FeedbackStore: Send + Sync + fmt::Debug {
    /// Appends an entry at the head of the store (newest first).
    async fn push(&self, feedback: TokenFeedback) -> Result<(), FeedbackError>;

    /// Removes and returns up to `limit` entries, oldest first.
    /// `limit == 0` falls back to [`DEFAULT_STORE_LIMIT`].
    async fn pop(&self, limit: usize) -> Result<Vec<TokenFeedback>, FeedbackError>;

    /// Returns up to `limit` entries, oldest first, without removing them.
    async fn peek(&self, limit: usize) -> Result<Vec<TokenFeedback>, FeedbackError>;

    /// Number of entries currently stored.
    async fn len(&self) -> Result<u64, FeedbackError>;

    /// Releases backend resources.
    async fn close(&self) -> Result<(), FeedbackError>;
}

/// Capability the pump and the provider adapters use to report token
/// lifecycle events and per-push telemetry.
#[async_trait]
pub trait FeedbackCollector: Send + Sync {
    /// Records that a device token is no longer valid.
    async fn token_invalid(&self, service_id: &str, token: &str);

    /// Records that a device token should be replaced with a new one.
    async fn replace_token(&self, service_id: &str, token: &str, replacement: &str);

    /// Telemetry hook, called once per outbound dispatch.
    fn count_push(&self, service_id: &str, success: bool, duration: Duration);
}

/// Funnels token feedback into a [`FeedbackStore`]. Writes are bounded to
/// 5 seconds and failures are logged and swallowed: feedback is best-effort
/// observable, not part of the delivery contract.
pub struct FeedbackSink {
    store: Arc<dyn FeedbackStore>,
    metrics: PushMetrics,
}

impl FeedbackSink {
    pub fn new(store: Arc<dyn FeedbackStore>, metrics: PushMetrics) -> Self {
        Self { store, metrics }
    }

    async fn write(&self, feedback: TokenFeedback) -> bool {
        let service = feedback.service.clone();
        match tokio::time::timeout(FEEDBACK_WRITE_TIMEOUT, self.store.push(feedback)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::error!(error = %err, service = %service, "Failed to store token feedback");
                false
            }
            Err(_) => {
                tracing::error!(service = %service, "Timed out storing token feedback");
                false
            }
        }
    }
}

#[async_trait]
impl FeedbackCollector for FeedbackSink {
    async fn token_invalid(&self, service_id: &str, token: &str) {
        let feedback = TokenFeedback {
            service: service_id.to_string(),
            token: token.to_string(),
            replacement: None,
            reason: FeedbackReason::Invalid,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };
        if self.write(feedback).await {
            tracing::info!(service = service_id, token, "Invalid token");
        }
    }

    async fn replace_token(&self, service_id: &str, token: &str, replacement: &str) {
        let feedback = TokenFeedback {
            service: service_id.to_string(),
            token: token.to_string(),
            replacement: Some(replacement.to_string()),
            reason: FeedbackReason::Replaced,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };
        if self.write(feedback).await {
            tracing::info!(service = service_id, "Token replaced");
        }
    }

    fn count_push(&self, service_id: &str, success: bool, duration: Duration) {
        self.metrics.observe_push(service_id, success, duration);
    }
}
