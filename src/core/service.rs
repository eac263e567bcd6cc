use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::feedback::FeedbackCollector;

/// Classification of a single provider delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted by the provider; ack and drop.
    Success,
    /// Transient failure (network, 5xx, provider throttling); requeue and
    /// retry later.
    TempFail,
    /// Permanent failure (malformed, unauthorized, unknown token); ack and
    /// drop. Token feedback may have been emitted by the adapter.
    HardFail,
}

/// Rate limiting and squashing parameters for one service.
///
/// `rate_max == 0` disables rate limiting. While rate limiting is active,
/// squash-capable services also coalesce same-key messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquashConfig {
    pub rate_max: u32,
    pub rate_per: Duration,
}

impl SquashConfig {
    pub fn is_enabled(&self) -> bool {
        self.rate_max > 0 && !self.rate_per.is_zero()
    }
}

/// Raised when a raw payload fails validation or conversion.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidMessage(String);

impl InvalidMessage {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Adapter-parsed form of a raw payload.
pub trait ServiceMessage: Send + Sync {
    /// Key identifying messages that may be coalesced into a single outbound
    /// call. `None` marks the message as not squashable.
    fn squash_key(&self) -> Option<&str>;
}

/// Capability bundle every provider adapter exposes. The concrete wire
/// protocol lives entirely behind this trait; the pump only sees parsed
/// messages, per-worker clients and outcome classifications.
#[async_trait]
pub trait PushService: Send + Sync + 'static {
    /// Adapter-parsed message form.
    type Message: ServiceMessage + Send + Sync + 'static;
    /// Per-worker connection/session handle, opaque to the pump.
    type Client: Send + 'static;

    /// Short ASCII tag identifying the service, unique per server instance.
    fn id(&self) -> &'static str;

    /// Human-readable name used in logs.
    fn name(&self) -> &'static str;

    /// Cheap syntactic check, called synchronously on ingress.
    fn validate(&self, raw: &[u8]) -> Result<(), InvalidMessage>;

    /// Parses a raw payload into the adapter-specific form.
    fn convert(&self, raw: &[u8]) -> Result<Self::Message, InvalidMessage>;

    /// Creates a connection handle for one worker, held for the worker's
    /// lifetime.
    fn new_client(&self) -> anyhow::Result<Self::Client>;

    /// Whether batches sharing a squash key may be delivered via
    /// [`push_squashed`](PushService::push_squashed). The pump consults this
    /// declared capability instead of probing at runtime.
    fn supports_squashing(&self) -> bool {
        false
    }

    /// Upper bound on the size of a squashed batch.
    fn max_squash_batch(&self) -> usize {
        usize::MAX
    }

    /// Performs a single delivery.
    async fn push(
        &self,
        client: &mut Self::Client,
        message: &Self::Message,
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome;

    /// Delivers a coalesced batch as one outbound call. Only invoked with two
    /// or more messages sharing a squash key, and only when
    /// `supports_squashing()` returns true. The default falls back to
    /// sequential single pushes and reports the worst outcome seen.
    async fn push_squashed(
        &self,
        client: &mut Self::Client,
        messages: &[Self::Message],
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        let mut worst = PushOutcome::Success;
        for message in messages {
            let outcome = self.push(client, message, feedback).await;
            worst = match (worst, outcome) {
                (_, PushOutcome::TempFail) | (PushOutcome::TempFail, _) => PushOutcome::TempFail,
                (_, PushOutcome::HardFail) | (PushOutcome::HardFail, _) => PushOutcome::HardFail,
                _ => PushOutcome::Success,
            };
        }
        worst
    }
}
