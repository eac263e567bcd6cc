use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::core::feedback::FeedbackCollector;
use crate::core::service::{InvalidMessage, PushOutcome, PushService, ServiceMessage};

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Concatenating whole conversations into one API call has to stay within
/// Telegram's message size limits, so batches are capped.
const MAX_SQUASH_BATCH: usize = 20;

/// Fields the relay needs to understand; the payload is otherwise forwarded
/// to the Bot API verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TelegramPayload {
    chat_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    caption: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    photo: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramEnvelope {
    method: String,
    payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct TelegramMessage {
    method: String,
    /// Forwarded 1:1 to the API for single sends.
    payload: serde_json::Value,
    parsed: TelegramPayload,
}

impl ServiceMessage for TelegramMessage {
    fn squash_key(&self) -> Option<&str> {
        // Messages to the same chat are one conversation and may be merged.
        Some(&self.parsed.chat_id)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

fn concat_text(buffer: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if buffer.is_empty() || buffer.ends_with("\n\n") {
        // No separator needed
    } else if buffer.ends_with('\n') {
        buffer.push('\n');
    } else {
        buffer.push_str("\n\n");
    }
    buffer.push_str(text);
}

/// Merges same-chat messages into one, concatenating texts and captions.
/// Mixing methods within a batch is refused.
fn squash(messages: &[TelegramMessage]) -> Result<TelegramMessage, InvalidMessage> {
    let Some(first) = messages.first() else {
        return Err(InvalidMessage::new("nothing to squash"));
    };

    let mut texts = String::new();
    let mut captions = String::new();
    for message in messages {
        if message.method != first.method {
            return Err(InvalidMessage::new("cannot squash a mix of methods"));
        }
        if message.parsed.chat_id != first.parsed.chat_id {
            return Err(InvalidMessage::new("different `chat_id` while squashing"));
        }
        concat_text(&mut texts, &message.parsed.text);
        concat_text(&mut captions, &message.parsed.caption);
    }

    let mut merged = first.parsed.clone();
    merged.text = texts;
    merged.caption = captions;
    let payload =
        serde_json::to_value(&merged).map_err(|err| InvalidMessage::new(err.to_string()))?;
    Ok(TelegramMessage {
        method: first.method.clone(),
        payload,
        parsed: merged,
    })
}

/// Telegram Bot API provider. Squash-capable: consecutive messages to the
/// same chat are merged into a single API call.
#[derive(Debug)]
pub struct TelegramService {
    bot_token: String,
}

impl TelegramService {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.bot_token)
    }

    async fn call(
        &self,
        client: &reqwest::Client,
        message: &TelegramMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        let chat_id = &message.parsed.chat_id;
        let response = match client
            .post(self.endpoint(&message.method))
            .json(&message.payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "Telegram request failed");
                return PushOutcome::TempFail;
            }
        };

        let status = response.status();
        let body = response.json::<ApiResponse>().await.unwrap_or(ApiResponse {
            ok: status.is_success(),
            description: None,
        });

        if status.is_success() && body.ok {
            tracing::debug!(%chat_id, method = %message.method, "Telegram message sent");
            return PushOutcome::Success;
        }

        let description = body.description.unwrap_or_default();
        tracing::warn!(%chat_id, %status, %description, "Telegram rejected message");

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return PushOutcome::TempFail;
        }
        if status == StatusCode::FORBIDDEN
            || description.to_ascii_lowercase().contains("chat not found")
        {
            // The bot was blocked or the chat is gone; stop addressing it.
            feedback.token_invalid(self.id(), chat_id).await;
        }
        PushOutcome::HardFail
    }
}

#[async_trait]
impl PushService for TelegramService {
    type Message = TelegramMessage;
    type Client = reqwest::Client;

    fn id(&self) -> &'static str {
        "telegram"
    }

    fn name(&self) -> &'static str {
        "Telegram"
    }

    fn validate(&self, raw: &[u8]) -> Result<(), InvalidMessage> {
        self.convert(raw).map(|_| ())
    }

    fn convert(&self, raw: &[u8]) -> Result<TelegramMessage, InvalidMessage> {
        let envelope: TelegramEnvelope =
            serde_json::from_slice(raw).map_err(|err| InvalidMessage::new(err.to_string()))?;
        if !envelope.method.starts_with("send") {
            return Err(InvalidMessage::new(format!(
                "invalid method: {}",
                envelope.method
            )));
        }
        // The Bot API documents chat_id as "Integer or String"; a string is
        // assumed here.
        let parsed: TelegramPayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|err| InvalidMessage::new(err.to_string()))?;
        if parsed.chat_id.is_empty() {
            return Err(InvalidMessage::new("missing `chat_id`"));
        }
        Ok(TelegramMessage {
            method: envelope.method,
            payload: envelope.payload,
            parsed,
        })
    }

    fn new_client(&self) -> anyhow::Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?)
    }

    fn supports_squashing(&self) -> bool {
        true
    }

    fn max_squash_batch(&self) -> usize {
        MAX_SQUASH_BATCH
    }

    async fn push(
        &self,
        client: &mut reqwest::Client,
        message: &TelegramMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        self.call(client, message, feedback).await
    }

    async fn push_squashed(
        &self,
        client: &mut reqwest::Client,
        messages: &[TelegramMessage],
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        match squash(messages) {
            Ok(merged) => self.call(client, &merged, feedback).await,
            Err(err) => {
                // A batch that cannot be merged is still deliverable one by
                // one.
                tracing::warn!(error = %err, "Squash failed, sending individually");
                let mut worst = PushOutcome::Success;
                for message in messages {
                    let outcome = self.call(client, message, feedback).await;
                    if outcome == PushOutcome::TempFail
                        || (outcome == PushOutcome::HardFail && worst == PushOutcome::Success)
                    {
                        worst = outcome;
                    }
                }
                worst
            }
        }
    }
}
