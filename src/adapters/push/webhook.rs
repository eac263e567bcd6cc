use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::core::feedback::FeedbackCollector;
use crate::core::service::{InvalidMessage, PushOutcome, PushService, ServiceMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize)]
struct WebhookPayload {
    url: String,
    data: serde_json::Value,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// A parsed webhook delivery: POST `data` as JSON to `url`.
#[derive(Debug)]
pub struct WebhookMessage {
    payload: WebhookPayload,
}

impl ServiceMessage for WebhookMessage {
    fn squash_key(&self) -> Option<&str> {
        None
    }
}

/// Generic webhook provider. The receiving endpoint plays the role of the
/// device: a vanished endpoint (404/410) is reported as an invalid token.
#[derive(Debug, Default)]
pub struct WebhookService;

impl WebhookService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushService for WebhookService {
    type Message = WebhookMessage;
    type Client = reqwest::Client;

    fn id(&self) -> &'static str {
        "webhook"
    }

    fn name(&self) -> &'static str {
        "Webhook"
    }

    fn validate(&self, raw: &[u8]) -> Result<(), InvalidMessage> {
        self.convert(raw).map(|_| ())
    }

    fn convert(&self, raw: &[u8]) -> Result<WebhookMessage, InvalidMessage> {
        let payload: WebhookPayload =
            serde_json::from_slice(raw).map_err(|err| InvalidMessage::new(err.to_string()))?;
        let url = reqwest::Url::parse(&payload.url)
            .map_err(|err| InvalidMessage::new(format!("invalid `url`: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(WebhookMessage { payload }),
            other => Err(InvalidMessage::new(format!(
                "unsupported `url` scheme: {other}"
            ))),
        }
    }

    fn new_client(&self) -> anyhow::Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?)
    }

    async fn push(
        &self,
        client: &mut reqwest::Client,
        message: &WebhookMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        let mut request = client
            .post(&message.payload.url)
            .json(&message.payload.data);
        for (name, value) in &message.payload.headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, url = %message.payload.url, "Webhook delivery failed");
                return PushOutcome::TempFail;
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %message.payload.url, "Webhook delivered");
            return PushOutcome::Success;
        }

        tracing::warn!(url = %message.payload.url, %status, "Webhook rejected");
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            // The endpoint is gone for good; report it so the owner stops
            // addressing it.
            feedback.token_invalid(self.id(), &message.payload.url).await;
            return PushOutcome::HardFail;
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            PushOutcome::TempFail
        } else {
            PushOutcome::HardFail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_accepts_http_targets() {
        let service = WebhookService::new();
        let raw = br#"{"url": "https://example.com/hook", "data": {"id": 1}}"#;
        assert!(service.convert(raw).is_ok());
    }

    #[test]
    fn convert_rejects_non_http_schemes() {
        let service = WebhookService::new();
        let raw = br#"{"url": "ftp://example.com/hook", "data": {}}"#;
        assert!(service.convert(raw).is_err());
    }

    #[test]
    fn convert_rejects_missing_fields() {
        let service = WebhookService::new();
        assert!(service.convert(br#"{"data": {}}"#).is_err());
        assert!(service.convert(b"not json").is_err());
    }

    #[test]
    fn webhook_messages_never_squash() {
        let service = WebhookService::new();
        let raw = br#"{"url": "https://example.com/hook", "data": {}}"#;
        let message = service.convert(raw).unwrap();
        assert!(message.squash_key().is_none());
    }
}
