#![allow(dead_code)]
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use shove::adapters::memory::{MemoryFeedbackStore, MemoryQueueFactory};
use shove::api::app_router;
use shove::core::feedback::FeedbackCollector;
use shove::core::registry::ServiceRegistry;
use shove::core::service::{InvalidMessage, PushOutcome, PushService, ServiceMessage};
use shove::telemetry::PushMetrics;
use tokio::net::TcpListener;

static INIT: OnceLock<()> = OnceLock::new();

pub fn setup_tracing() {
    INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into());
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

/// One outbound call observed by the mock provider.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub payloads: Vec<Vec<u8>>,
    pub squash_keys: Vec<Option<String>>,
    pub squashed: bool,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<RecordedCall>,
    pub outcomes: VecDeque<PushOutcome>,
}

/// Shared view into what a [`MockService`] has delivered.
#[derive(Debug, Clone, Default)]
pub struct MockLog(Arc<Mutex<MockState>>);

impl MockLog {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.0.lock().unwrap().calls.len()
    }

    /// All delivered payloads, flattened in dispatch order.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .calls
            .iter()
            .flat_map(|call| call.payloads.clone())
            .collect()
    }

    pub fn payload_count(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|call| call.payloads.len())
            .sum()
    }
}

pub struct MockMessage {
    raw: Vec<u8>,
    key: Option<String>,
}

impl ServiceMessage for MockMessage {
    fn squash_key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// Scripted provider: JSON payloads, optional `key` field as the squash key,
/// outcomes played back from a queue (Success once the script runs out).
pub struct MockService {
    id: &'static str,
    squashing: bool,
    delay: Option<Duration>,
    invalid_token: Option<String>,
    log: MockLog,
}

impl MockService {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            squashing: false,
            delay: None,
            invalid_token: None,
            log: MockLog::default(),
        }
    }

    pub fn with_squashing(mut self) -> Self {
        self.squashing = true;
        self
    }

    pub fn with_outcomes(self, outcomes: Vec<PushOutcome>) -> Self {
        self.log.0.lock().unwrap().outcomes = outcomes.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every push report this token as invalid.
    pub fn with_invalid_token(mut self, token: &str) -> Self {
        self.invalid_token = Some(token.to_string());
        self
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }

    fn record(&self, messages: &[MockMessage], squashed: bool) -> PushOutcome {
        let mut state = self.log.0.lock().unwrap();
        state.calls.push(RecordedCall {
            payloads: messages.iter().map(|m| m.raw.clone()).collect(),
            squash_keys: messages.iter().map(|m| m.key.clone()).collect(),
            squashed,
        });
        state.outcomes.pop_front().unwrap_or(PushOutcome::Success)
    }
}

#[async_trait]
impl PushService for MockService {
    type Message = MockMessage;
    type Client = ();

    fn id(&self) -> &'static str {
        self.id
    }

    fn name(&self) -> &'static str {
        "Mock"
    }

    fn validate(&self, raw: &[u8]) -> Result<(), InvalidMessage> {
        self.convert(raw).map(|_| ())
    }

    fn convert(&self, raw: &[u8]) -> Result<MockMessage, InvalidMessage> {
        let value: serde_json::Value =
            serde_json::from_slice(raw).map_err(|err| InvalidMessage::new(err.to_string()))?;
        let key = value
            .get("key")
            .and_then(|key| key.as_str())
            .map(String::from);
        Ok(MockMessage {
            raw: raw.to_vec(),
            key,
        })
    }

    fn new_client(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn supports_squashing(&self) -> bool {
        self.squashing
    }

    async fn push(
        &self,
        _client: &mut (),
        message: &MockMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(token) = &self.invalid_token {
            feedback.token_invalid(self.id, token).await;
        }
        self.record(std::slice::from_ref(message), false)
    }

    async fn push_squashed(
        &self,
        _client: &mut (),
        messages: &[MockMessage],
        _feedback: &dyn FeedbackCollector,
    ) -> PushOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.record(messages, true)
    }
}

/// Registry with in-memory substrates, no HTTP.
pub struct TestRelay {
    pub registry: Arc<ServiceRegistry>,
    pub queues: Arc<MemoryQueueFactory>,
    pub store: Arc<MemoryFeedbackStore>,
}

pub fn test_relay() -> TestRelay {
    setup_tracing();
    let queues = Arc::new(MemoryQueueFactory::new());
    let store = Arc::new(MemoryFeedbackStore::new());
    let metrics = prometheus::Registry::new();
    let push_metrics = PushMetrics::new(&metrics).expect("metrics registration");
    let registry = Arc::new(ServiceRegistry::new(
        Arc::clone(&queues) as Arc<dyn shove::core::queue::QueueFactory>,
        Arc::clone(&store) as Arc<dyn shove::core::feedback::FeedbackStore>,
        push_metrics,
    ));
    TestRelay {
        registry,
        queues,
        store,
    }
}

/// Full HTTP server on an ephemeral port, backed by in-memory substrates.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub registry: Arc<ServiceRegistry>,
    pub queues: Arc<MemoryQueueFactory>,
    pub store: Arc<MemoryFeedbackStore>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        setup_tracing();
        let queues = Arc::new(MemoryQueueFactory::new());
        let store = Arc::new(MemoryFeedbackStore::new());
        let metrics = prometheus::Registry::new();
        let push_metrics = PushMetrics::new(&metrics).expect("metrics registration");
        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&queues) as Arc<dyn shove::core::queue::QueueFactory>,
            Arc::clone(&store) as Arc<dyn shove::core::feedback::FeedbackStore>,
            push_metrics,
        ));

        let app = app_router(Arc::clone(&registry), metrics);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            registry,
            queues,
            store,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn push(&self, service: &str, body: &[u8]) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/push/{service}")))
            .body(body.to_vec())
            .send()
            .await
            .expect("push request")
    }
}

/// Polls a predicate until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
