use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::feedback::{FeedbackCollector, FeedbackSink, FeedbackStore};
use crate::core::pump::Pump;
use crate::core::queue::{Queue, QueueFactory};
use crate::core::service::{InvalidMessage, PushService, SquashConfig};
use crate::error::AppError;
use crate::telemetry::PushMetrics;

/// Object-safe slice of a [`PushService`] used by the ingress path.
trait IngressService: Send + Sync {
    fn validate(&self, raw: &[u8]) -> Result<(), InvalidMessage>;
}

impl<S: PushService> IngressService for S {
    fn validate(&self, raw: &[u8]) -> Result<(), InvalidMessage> {
        PushService::validate(self, raw)
    }
}

struct ServiceHandle {
    ingress: Arc<dyn IngressService>,
    queue: Arc<dyn Queue>,
    shutdown: watch::Sender<bool>,
    pump: JoinHandle<()>,
}

impl ServiceHandle {
    async fn stop(self, service_id: &str) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.queue.shutdown().await {
            tracing::warn!(error = %err, service = service_id, "Failed to shut down queue");
        }
        if let Err(err) = self.pump.await {
            tracing::error!(error = %err, service = service_id, "Pump task failed");
        }
    }
}

/// Server core: owns one pump per service, validates and enqueues incoming
/// payloads, and tears everything down in order on shutdown.
pub struct ServiceRegistry {
    queues: Arc<dyn QueueFactory>,
    feedback_store: Arc<dyn FeedbackStore>,
    feedback_sink: Arc<FeedbackSink>,
    services: DashMap<&'static str, ServiceHandle>,
    shutting_down: AtomicBool,
}

impl ServiceRegistry {
    pub fn new(
        queues: Arc<dyn QueueFactory>,
        feedback_store: Arc<dyn FeedbackStore>,
        metrics: PushMetrics,
    ) -> Self {
        let feedback_sink = Arc::new(FeedbackSink::new(Arc::clone(&feedback_store), metrics));
        Self {
            queues,
            feedback_store,
            feedback_sink,
            services: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn feedback_store(&self) -> Arc<dyn FeedbackStore> {
        Arc::clone(&self.feedback_store)
    }

    /// Registers a service and launches its pump. Duplicate service ids are
    /// refused.
    pub async fn add_service<S: PushService>(
        &self,
        service: S,
        workers: usize,
        squash: SquashConfig,
    ) -> Result<(), AppError> {
        let id = service.id();
        if self.services.contains_key(id) {
            return Err(AppError::DuplicateService(id.to_string()));
        }

        tracing::info!(service = id, name = service.name(), workers, "Initializing service");
        let queue = self.queues.queue(id).await?;
        let service = Arc::new(service);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = Pump::new(
            Arc::clone(&service),
            Arc::clone(&queue),
            workers,
            squash,
            Arc::clone(&self.feedback_sink) as Arc<dyn FeedbackCollector>,
        );
        let task = tokio::spawn(pump.run(shutdown_rx));

        self.services.insert(
            id,
            ServiceHandle {
                ingress: service,
                queue,
                shutdown: shutdown_tx,
                pump: task,
            },
        );
        tracing::info!(service = id, workers, "Service started");
        Ok(())
    }

    /// Validates a raw payload against the owning service and enqueues it for
    /// asynchronous delivery.
    pub async fn push(&self, service_id: &str, raw: &[u8]) -> Result<(), AppError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::ShuttingDown);
        }

        let (ingress, queue) = {
            let handle = self
                .services
                .get(service_id)
                .ok_or_else(|| AppError::UnknownService(service_id.to_string()))?;
            (Arc::clone(&handle.ingress), Arc::clone(&handle.queue))
        };

        ingress
            .validate(raw)
            .map_err(|err| AppError::InvalidMessage(err.to_string()))?;
        queue.queue(raw).await?;
        Ok(())
    }

    /// Stops accepting new submissions, drains every pump, and closes the
    /// feedback store. Callers bound the wait with their own timeout.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let ids: Vec<&'static str> = self.services.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.services.remove(id) {
                handle.stop(id).await;
                tracing::info!(service = id, "Service stopped");
            }
        }

        if let Err(err) = self.feedback_store.close().await {
            tracing::error!(error = %err, "Failed to close feedback store");
        }
    }
}
