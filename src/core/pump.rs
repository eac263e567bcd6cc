use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::core::feedback::FeedbackCollector;
use crate::core::queue::{Queue, QueueError, QueuedMessage};
use crate::core::rate_limit::RateLimiter;
use crate::core::service::{PushOutcome, PushService, ServiceMessage, SquashConfig};

/// How many leased messages the fetch task may buffer ahead of batch
/// assembly. Anything still buffered at shutdown is requeued.
const FETCH_BUFFER: usize = 16;

/// A leased message paired with its parsed form.
struct Parsed<S: PushService> {
    handle: QueuedMessage,
    message: S::Message,
}

enum Absorbed<S: PushService> {
    /// The message joined the batch, or was unparseable and got acked away.
    Consumed,
    /// The message bears a different squash key and opens the next batch.
    NextBatch(Parsed<S>),
}

/// Per-service scheduler: a single fetch task drains the queue, consecutive
/// same-key messages are coalesced while the rate gate withholds permits, and
/// batches are handed off to a bounded pool of push workers.
///
/// Every leased message is terminalized exactly once: removed on
/// Success/HardFail, requeued on TempFail, or requeued when still
/// undispatched at shutdown.
pub struct Pump<S: PushService> {
    service: Arc<S>,
    queue: Arc<dyn Queue>,
    workers: usize,
    squash: SquashConfig,
    feedback: Arc<dyn FeedbackCollector>,
}

impl<S: PushService> Pump<S> {
    pub fn new(
        service: Arc<S>,
        queue: Arc<dyn Queue>,
        workers: usize,
        squash: SquashConfig,
        feedback: Arc<dyn FeedbackCollector>,
    ) -> Self {
        Self {
            service,
            queue,
            workers: workers.max(1),
            squash,
            feedback,
        }
    }

    /// Runs until `shutdown` flips, then drains: no new leases are taken,
    /// in-flight outbound calls complete, and undispatched leases are
    /// requeued.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("pump", service = self.service.id());
        self.serve(shutdown).instrument(span).await;
    }

    async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let limiter = RateLimiter::new(&self.squash);
        let squashing = self.squash.is_enabled() && self.service.supports_squashing();

        let (fetch_tx, mut fetch_rx) = mpsc::channel::<QueuedMessage>(FETCH_BUFFER);
        let fetcher = self.spawn_fetcher(fetch_tx, shutdown.clone());

        let (batch_tx, batch_rx) = mpsc::channel::<Vec<Parsed<S>>>(1);
        let mut pool = self.spawn_workers(batch_rx);

        let mut pending: Option<Parsed<S>> = None;
        'assemble: loop {
            let first = match pending.take() {
                Some(parsed) => parsed,
                None => match fetch_rx.recv().await {
                    Some(leased) => match self.parse(leased).await {
                        Some(parsed) => parsed,
                        None => continue,
                    },
                    None => break,
                },
            };

            let mut batch = vec![first];
            let mut permit_taken = false;
            let mut draining = false;

            if squashing && batch[0].message.squash_key().is_some() {
                let cap = self.service.max_squash_batch().max(1);
                while batch.len() < cap {
                    // Drain whatever is already at hand before deciding to
                    // close the batch; the yield gives the fetch task a
                    // chance to hand over messages it has dequeued.
                    let immediate = match fetch_rx.try_recv() {
                        Ok(leased) => Some(leased),
                        Err(TryRecvError::Empty) => {
                            tokio::task::yield_now().await;
                            fetch_rx.try_recv().ok()
                        }
                        Err(TryRecvError::Disconnected) => {
                            draining = true;
                            None
                        }
                    };

                    if let Some(leased) = immediate {
                        match self.absorb(&mut batch, leased).await {
                            Absorbed::Consumed => continue,
                            Absorbed::NextBatch(parsed) => {
                                pending = Some(parsed);
                                break;
                            }
                        }
                    }
                    if draining {
                        break;
                    }

                    // Nothing more without blocking: close out once the rate
                    // gate permits, extending the batch in the meantime.
                    if limiter.try_acquire() {
                        permit_taken = true;
                        break;
                    }
                    tokio::select! {
                        () = limiter.acquire() => {
                            permit_taken = true;
                            break;
                        }
                        received = fetch_rx.recv() => match received {
                            Some(leased) => match self.absorb(&mut batch, leased).await {
                                Absorbed::Consumed => {}
                                Absorbed::NextBatch(parsed) => {
                                    pending = Some(parsed);
                                    break;
                                }
                            },
                            None => {
                                draining = true;
                                break;
                            }
                        },
                    }
                }
            }

            if draining {
                self.requeue_all(batch).await;
                break;
            }

            if !permit_taken {
                tokio::select! {
                    () = limiter.acquire() => {}
                    _ = shutdown.changed() => {
                        self.requeue_all(batch).await;
                        if let Some(parsed) = pending.take() {
                            self.requeue_all(vec![parsed]).await;
                        }
                        break;
                    }
                }
            }

            tokio::select! {
                slot = batch_tx.reserve() => match slot {
                    Ok(slot) => slot.send(batch),
                    Err(_) => {
                        tracing::error!("Worker pool stopped unexpectedly");
                        self.requeue_all(batch).await;
                        break 'assemble;
                    }
                },
                _ = shutdown.changed() => {
                    self.requeue_all(batch).await;
                    if let Some(parsed) = pending.take() {
                        self.requeue_all(vec![parsed]).await;
                    }
                    break;
                }
            }
        }

        // Requeue anything fetched but never handed to a worker, then let the
        // workers run dry.
        fetch_rx.close();
        while let Some(leased) = fetch_rx.recv().await {
            if let Err(err) = self.queue.requeue(leased).await {
                tracing::error!(error = %err, "Failed to requeue message during shutdown");
            }
        }
        fetcher.abort();
        let _ = fetcher.await;

        drop(batch_tx);
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Push worker task failed");
            }
        }
        tracing::info!("Pump stopped");
    }

    fn spawn_fetcher(
        &self,
        fetch_tx: mpsc::Sender<QueuedMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        leased = queue.get() => match leased {
                            Ok(msg) => {
                                if let Err(rejected) = fetch_tx.send(msg).await {
                                    let _ = queue.requeue(rejected.0).await;
                                    break;
                                }
                            }
                            Err(QueueError::Closed) => break,
                            Err(err) => {
                                tracing::error!(error = %err, "Dequeue failed");
                                break;
                            }
                        },
                    }
                }
            }
            .in_current_span(),
        )
    }

    fn spawn_workers(&self, batch_rx: mpsc::Receiver<Vec<Parsed<S>>>) -> JoinSet<()> {
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let mut pool = JoinSet::new();
        for worker in 0..self.workers {
            let service = Arc::clone(&self.service);
            let queue = Arc::clone(&self.queue);
            let feedback = Arc::clone(&self.feedback);
            let batches = Arc::clone(&batch_rx);
            pool.spawn(
                async move {
                    let mut client = match service.new_client() {
                        Ok(client) => client,
                        Err(err) => {
                            tracing::error!(worker, error = %err, "Failed to create push client");
                            return;
                        }
                    };
                    loop {
                        let batch = { batches.lock().await.recv().await };
                        let Some(batch) = batch else { break };
                        dispatch(&*service, &queue, &feedback, &mut client, batch).await;
                    }
                }
                .in_current_span(),
            );
        }
        pool
    }

    /// Parses a leased message. An unparseable message will never succeed,
    /// so it is acked away immediately.
    async fn parse(&self, leased: QueuedMessage) -> Option<Parsed<S>> {
        match self.service.convert(leased.raw()) {
            Ok(message) => Some(Parsed {
                handle: leased,
                message,
            }),
            Err(err) => {
                tracing::warn!(error = %err, "Dropping unparseable message");
                if let Err(remove_err) = self.queue.remove(leased).await {
                    tracing::error!(error = %remove_err, "Failed to remove unparseable message");
                }
                None
            }
        }
    }

    async fn absorb(&self, batch: &mut Vec<Parsed<S>>, leased: QueuedMessage) -> Absorbed<S> {
        let Some(parsed) = self.parse(leased).await else {
            return Absorbed::Consumed;
        };
        let joins = match (batch[0].message.squash_key(), parsed.message.squash_key()) {
            (Some(current), Some(next)) => current == next,
            _ => false,
        };
        if joins {
            batch.push(parsed);
            Absorbed::Consumed
        } else {
            Absorbed::NextBatch(parsed)
        }
    }

    async fn requeue_all(&self, batch: Vec<Parsed<S>>) {
        for item in batch {
            if let Err(err) = self.queue.requeue(item.handle).await {
                tracing::error!(error = %err, "Failed to requeue message during shutdown");
            }
        }
    }
}

/// Delivers one batch and terminalizes every lease in it.
async fn dispatch<S: PushService>(
    service: &S,
    queue: &Arc<dyn Queue>,
    feedback: &Arc<dyn FeedbackCollector>,
    client: &mut S::Client,
    batch: Vec<Parsed<S>>,
) {
    let (handles, messages): (Vec<QueuedMessage>, Vec<S::Message>) = batch
        .into_iter()
        .map(|parsed| (parsed.handle, parsed.message))
        .unzip();

    let started = Instant::now();
    let outcome = if messages.len() == 1 {
        service.push(client, &messages[0], feedback.as_ref()).await
    } else {
        service
            .push_squashed(client, &messages, feedback.as_ref())
            .await
    };
    let duration = started.elapsed();

    match outcome {
        PushOutcome::Success | PushOutcome::HardFail => {
            for handle in handles {
                if let Err(err) = queue.remove(handle).await {
                    tracing::error!(error = %err, "Failed to ack message");
                }
            }
        }
        PushOutcome::TempFail => {
            for handle in handles {
                if let Err(err) = queue.requeue(handle).await {
                    tracing::error!(error = %err, "Failed to requeue message");
                }
            }
        }
    }

    feedback.count_push(service.id(), outcome == PushOutcome::Success, duration);
}
