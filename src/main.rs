use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shove::adapters::memory::{MemoryFeedbackStore, MemoryQueueFactory};
use shove::adapters::push::{TelegramService, WebhookService};
use shove::adapters::redis::{RedisFeedbackStore, RedisQueueFactory};
use shove::api;
use shove::config::Config;
use shove::core::feedback::FeedbackStore;
use shove::core::queue::QueueFactory;
use shove::core::registry::ServiceRegistry;
use shove::core::service::SquashConfig;
use shove::telemetry::{self, PushMetrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    telemetry::init_tracing(&config.telemetry.log_format);

    let metrics_registry = prometheus::Registry::new();
    let push_metrics = PushMetrics::new(&metrics_registry)?;

    let (queue_factory, feedback_store): (Arc<dyn QueueFactory>, Arc<dyn FeedbackStore>) =
        match &config.queue.redis_url {
            Some(redis_url) => {
                tracing::info!("Using Redis queues");
                let factory = RedisQueueFactory::connect(redis_url).await?;
                let store = RedisFeedbackStore::with_connection(factory.publisher());
                (Arc::new(factory), Arc::new(store))
            }
            None => {
                tracing::warn!("SHOVE_REDIS_URL not set, using non-persistent in-memory queues");
                (
                    Arc::new(MemoryQueueFactory::new()),
                    Arc::new(MemoryFeedbackStore::new()),
                )
            }
        };

    let registry = Arc::new(ServiceRegistry::new(
        queue_factory,
        feedback_store,
        push_metrics,
    ));

    if config.webhook.workers > 0 {
        registry
            .add_service(
                WebhookService::new(),
                config.webhook.workers,
                SquashConfig::default(),
            )
            .await?;
    } else {
        tracing::warn!(
            "SHOVE_WEBHOOK_WORKERS not set, webhook service will not process messages from the shove:webhook queue"
        );
    }

    match &config.telegram.bot_token {
        Some(bot_token) => {
            registry
                .add_service(
                    TelegramService::new(bot_token.clone()),
                    config.telegram.workers,
                    SquashConfig {
                        rate_max: config.telegram.rate_amount,
                        rate_per: Duration::from_secs(config.telegram.rate_per_secs),
                    },
                )
                .await?;
        }
        None => {
            tracing::warn!(
                "SHOVE_TELEGRAM_BOT_TOKEN not set, telegram service will not process messages from the shove:telegram queue"
            );
        }
    }

    if config.server.worker_only {
        tracing::info!("Running in worker-only mode");
        shutdown_signal().await;
    } else {
        let app = api::app_router(Arc::clone(&registry), metrics_registry);
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Listening on {addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    tracing::info!("Shutting down services...");
    let drain = registry.shutdown();
    match tokio::time::timeout(
        Duration::from_secs(config.server.shutdown_timeout_secs),
        drain,
    )
    .await
    {
        Ok(()) => tracing::info!("All services drained"),
        Err(_) => tracing::warn!("Timeout waiting for services to drain"),
    }

    tracing::info!("Exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
