use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::core::registry::ServiceRegistry;

pub mod handlers;
pub mod schemas;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub metrics: prometheus::Registry,
}

pub fn app_router(registry: Arc<ServiceRegistry>, metrics: prometheus::Registry) -> Router {
    let state = AppState { registry, metrics };

    Router::new()
        .route("/api/push/{service_id}", post(handlers::push))
        .route("/api/feedback", post(handlers::feedback))
        .route("/api/feedback/peek", get(handlers::feedback_peek))
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
