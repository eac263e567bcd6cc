use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use axum::Json;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

use crate::api::schemas::{FeedbackPeekResponse, FeedbackResponse};
use crate::api::AppState;
use crate::error::{AppError, Result};

/// Default drain size at the HTTP layer; the stores apply their own smaller
/// default only for a zero limit.
const DEFAULT_FEEDBACK_LIMIT: usize = 1000;

const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct FeedbackQuery {
    limit: Option<String>,
}

impl FeedbackQuery {
    /// Unparseable or non-positive limits silently fall back to the default.
    fn effective_limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_FEEDBACK_LIMIT)
    }
}

/// Accepts a raw provider payload for asynchronous delivery.
pub async fn push(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    state.registry.push(&service_id, &body).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Retrieves and removes feedback entries (pop behavior).
pub async fn feedback(
    State(state): State<AppState>,
    Query(query): Query<FeedbackQuery>,
) -> Result<Json<FeedbackResponse>> {
    let store = state.registry.feedback_store();
    let feedback = tokio::time::timeout(FEEDBACK_TIMEOUT, store.pop(query.effective_limit()))
        .await
        .map_err(|_| AppError::Internal)??;
    Ok(Json(FeedbackResponse { feedback }))
}

/// Retrieves feedback entries without removing them.
pub async fn feedback_peek(
    State(state): State<AppState>,
    Query(query): Query<FeedbackQuery>,
) -> Result<Json<FeedbackPeekResponse>> {
    let store = state.registry.feedback_store();
    let feedback = tokio::time::timeout(FEEDBACK_TIMEOUT, store.peek(query.effective_limit()))
        .await
        .map_err(|_| AppError::Internal)??;
    let total = store.len().await.unwrap_or(0);
    Ok(Json(FeedbackPeekResponse { feedback, total }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let families = state.metrics.gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buffer)
        .map_err(|_| AppError::Internal)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    ))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
