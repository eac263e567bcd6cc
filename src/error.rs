use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::schemas::ErrorResponse;
use crate::core::feedback::FeedbackError;
use crate::core::queue::QueueError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("feedback store error: {0}")]
    Feedback(#[from] FeedbackError),
    #[error("service {0} is already registered")]
    DuplicateService(String),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::UnknownService(id) => (StatusCode::NOT_FOUND, format!("unknown service: {id}")),
            Self::InvalidMessage(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Queue(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            Self::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                "server is shutting down".to_string(),
            ),
            Self::Feedback(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to retrieve feedback".to_string(),
            ),
            Self::DuplicateService(_) | Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse { error: message });

        (status, body).into_response()
    }
}
