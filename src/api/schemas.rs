use serde::{Deserialize, Serialize};

use crate::core::feedback::TokenFeedback;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub feedback: Vec<TokenFeedback>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackPeekResponse {
    pub feedback: Vec<TokenFeedback>,
    pub total: u64,
}
