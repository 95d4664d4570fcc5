use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub mod anthropic;

pub use anthropic::AnthropicClient;

/// Everything needed for one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(String),

    #[error("inference provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inference reply had no text in its first content block")]
    NoText,
}

/// A text-in, text-out language model.
///
/// Implementations return the raw reply text. Interpreting it as JSON is the
/// caller's job.
#[async_trait]
pub trait InferenceClient: Send + Sync + Debug {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}
