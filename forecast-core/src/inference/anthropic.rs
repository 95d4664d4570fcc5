use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::InferenceConfig, error::truncate_body};

use super::{InferenceClient, InferenceError, InferenceRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl AnthropicClient {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("No inference API key configured."))?;

        let http = Client::builder()
            .build()
            .context("Failed to build inference HTTP client")?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let url = format!("{}/v1/messages", self.base_url);
        let payload = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        debug!(model = %request.model, prompt_len = request.prompt.len(), "calling inference");

        let res = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let reply: MessagesResponse = res
            .json()
            .await
            .map_err(|e| InferenceError::Request(format!("could not decode reply: {e}")))?;

        match reply.content.into_iter().next() {
            Some(ContentBlock::Text { text }) => Ok(text),
            _ => Err(InferenceError::NoText),
        }
    }
}
