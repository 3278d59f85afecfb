use crate::config::Config;
use crate::error::{ExchangeError, ExchangeResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Shown when the agent answers without a `response` field
pub const FALLBACK_REPLY: &str = "No response generated.";

/// Body POSTed to the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub sender: String,
    pub thread_id: String,
    pub message: String,
}

/// Body returned by the chat endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub response: Option<String>,
}

impl ChatReply {
    /// Reply text, or the fallback when the field was missing or null
    pub fn into_text(self) -> String {
        self.response.unwrap_or_else(|| FALLBACK_REPLY.to_string())
    }
}

/// Decode a response body into the text to display
pub fn parse_reply(body: &str) -> ExchangeResult<String> {
    let reply: ChatReply = serde_json::from_str(body)?;
    if reply.response.is_none() {
        warn!("reply carried no `response` field, using fallback text");
    }
    Ok(reply.into_text())
}

/// One request in, one reply (or one error) out
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn exchange(&self, request: &ChatRequest) -> ExchangeResult<String>;
}

/// HTTP client for the agent's `/chat` endpoint
#[derive(Clone)]
pub struct HttpChatClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpChatClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpChatClient {
    async fn exchange(&self, request: &ChatRequest) -> ExchangeResult<String> {
        debug!(endpoint = %self.endpoint, thread_id = %request.thread_id, "posting chat message");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::Status { status, body });
        }

        parse_reply(&body)
    }
}

impl std::fmt::Debug for HttpChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
