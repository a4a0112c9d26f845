pub mod openai;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::iter as stream_iter;

pub use openai::{OpenAiProvider, ProviderError, ProviderErrorKind, OPENAI_API_BASE};
pub use types::*;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn stream(&self, _request: LlmRequest) -> Result<ChunkStream> {
        anyhow::bail!("streaming not supported by this provider")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    OpenAI,
    /// Offline echo provider, useful for demos without an API key.
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type", default)]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn key_configured(&self) -> bool {
        match self.provider_type {
            ProviderType::Stub => true,
            ProviderType::OpenAI => self
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false),
        }
    }
}

/// Builds a provider. A missing OpenAI key is not an error here: the
/// provider is still created and each request fails on its own.
pub fn create_provider(config: &ProviderConfig) -> Arc<dyn LlmProvider> {
    match config.provider_type {
        ProviderType::OpenAI => {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_BASE);
            Arc::new(OpenAiProvider::with_timeout(
                config.api_key.clone().unwrap_or_default(),
                base_url,
                config.timeout_secs,
            ))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    }
}

pub struct StubProvider;

impl StubProvider {
    fn reply_for(request: &LlmRequest) -> String {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.text())
            .unwrap_or_default();
        format!("[stub:{}] {}", request.model, user_text)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let full_text = Self::reply_for(&request);
        Ok(LlmResponse {
            text: full_text.clone(),
            content: vec![ContentBlock::Text { text: full_text }],
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let full_text = Self::reply_for(&request);
        let words: Vec<&str> = full_text.split_inclusive(' ').collect();

        let mut chunks: Vec<Result<StreamChunk>> = words
            .into_iter()
            .map(|word| Ok(StreamChunk::delta(word)))
            .collect();

        chunks.push(Ok(StreamChunk {
            delta: String::new(),
            is_final: true,
            input_tokens: Some(10),
            output_tokens: Some(20),
            stop_reason: Some("end_turn".into()),
        }));

        Ok(Box::pin(stream_iter(chunks)))
    }
}
