use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::StreamExt;

use crate::{ContentBlock, LlmMessage, LlmProvider, LlmRequest, LlmResponse, StreamChunk};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("openai api key is not configured")]
    MissingApiKey,
    #[error("openai api error (timeout): request timed out after {0}s")]
    Timeout(u64),
    #[error("openai api error (connect): {0}")]
    Connect(String),
    #[error("openai api error ({status}): {message}")]
    Status {
        status: StatusCode,
        kind: ProviderErrorKind,
        message: String,
    },
    #[error("openai api error: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::MissingApiKey => ProviderErrorKind::AuthError,
            Self::Timeout(_) => ProviderErrorKind::Timeout,
            Self::Connect(_) => ProviderErrorKind::ServerError,
            Self::Status { kind, .. } => *kind,
            Self::Malformed(_) => ProviderErrorKind::Unknown,
        }
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self::with_timeout(api_key, api_base, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout_secs,
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub(crate) fn to_api_request(request: LlmRequest, stream: bool) -> ApiRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .into_iter()
                    .map(|tool| ApiTool {
                        tool_type: "function".to_string(),
                        function: ApiFunctionDef {
                            name: tool.name,
                            description: tool.description,
                            parameters: tool.input_schema,
                        },
                    })
                    .collect(),
            )
        };

        ApiRequest {
            model: request.model,
            messages: to_api_messages(request.system, request.messages),
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            tools,
            stream,
            stream_options: if stream {
                Some(ApiStreamOptions {
                    include_usage: true,
                })
            } else {
                None
            },
        }
    }

    async fn send(&self, payload: &ApiRequest) -> Result<reqwest::Response> {
        if !self.has_api_key() {
            return Err(ProviderError::MissingApiKey.into());
        }

        let url = format!("{}/chat/completions", self.api_base);
        let resp = match self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ProviderError::Timeout(self.timeout_secs).into()),
            Err(e) if e.is_connect() => return Err(ProviderError::Connect(e.to_string()).into()),
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<ApiErrorEnvelope>(&text).ok();
            return Err(format_api_error(status, parsed).into());
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let payload = Self::to_api_request(request, false);
        let resp = self.send(&payload).await?;
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        to_llm_response(body)
    }

    async fn stream(
        &self,
        request: LlmRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>> {
        let payload = Self::to_api_request(request, true);
        let resp = self.send(&payload).await?;
        Ok(Box::pin(parse_sse_stream(resp.bytes_stream())))
    }
}

fn to_api_messages(system: Option<String>, messages: Vec<LlmMessage>) -> Vec<ApiMessage> {
    let mut result = Vec::new();

    if let Some(system_text) = system {
        result.push(ApiMessage {
            role: "system".to_string(),
            content: Some(ApiContent::Text(system_text)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in messages {
        let tool_uses: Vec<ApiToolCall> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ApiToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ApiToolFunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                }),
                _ => None,
            })
            .collect();

        let content = if message.has_image() {
            let parts: Vec<ApiContentPart> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(ApiContentPart::Text { text: text.clone() }),
                    ContentBlock::Image { url } => Some(ApiContentPart::ImageUrl {
                        image_url: ApiImageUrl { url: url.clone() },
                    }),
                    _ => None,
                })
                .collect();
            Some(ApiContent::Parts(parts))
        } else {
            let text = message.text();
            if text.is_empty() {
                None
            } else {
                Some(ApiContent::Text(text))
            }
        };

        if content.is_some() || !tool_uses.is_empty() {
            result.push(ApiMessage {
                role: message.role.clone(),
                content,
                tool_calls: if tool_uses.is_empty() {
                    None
                } else {
                    Some(tool_uses)
                },
                tool_call_id: None,
            });
        }

        for block in message.content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                result.push(ApiMessage {
                    role: "tool".to_string(),
                    content: Some(ApiContent::Text(content)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
        }
    }

    result
}

fn to_llm_response(body: ApiResponse) -> Result<LlmResponse> {
    let choice = body
        .choices
        .first()
        .ok_or_else(|| ProviderError::Malformed("empty choices".into()))?;
    let message = &choice.message;

    let mut content = Vec::new();

    if let Some(text) = &message.content {
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.clone() });
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let input = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                .unwrap_or_else(|e| {
                    tracing::warn!(tool = %call.function.name, error = %e, "tool call arguments are not JSON, using {{}}");
                    serde_json::Value::Object(Default::default())
                });
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
    }

    if content.is_empty() {
        return Err(ProviderError::Malformed("response has neither content nor tool calls".into()).into());
    }

    Ok(LlmResponse {
        text: message.content.clone().unwrap_or_default(),
        content,
        input_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
        output_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
        stop_reason: normalize_finish_reason(choice.finish_reason.clone()),
    })
}

enum SseItem {
    Chunk(StreamChunk),
    Done,
}

fn parse_sse_stream(
    byte_stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<StreamChunk>> + Send {
    async_stream::stream! {
        tokio::pin!(byte_stream);
        // Raw bytes: a multi-byte character may straddle two network chunks.
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);

                    while let Some((pos, sep_len)) = find_event_boundary(&buffer) {
                        let event: Vec<u8> = buffer.drain(..pos + sep_len).collect();
                        let event_text = String::from_utf8_lossy(&event[..pos]);

                        for item in decode_event(&event_text) {
                            match item {
                                Ok(SseItem::Chunk(chunk)) => yield Ok(chunk),
                                Ok(SseItem::Done) => return,
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(anyhow!("stream error: {e}"));
                    return;
                }
            }
        }

        // Trailing event without a terminating blank line.
        if !buffer.is_empty() {
            let event_text = String::from_utf8_lossy(&buffer).to_string();
            for item in decode_event(&event_text) {
                match item {
                    Ok(SseItem::Chunk(chunk)) => yield Ok(chunk),
                    Ok(SseItem::Done) => return,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find_subslice(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find_subslice(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_event(event_text: &str) -> Vec<Result<SseItem>> {
    let mut items = Vec::new();
    for line in event_text.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.strip_prefix(' ').unwrap_or(data).trim_end();

        if data == "[DONE]" {
            items.push(Ok(SseItem::Done));
            break;
        }

        match serde_json::from_str::<ApiStreamChunk>(data) {
            Ok(event) => {
                if let Some(error) = event.error {
                    items.push(Err(ProviderError::Malformed(error.message).into()));
                    break;
                }
                if let Some(chunk) = parse_sse_event(&event) {
                    items.push(Ok(SseItem::Chunk(chunk)));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, payload = data, "invalid SSE event from chat completions");
                items.push(Err(ProviderError::Malformed(format!("invalid sse event payload: {e}")).into()));
                break;
            }
        }
    }
    items
}

fn parse_sse_event(event: &ApiStreamChunk) -> Option<StreamChunk> {
    let choice = event.choices.first()?;

    if let Some(text) = &choice.delta.content {
        if !text.is_empty() {
            return Some(StreamChunk::delta(text.clone()));
        }
    }

    if choice.finish_reason.is_some() {
        return Some(StreamChunk {
            delta: String::new(),
            is_final: true,
            input_tokens: event.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: event.usage.as_ref().map(|u| u.completion_tokens),
            stop_reason: normalize_finish_reason(choice.finish_reason.clone()),
        });
    }

    None
}

fn normalize_finish_reason(reason: Option<String>) -> Option<String> {
    match reason.as_deref() {
        Some("tool_calls") => Some("tool_use".to_string()),
        Some("stop") => Some("end_turn".to_string()),
        _ => reason,
    }
}

fn format_api_error(status: StatusCode, parsed: Option<ApiErrorEnvelope>) -> ProviderError {
    let kind = ProviderErrorKind::from_status(status);
    let message = match parsed {
        Some(api_error) => match api_error.error.r#type {
            Some(kind) => format!("{} ({kind})", api_error.error.message),
            None => api_error.error.message,
        },
        None => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    };
    ProviderError::Status {
        status,
        kind,
        message,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ApiTool>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<ApiStreamOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ApiFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiResponse {
    pub choices: Vec<ApiChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiChoice {
    pub message: ApiAssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiAssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ApiToolFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiStreamChunk {
    #[serde(default)]
    pub choices: Vec<ApiStreamChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiStreamChoice {
    #[serde(default)]
    pub delta: ApiStreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct ApiStreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiStreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type", default)]
    pub r#type: Option<String>,
    pub message: String,
}
