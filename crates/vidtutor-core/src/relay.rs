//! Chat relay.
//!
//! Turns a conversation plus the viewer's playback context into a model
//! request and relays the answer back, either whole or as a stream of
//! `data: {"text": ...}` events closed by exactly one `data: [DONE]`.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use vidtutor_provider::{ContentBlock, LlmMessage, LlmProvider, LlmRequest, ToolDef};
use vidtutor_schema::{format_time, ChatContext, ChatMessage, ChatRole};

use crate::config::LlmConfig;
use crate::prompt::{build_system_prompt, is_image_reference, FRAME_NOTE};

pub const ERROR_PREFIX: &str = "Sorry, I encountered an error";
pub const DONE_SENTINEL: &str = "[DONE]";

pub const DESCRIBE_FRAME_TOOL: &str = "describe_frame_at_time";
pub const TRANSCRIPT_TOOL: &str = "get_transcript_at_time";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    Simple,
    #[default]
    Streaming,
    ToolAugmented,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("chat history must end with a non-empty user message")]
    InvalidHistory,
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl RelayError {
    /// Chat-bubble text shown in place of an answer.
    pub fn user_message(&self) -> String {
        format!("{ERROR_PREFIX}: {self}")
    }
}

/// One item of a streamed answer.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Fragment(String),
    /// Terminal error text; always followed by `Done`.
    Error(String),
    Done,
}

#[derive(Serialize)]
struct EventPayload<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    error: bool,
}

impl RelayEvent {
    /// Payload of the `data:` line.
    pub fn data(&self) -> String {
        let payload = match self {
            Self::Fragment(text) => EventPayload { text, error: false },
            Self::Error(text) => EventPayload { text, error: true },
            Self::Done => return DONE_SENTINEL.to_string(),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| "{\"text\":\"\"}".to_string())
    }

    /// Wire form: `data: <payload>\n\n`.
    pub fn encode(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

pub type RelayStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_history: usize,
    pub vision_enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for RelayConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_history: config.max_history.max(1),
            vision_enabled: config.vision_enabled,
        }
    }
}

pub struct ChatRelay {
    provider: Arc<dyn LlmProvider>,
    config: RelayConfig,
}

impl ChatRelay {
    pub fn new(provider: Arc<dyn LlmProvider>, config: RelayConfig) -> Self {
        Self { provider, config }
    }

    /// Assembles the model request: system prompt, capped user/assistant
    /// history and, on the vision path, the frame as an image part placed
    /// right before the newest user message.
    pub fn build_request(
        &self,
        history: &[ChatMessage],
        ctx: &ChatContext,
    ) -> Result<LlmRequest, RelayError> {
        let turns: Vec<&ChatMessage> = history
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .collect();
        match turns.last() {
            Some(last) if last.role == ChatRole::User && !last.content.trim().is_empty() => {}
            _ => return Err(RelayError::InvalidHistory),
        }

        let ctx = ctx.clone().normalized();
        let image_url = ctx
            .image_context
            .as_deref()
            .filter(|c| self.config.vision_enabled && is_image_reference(c));

        let skip = turns.len().saturating_sub(self.config.max_history);
        let mut messages: Vec<LlmMessage> = turns[skip..]
            .iter()
            .map(|m| match m.role {
                ChatRole::Assistant => LlmMessage::assistant(m.content.clone()),
                _ => LlmMessage::user(m.content.clone()),
            })
            .collect();
        if let Some(url) = image_url {
            let at = messages.len() - 1;
            messages.insert(at, LlmMessage::user_with_image(url, FRAME_NOTE));
        }

        Ok(LlmRequest {
            model: self.config.model.clone(),
            system: Some(build_system_prompt(&ctx, image_url.is_some())),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            tools: vec![],
        })
    }

    /// Dispatches on `mode`; streaming answers are collected.
    pub async fn respond(
        &self,
        mode: RelayMode,
        history: &[ChatMessage],
        ctx: &ChatContext,
    ) -> Result<String, RelayError> {
        match mode {
            RelayMode::Simple => self.complete(history, ctx).await,
            RelayMode::ToolAugmented => self.complete_with_tools(history, ctx).await,
            RelayMode::Streaming => {
                let mut stream = self.stream(history, ctx)?;
                let mut text = String::new();
                while let Some(event) = stream.next().await {
                    match event {
                        RelayEvent::Fragment(fragment) => text.push_str(&fragment),
                        RelayEvent::Error(message) => {
                            return Err(RelayError::Upstream(anyhow::anyhow!(
                                "{}",
                                message
                                    .strip_prefix(&format!("{ERROR_PREFIX}: "))
                                    .unwrap_or(&message)
                                    .to_string()
                            )))
                        }
                        RelayEvent::Done => break,
                    }
                }
                Ok(text)
            }
        }
    }

    pub async fn complete(
        &self,
        history: &[ChatMessage],
        ctx: &ChatContext,
    ) -> Result<String, RelayError> {
        let request = self.build_request(history, ctx)?;
        let response = self.provider.chat(request).await?;
        Ok(response.text)
    }

    /// Starts a streamed answer. History problems are reported before the
    /// stream exists; upstream failures become a terminal `Error` event.
    pub fn stream(
        &self,
        history: &[ChatMessage],
        ctx: &ChatContext,
    ) -> Result<RelayStream, RelayError> {
        let request = self.build_request(history, ctx)?;
        let provider = self.provider.clone();

        Ok(Box::pin(async_stream::stream! {
            match provider.stream(request).await {
                Ok(mut chunks) => {
                    while let Some(chunk) = chunks.next().await {
                        match chunk {
                            Ok(chunk) => {
                                if !chunk.delta.is_empty() {
                                    yield RelayEvent::Fragment(chunk.delta);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "chat stream failed mid-answer");
                                yield RelayEvent::Error(RelayError::Upstream(e).user_message());
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chat stream could not start");
                    yield RelayEvent::Error(RelayError::Upstream(e).user_message());
                }
            }
            yield RelayEvent::Done;
        }))
    }

    /// Offers the two read-only context tools. When the model calls them,
    /// the current frame description and transcript line are returned and
    /// the model is invoked exactly once more for the final answer.
    pub async fn complete_with_tools(
        &self,
        history: &[ChatMessage],
        ctx: &ChatContext,
    ) -> Result<String, RelayError> {
        let mut request = self.build_request(history, ctx)?;
        request.tools = context_tools();

        let response = self.provider.chat(request.clone()).await?;
        let calls = response.tool_uses();
        if calls.is_empty() {
            return Ok(response.text);
        }

        let ctx = ctx.clone().normalized();
        let results: Vec<ContentBlock> = calls
            .iter()
            .map(|(id, name, input)| {
                let (content, is_error) = answer_tool_call(name, input, &ctx);
                tracing::debug!(tool = *name, is_error, "answered context tool call");
                ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content,
                    is_error,
                }
            })
            .collect();

        request.messages.push(LlmMessage {
            role: "assistant".into(),
            content: response.content.clone(),
        });
        request.messages.push(LlmMessage {
            role: "user".into(),
            content: results,
        });

        let final_response = self.provider.chat(request).await?;
        if final_response.text.trim().is_empty() {
            return Err(RelayError::Upstream(anyhow::anyhow!(
                "model returned no answer after tool results"
            )));
        }
        Ok(final_response.text)
    }
}

fn context_tools() -> Vec<ToolDef> {
    let timestamp_schema = serde_json::json!({
        "type": "object",
        "properties": {
            "timestamp": {
                "type": "number",
                "description": "Position in the video, in seconds"
            }
        },
        "required": ["timestamp"]
    });
    vec![
        ToolDef {
            name: DESCRIBE_FRAME_TOOL.into(),
            description: "Describe what is visible in the video frame at the given timestamp."
                .into(),
            input_schema: timestamp_schema.clone(),
        },
        ToolDef {
            name: TRANSCRIPT_TOOL.into(),
            description: "Get the transcript line spoken at the given timestamp.".into(),
            input_schema: timestamp_schema,
        },
    ]
}

/// Only the current values are known; the requested timestamp is echoed
/// next to the actual playhead so the model can tell them apart.
fn answer_tool_call(name: &str, input: &serde_json::Value, ctx: &ChatContext) -> (String, bool) {
    let requested = input
        .get("timestamp")
        .and_then(|t| t.as_f64())
        .map(format_time)
        .unwrap_or_else(|| "unspecified".to_string());
    let current = format_time(ctx.time_seconds());

    match name {
        DESCRIBE_FRAME_TOOL => {
            let text = match ctx.image_context.as_deref() {
                Some(frame) if is_image_reference(frame) => {
                    format!("Frame at {current} (requested {requested}) is available as an image: {frame}")
                }
                Some(frame) => format!("Frame at {current} (requested {requested}): {frame}"),
                None => format!("No frame description available (requested {requested})."),
            };
            (text, false)
        }
        TRANSCRIPT_TOOL => {
            let text = match ctx.current_transcript_text.as_deref() {
                Some(line) => format!("Transcript at {current} (requested {requested}): {line}"),
                None => format!("No transcript available (requested {requested})."),
            };
            (text, false)
        }
        other => (format!("unknown tool: {other}"), true),
    }
}
