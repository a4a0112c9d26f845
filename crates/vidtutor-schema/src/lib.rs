pub mod format;
pub mod transcript;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use format::{format_time, format_view_count};
pub use transcript::find_segment_at_time;

/// A timestamped span of spoken text within a video.
///
/// Offsets and durations are in milliseconds; on the wire they keep the
/// short `offset` / `duration` names the player front-end expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(rename = "offset")]
    pub offset_millis: u64,
    #[serde(rename = "duration")]
    pub duration_millis: u64,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, offset_millis: u64, duration_millis: u64) -> Self {
        Self {
            text: text.into(),
            offset_millis,
            duration_millis,
        }
    }

    pub fn start_seconds(&self) -> f64 {
        self.offset_millis as f64 / 1000.0
    }

    pub fn end_seconds(&self) -> f64 {
        (self.offset_millis + self.duration_millis) as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default = "new_message_id")]
    pub id: String,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            id: new_message_id(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Context rebuilt for every outgoing chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
    #[serde(
        default,
        rename = "currentTranscript",
        alias = "currentTranscriptText",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_transcript_text: Option<String>,
    /// `None` when the request did not say where the player is.
    #[serde(
        default,
        rename = "currentTime",
        alias = "currentTimeSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_context: Option<String>,
}

impl ChatContext {
    /// Blank strings are treated as unknown.
    pub fn normalized(mut self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }
        self.video_title = keep(self.video_title);
        self.current_transcript_text = keep(self.current_transcript_text);
        self.image_context = keep(self.image_context);
        self.current_time_seconds = self
            .current_time_seconds
            .filter(|t| t.is_finite() && *t >= 0.0);
        self
    }

    /// Playhead position, 0 when unknown.
    pub fn time_seconds(&self) -> f64 {
        self.current_time_seconds.unwrap_or(0.0)
    }
}

/// One row of a video search result list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub channel_title: String,
    pub published_at: String,
    pub view_count: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// A still image of the video, either fetchable or inline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameRef {
    Url(String),
    #[serde(rename = "base64", with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl FrameRef {
    /// Value usable as an `image_url` for a vision model.
    pub fn to_image_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Bytes(bytes) => {
                use base64::Engine;
                let mime = if bytes.starts_with(b"\x89PNG") {
                    "image/png"
                } else if bytes.starts_with(b"RIFF") {
                    "image/webp"
                } else {
                    "image/jpeg"
                };
                format!(
                    "data:{mime};base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                )
            }
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Accept data URIs as posted by a canvas capture.
        let payload = match raw.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => raw.as_str(),
        };
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(serde::de::Error::custom)
    }
}

/// Playhead position reported by the embedded player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeUpdate {
    pub seconds: f64,
}
