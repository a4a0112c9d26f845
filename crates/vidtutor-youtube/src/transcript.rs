use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use vidtutor_schema::TranscriptSegment;

pub const TIMEDTEXT_BASE: &str = "https://www.youtube.com/api/timedtext";
const DEFAULT_LANG: &str = "en";

#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    /// Fetches the full caption track of a video, ordered by offset.
    async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSegment>>;
}

/// Reads YouTube's `timedtext` endpoint in `json3` format.
#[derive(Debug, Clone)]
pub struct TimedTextFetcher {
    client: reqwest::Client,
    base_url: String,
    lang: String,
}

impl TimedTextFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            lang: DEFAULT_LANG.to_string(),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

impl Default for TimedTextFetcher {
    fn default() -> Self {
        Self::new(TIMEDTEXT_BASE)
    }
}

#[async_trait]
impl TranscriptFetcher for TimedTextFetcher {
    async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSegment>> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("lang", self.lang.as_str()),
                ("v", video_id),
                ("fmt", "json3"),
            ])
            .send()
            .await
            .with_context(|| format!("transcript request failed for {video_id}"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("transcript fetch failed for {video_id}: {status}");
        }
        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read transcript body for {video_id}"))?;
        parse_json3(&body)
    }
}

/// An empty body means the video has no captions in the requested language.
pub fn parse_json3(body: &str) -> Result<Vec<TranscriptSegment>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let track: Json3Track = serde_json::from_str(body).context("invalid json3 transcript")?;

    let mut segments: Vec<TranscriptSegment> = track
        .events
        .into_iter()
        .filter_map(|event| {
            let text = event
                .segs
                .iter()
                .map(|s| s.utf8.as_str())
                .collect::<String>()
                .replace('\n', " ");
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment::new(
                text,
                event.t_start_ms,
                event.d_duration_ms,
            ))
        })
        .collect();

    segments.sort_by_key(|s| s.offset_millis);
    Ok(segments)
}

#[derive(Debug, Deserialize)]
struct Json3Track {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: u64,
    #[serde(default)]
    d_duration_ms: u64,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}
