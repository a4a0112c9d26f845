use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use vidtutor_schema::{format_view_count, VideoDetails, VideoSummary};

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const MAX_SEARCH_RESULTS: usize = 25;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Thin client over the YouTube Data API v3.
///
/// Every public lookup swallows upstream failures: they are logged and the
/// caller sees an empty result, never an error.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
}

impl YouTubeClient {
    pub fn new(api_key: Option<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Searches videos by free text. Returns at most 25 results.
    pub async fn search(&self, query: &str) -> Vec<VideoSummary> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        match self.try_search(query).await {
            Ok(results) => {
                tracing::debug!(query, count = results.len(), "video search completed");
                results
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "video search failed");
                Vec::new()
            }
        }
    }

    /// Title, description and duration of a single video.
    pub async fn video_details(&self, video_id: &str) -> Option<VideoDetails> {
        match self.try_video_details(video_id).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(video_id, error = %e, "video details lookup failed");
                None
            }
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("youtube api key is not configured"))
    }

    async fn try_search(&self, query: &str) -> Result<Vec<VideoSummary>> {
        let key = self.api_key()?;
        let max_results = MAX_SEARCH_RESULTS.to_string();
        let resp = self
            .client
            .get(format!("{}/search", self.api_base))
            .query(&[
                ("part", "snippet"),
                ("maxResults", max_results.as_str()),
                ("q", query),
                ("type", "video"),
                ("key", key),
            ])
            .send()
            .await
            .context("youtube search request failed")?;
        let body: SearchResponse = read_json(resp).await?;

        let items: Vec<(String, Snippet)> = body
            .items
            .into_iter()
            .filter_map(|item| Some((item.id.video_id?, item.snippet)))
            .take(MAX_SEARCH_RESULTS)
            .collect();
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = items.iter().map(|(id, _)| id.as_str()).collect();
        let stats = self.video_statistics(&ids).await;

        Ok(items
            .into_iter()
            .map(|(id, snippet)| {
                let view_count = stats
                    .get(&id)
                    .and_then(|count| count.parse::<u64>().ok())
                    .map(format_view_count)
                    .unwrap_or_else(|| "N/A".to_string());
                VideoSummary {
                    thumbnail: snippet.thumbnails.best_url(),
                    title: unescape_html(&snippet.title),
                    channel_title: unescape_html(&snippet.channel_title),
                    published_at: format_published_date(&snippet.published_at),
                    view_count,
                    id,
                }
            })
            .collect())
    }

    /// View counts keyed by video id. Failure yields an empty map so the
    /// search itself still succeeds.
    async fn video_statistics(&self, ids: &[&str]) -> HashMap<String, String> {
        self.try_video_statistics(ids).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "video statistics lookup failed");
            HashMap::new()
        })
    }

    async fn try_video_statistics(&self, ids: &[&str]) -> Result<HashMap<String, String>> {
        let key = self.api_key()?;
        let joined = ids.join(",");
        let resp = self
            .client
            .get(format!("{}/videos", self.api_base))
            .query(&[("part", "statistics"), ("id", joined.as_str()), ("key", key)])
            .send()
            .await
            .context("youtube statistics request failed")?;
        let body: VideosResponse = read_json(resp).await?;
        Ok(body
            .items
            .into_iter()
            .filter_map(|item| Some((item.id, item.statistics?.view_count?)))
            .collect())
    }

    async fn try_video_details(&self, video_id: &str) -> Result<Option<VideoDetails>> {
        let key = self.api_key()?;
        let resp = self
            .client
            .get(format!("{}/videos", self.api_base))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", video_id),
                ("key", key),
            ])
            .send()
            .await
            .context("youtube details request failed")?;
        let body: VideosResponse = read_json(resp).await?;

        let Some(item) = body.items.into_iter().next() else {
            return Ok(None);
        };
        let snippet = item.snippet.unwrap_or_default();
        Ok(Some(VideoDetails {
            id: item.id,
            title: unescape_html(&snippet.title),
            description: snippet.description,
            channel_title: unescape_html(&snippet.channel_title),
            duration_seconds: item
                .content_details
                .and_then(|d| d.duration)
                .and_then(|d| parse_iso8601_duration(&d)),
        }))
    }
}

async fn read_json<T>(resp: reqwest::Response) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&text)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unexpected status").to_string());
        bail!("youtube api error ({status}): {message}");
    }
    resp.json::<T>()
        .await
        .context("invalid youtube api response")
}

/// `2024-01-15T08:30:00Z` becomes `2024-01-15`. Unparseable input is kept.
pub fn format_published_date(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parses the `PnDTnHnMnS` subset YouTube uses for `contentDetails.duration`.
pub fn parse_iso8601_duration(raw: &str) -> Option<u64> {
    let rest = raw.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut total = 0u64;
    for (part, in_time) in [(date_part, false), (time_part, true)] {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let value: u64 = number.parse().ok()?;
            number.clear();
            let unit = match (c, in_time) {
                ('W', false) => 7 * 86_400,
                ('D', false) => 86_400,
                ('H', true) => 3_600,
                ('M', true) => 60,
                ('S', true) => 1,
                _ => return None,
            };
            total = total.checked_add(value.checked_mul(unit)?)?;
        }
        if !number.is_empty() {
            return None;
        }
    }
    Some(total)
}

/// Search snippets arrive HTML-escaped.
fn unescape_html(raw: &str) -> String {
    html_escape::decode_html_entities(raw).into_owned()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Snippet {
    title: String,
    description: String,
    channel_title: String,
    published_at: String,
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

impl Thumbnails {
    fn best_url(self) -> String {
        self.medium
            .or(self.high)
            .or(self.default)
            .map(|t| t.url)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: Option<Snippet>,
    #[serde(default)]
    statistics: Option<Statistics>,
    #[serde(default)]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    #[serde(default)]
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_iso8601_duration_common_forms() {
        assert_eq!(parse_iso8601_duration("PT4M13S"), Some(253));
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso8601_duration("PT45S"), Some(45));
        assert_eq!(parse_iso8601_duration("P1DT1S"), Some(86_401));
        assert_eq!(parse_iso8601_duration("P0D"), Some(0));
    }

    #[test]
    fn parse_iso8601_duration_rejects_garbage() {
        assert_eq!(parse_iso8601_duration(""), None);
        assert_eq!(parse_iso8601_duration("4M13S"), None);
        assert_eq!(parse_iso8601_duration("PT4X"), None);
        assert_eq!(parse_iso8601_duration("PT12"), None);
        assert_eq!(parse_iso8601_duration("P1H"), None);
    }

    #[test]
    fn format_published_date_keeps_day_only() {
        assert_eq!(format_published_date("2024-01-15T08:30:00Z"), "2024-01-15");
        assert_eq!(format_published_date("yesterday"), "yesterday");
    }

    #[test]
    fn unescape_html_decodes_common_entities() {
        assert_eq!(unescape_html("Cats &amp; Dogs"), "Cats & Dogs");
        assert_eq!(unescape_html("It&#39;s &quot;fine&quot;"), "It's \"fine\"");
        assert_eq!(unescape_html("plain"), "plain");
    }

    #[test]
    fn unescape_html_decodes_numeric_and_named_entities() {
        assert_eq!(
            unescape_html("Rock &#8211; Roll &hellip; Caf&eacute; &#x27;x&#x27;"),
            "Rock \u{2013} Roll \u{2026} Caf\u{e9} 'x'"
        );
    }

    #[test]
    fn thumbnails_prefer_medium() {
        let thumbs: Thumbnails = serde_json::from_value(serde_json::json!({
            "default": {"url": "d.jpg"},
            "medium": {"url": "m.jpg"},
            "high": {"url": "h.jpg"}
        }))
        .unwrap();
        assert_eq!(thumbs.best_url(), "m.jpg");

        let thumbs: Thumbnails =
            serde_json::from_value(serde_json::json!({"default": {"url": "d.jpg"}})).unwrap();
        assert_eq!(thumbs.best_url(), "d.jpg");
    }

    #[test]
    fn empty_key_counts_as_missing() {
        let client = YouTubeClient::new(Some("  ".into()), YOUTUBE_API_BASE);
        assert!(!client.has_api_key());
    }

    #[tokio::test]
    async fn blank_query_returns_empty_without_network() {
        let client = YouTubeClient::new(Some("key".into()), "http://127.0.0.1:9");
        assert!(client.search("   ").await.is_empty());
    }

    #[tokio::test]
    async fn missing_key_returns_empty() {
        let client = YouTubeClient::new(None, "http://127.0.0.1:9");
        assert!(client.search("cats").await.is_empty());
        assert!(client.video_details("abc").await.is_none());
    }
}
