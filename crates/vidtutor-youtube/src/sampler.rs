use anyhow::{bail, Result};
use async_trait::async_trait;
use vidtutor_schema::FrameRef;

pub const THUMBNAIL_BASE: &str = "https://i.ytimg.com/vi";

/// Produces a still image for a point in a video.
#[async_trait]
pub trait FrameSampler: Send + Sync {
    async fn sample(
        &self,
        video_id: &str,
        at_seconds: f64,
        duration_seconds: Option<u64>,
    ) -> Result<FrameRef>;
}

/// Maps a timestamp onto YouTube's three auto-generated stills
/// (`hq1`..`hq3`, one per third of the video).
#[derive(Debug, Clone)]
pub struct ThumbnailSampler {
    base_url: String,
}

impl ThumbnailSampler {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn thumbnail_url(
        &self,
        video_id: &str,
        at_seconds: f64,
        duration_seconds: Option<u64>,
    ) -> Result<String> {
        if !is_valid_video_id(video_id) {
            bail!("invalid video id: {video_id:?}");
        }
        Ok(format!(
            "{}/{}/{}",
            self.base_url,
            video_id,
            thumbnail_name(at_seconds, duration_seconds)
        ))
    }
}

impl Default for ThumbnailSampler {
    fn default() -> Self {
        Self::new(THUMBNAIL_BASE)
    }
}

#[async_trait]
impl FrameSampler for ThumbnailSampler {
    async fn sample(
        &self,
        video_id: &str,
        at_seconds: f64,
        duration_seconds: Option<u64>,
    ) -> Result<FrameRef> {
        self.thumbnail_url(video_id, at_seconds, duration_seconds)
            .map(FrameRef::Url)
    }
}

/// Video ids only ever use the URL-safe base64 alphabet.
pub fn is_valid_video_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn thumbnail_name(at_seconds: f64, duration_seconds: Option<u64>) -> &'static str {
    let Some(duration) = duration_seconds.filter(|d| *d > 0) else {
        return "hqdefault.jpg";
    };
    let at = if at_seconds.is_finite() { at_seconds.max(0.0) } else { 0.0 };
    let fraction = at / duration as f64;
    if fraction < 1.0 / 3.0 {
        "hq1.jpg"
    } else if fraction < 2.0 / 3.0 {
        "hq2.jpg"
    } else {
        "hq3.jpg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_name_by_third() {
        assert_eq!(thumbnail_name(0.0, Some(90)), "hq1.jpg");
        assert_eq!(thumbnail_name(29.9, Some(90)), "hq1.jpg");
        assert_eq!(thumbnail_name(30.0, Some(90)), "hq2.jpg");
        assert_eq!(thumbnail_name(60.0, Some(90)), "hq3.jpg");
        assert_eq!(thumbnail_name(500.0, Some(90)), "hq3.jpg");
    }

    #[test]
    fn thumbnail_name_without_duration() {
        assert_eq!(thumbnail_name(10.0, None), "hqdefault.jpg");
        assert_eq!(thumbnail_name(10.0, Some(0)), "hqdefault.jpg");
    }

    #[tokio::test]
    async fn sample_returns_url_frame() {
        let sampler = ThumbnailSampler::new("https://img.test/vi/");
        let frame = sampler.sample("abc", 45.0, Some(90)).await.unwrap();
        assert_eq!(frame, FrameRef::Url("https://img.test/vi/abc/hq2.jpg".into()));
        assert!(sampler.sample("", 1.0, None).await.is_err());
    }

    #[tokio::test]
    async fn sample_rejects_ids_that_escape_the_path() {
        let sampler = ThumbnailSampler::default();
        for id in ["../x", "abc?size=1", "a/b", "dQw4w9WgXcQ#t", " abc"] {
            assert!(sampler.sample(id, 1.0, None).await.is_err(), "{id}");
        }
        let frame = sampler.sample("dQw4w9WgXcQ", 1.0, None).await.unwrap();
        assert_eq!(
            frame,
            FrameRef::Url("https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg".into())
        );
    }
}
