pub mod cache;
pub mod client;
pub mod sampler;
pub mod transcript;

pub use cache::{Transcript, TranscriptCache};
pub use client::{
    format_published_date, parse_iso8601_duration, YouTubeClient, MAX_SEARCH_RESULTS,
    YOUTUBE_API_BASE,
};
pub use sampler::{is_valid_video_id, FrameSampler, ThumbnailSampler, THUMBNAIL_BASE};
pub use transcript::{parse_json3, TimedTextFetcher, TranscriptFetcher, TIMEDTEXT_BASE};
