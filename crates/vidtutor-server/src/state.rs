use std::sync::Arc;

use vidtutor_core::{
    ChatRelay, ClassifierKind, FrameClassifier, NoopClassifier, RelayConfig, SessionRegistry,
    VidtutorConfig, VisionClassifier,
};
use vidtutor_provider::{create_provider, LlmProvider};
use vidtutor_youtube::{
    FrameSampler, ThumbnailSampler, TimedTextFetcher, TranscriptCache, YouTubeClient,
};

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VidtutorConfig>,
    pub relay: Arc<ChatRelay>,
    pub youtube: Arc<YouTubeClient>,
    /// Process-lifetime transcript store, shared by every session.
    pub transcripts: Arc<TranscriptCache>,
    pub sampler: Arc<dyn FrameSampler>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn from_config(config: VidtutorConfig) -> Self {
        let provider = create_provider(&config.llm.provider);
        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: VidtutorConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let classifier: Arc<dyn FrameClassifier> = match config.frame_gate.classifier {
            ClassifierKind::Vision => Arc::new(VisionClassifier::new(
                provider.clone(),
                config.llm.vision_model(),
                config.frame_gate.top_k,
            )),
            ClassifierKind::None => Arc::new(NoopClassifier),
        };

        let fetcher = TimedTextFetcher::new(config.youtube.timedtext_base.clone())
            .with_lang(config.youtube.transcript_lang.clone());
        let mut transcripts = TranscriptCache::new(Arc::new(fetcher));
        if let Some(capacity) = config.youtube.transcript_cache_capacity {
            transcripts = transcripts.with_capacity(capacity);
        }

        let sessions = SessionRegistry::new(
            &config.sessions,
            config.frame_gate.clone(),
            classifier,
        );

        Self {
            relay: Arc::new(ChatRelay::new(provider, RelayConfig::from(&config.llm))),
            youtube: Arc::new(YouTubeClient::new(
                config.youtube.api_key.clone(),
                config.youtube.api_base.clone(),
            )),
            transcripts: Arc::new(transcripts),
            sampler: Arc::new(ThumbnailSampler::new(config.youtube.thumbnail_base.clone())),
            sessions: Arc::new(sessions),
            config: Arc::new(config),
        }
    }
}
