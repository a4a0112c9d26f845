use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::{watch, Mutex, RwLock};
use vidtutor_schema::{ChatContext, FrameRef, TimeUpdate};
use vidtutor_youtube::Transcript;

use crate::config::{FrameGateConfig, SessionConfig};
use crate::frame::{FrameAnalysis, FrameAnalyzer, FrameClassifier};
use crate::playback::{PlaybackSnapshot, PlaybackTracker, TimeUpdateSender};

/// What a viewer is currently watching.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: Option<String>,
    pub duration_seconds: Option<u64>,
}

/// Per-viewer state: playback channel, frame gate and the cached frame
/// context. Dropping the session stops its playback tracker.
pub struct ViewerSession {
    pub id: String,
    pub video: VideoInfo,
    pub transcript: Transcript,
    time_tx: TimeUpdateSender,
    snapshot_rx: watch::Receiver<PlaybackSnapshot>,
    analyzer: Mutex<FrameAnalyzer>,
    image_context: RwLock<Option<String>>,
    last_active: RwLock<Instant>,
}

impl ViewerSession {
    pub async fn report_time(&self, seconds: f64) -> Result<()> {
        self.time_tx.send(TimeUpdate { seconds }).await
    }

    /// Reports `seconds` and waits until the tracker has applied it, so a
    /// following `fill_context` sees the line at the new playhead even when
    /// the time did not change.
    pub async fn seek(&self, seconds: f64) -> Result<PlaybackSnapshot> {
        let mut rx = self.subscribe();
        rx.borrow_and_update();
        self.report_time(seconds).await?;
        loop {
            rx.changed()
                .await
                .map_err(|_| anyhow!("playback tracker has stopped"))?;
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.current_time == seconds {
                return Ok(snapshot);
            }
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot_rx.clone()
    }

    pub async fn image_context(&self) -> Option<String> {
        self.image_context.read().await.clone()
    }

    /// Offers a frame to this session's gate. Calls are serialised, so there
    /// is exactly one prior frame per session. An admitted frame replaces
    /// the cached context with its description, or with the image itself
    /// when the classifier produced none.
    pub async fn analyze_frame(&self, frame: &FrameRef, now: Instant) -> FrameAnalysis {
        let analysis = self.analyzer.lock().await.analyze(frame, now).await;
        if analysis.should_process {
            let context = analysis
                .description
                .clone()
                .or_else(|| analysis.image_url.clone());
            if context.is_some() {
                *self.image_context.write().await = context;
            }
        }
        analysis
    }

    /// Fills fields the client left empty from what the session knows.
    pub async fn fill_context(&self, ctx: ChatContext) -> ChatContext {
        let mut ctx = ctx.normalized();
        let snapshot = self.snapshot();

        if ctx.video_title.is_none() {
            ctx.video_title = self.video.title.clone();
        }
        if ctx.current_time_seconds.is_none() {
            ctx.current_time_seconds = Some(snapshot.current_time);
        }
        if ctx.current_transcript_text.is_none() && !snapshot.current_transcript.is_empty() {
            ctx.current_transcript_text = Some(snapshot.current_transcript);
        }
        if ctx.image_context.is_none() {
            ctx.image_context = self.image_context().await;
        }
        ctx
    }

    async fn touch(&self, now: Instant) {
        *self.last_active.write().await = now;
    }

    async fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(*self.last_active.read().await) >= ttl
    }
}

/// Owns every live viewer session. Idle sessions are pruned on access.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ViewerSession>>>,
    ttl: Duration,
    time_channel_capacity: usize,
    gate_config: FrameGateConfig,
    classifier: Arc<dyn FrameClassifier>,
    http: reqwest::Client,
}

impl SessionRegistry {
    pub fn new(
        config: &SessionConfig,
        gate_config: FrameGateConfig,
        classifier: Arc<dyn FrameClassifier>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.session_ttl_secs),
            time_channel_capacity: config.time_channel_capacity,
            gate_config,
            classifier,
            http: reqwest::Client::new(),
        }
    }

    pub async fn create(&self, video: VideoInfo, transcript: Transcript) -> Arc<ViewerSession> {
        let now = Instant::now();
        self.prune_expired(now).await;

        let (time_tx, snapshot_rx) =
            PlaybackTracker::spawn(transcript.clone(), self.time_channel_capacity);
        let session = Arc::new(ViewerSession {
            id: uuid::Uuid::new_v4().to_string(),
            video,
            transcript,
            time_tx,
            snapshot_rx,
            analyzer: Mutex::new(FrameAnalyzer::new(
                &self.gate_config,
                self.classifier.clone(),
                self.http.clone(),
            )),
            image_context: RwLock::new(None),
            last_active: RwLock::new(now),
        });

        tracing::info!(
            session_id = %session.id,
            video_id = %session.video.video_id,
            segments = session.transcript.len(),
            "viewer session created"
        );
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ViewerSession>> {
        let now = Instant::now();
        self.prune_expired(now).await;
        let session = self.sessions.read().await.get(id).cloned()?;
        session.touch(now).await;
        Some(session)
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns how many sessions were dropped.
    pub async fn prune_expired(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if session.is_expired(now, self.ttl).await {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            sessions.remove(id);
            tracing::debug!(session_id = %id, "viewer session expired");
        }
        expired.len()
    }
}
