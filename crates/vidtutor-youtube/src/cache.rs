use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use vidtutor_schema::TranscriptSegment;

use crate::transcript::TranscriptFetcher;

pub type Transcript = Arc<Vec<TranscriptSegment>>;

/// Process-lifetime transcript store keyed by video id.
///
/// Concurrent misses for the same id both fetch; the last insert wins.
/// Failed fetches are never cached.
pub struct TranscriptCache {
    fetcher: Arc<dyn TranscriptFetcher>,
    capacity: Option<usize>,
    inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Transcript>,
    order: VecDeque<String>,
}

impl TranscriptCache {
    pub fn new(fetcher: Arc<dyn TranscriptFetcher>) -> Self {
        Self {
            fetcher,
            capacity: None,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Caps the number of cached videos; the oldest insertion is evicted.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    pub async fn get(&self, video_id: &str) -> Option<Transcript> {
        self.inner.read().await.entries.get(video_id).cloned()
    }

    pub async fn get_or_fetch(&self, video_id: &str) -> Transcript {
        if let Some(hit) = self.get(video_id).await {
            return hit;
        }

        match self.fetcher.fetch(video_id).await {
            Ok(segments) => {
                tracing::debug!(video_id, segments = segments.len(), "transcript fetched");
                let transcript = Arc::new(segments);
                self.insert(video_id, transcript.clone()).await;
                transcript
            }
            Err(e) => {
                tracing::warn!(video_id, error = %e, "transcript fetch failed");
                Arc::new(Vec::new())
            }
        }
    }

    pub async fn insert(&self, video_id: &str, transcript: Transcript) {
        let mut inner = self.inner.write().await;
        if inner
            .entries
            .insert(video_id.to_string(), transcript)
            .is_none()
        {
            inner.order.push_back(video_id.to_string());
        }

        if let Some(capacity) = self.capacity {
            while inner.entries.len() > capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
