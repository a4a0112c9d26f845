//! Player time updates.
//!
//! The player is the single producer of `TimeUpdate`s; one tracker task
//! consumes them, resolves the transcript line at the playhead and
//! publishes the result as a `watch` snapshot.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use vidtutor_schema::{find_segment_at_time, TimeUpdate, TranscriptSegment};
use vidtutor_youtube::Transcript;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub current_time: f64,
    /// Empty when no segment covers the playhead.
    pub current_transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_segment: Option<TranscriptSegment>,
}

/// Producer half. Deliberately not `Clone`: one player, one sender.
#[derive(Debug)]
pub struct TimeUpdateSender {
    tx: mpsc::Sender<TimeUpdate>,
}

impl TimeUpdateSender {
    /// Waits for room when the tracker lags behind.
    pub async fn send(&self, update: TimeUpdate) -> Result<()> {
        if !update.seconds.is_finite() || update.seconds < 0.0 {
            return Err(anyhow!("invalid playback time: {}", update.seconds));
        }
        self.tx
            .send(update)
            .await
            .map_err(|_| anyhow!("playback tracker has stopped"))
    }
}

pub type TimeUpdateReceiver = mpsc::Receiver<TimeUpdate>;

pub fn time_channel(capacity: usize) -> (TimeUpdateSender, TimeUpdateReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TimeUpdateSender { tx }, rx)
}

pub struct PlaybackTracker {
    transcript: Transcript,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
}

impl PlaybackTracker {
    pub fn new(transcript: Transcript) -> (Self, watch::Receiver<PlaybackSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot::default());
        (
            Self {
                transcript,
                snapshot_tx,
            },
            snapshot_rx,
        )
    }

    pub fn apply(&self, update: TimeUpdate) {
        let segment = find_segment_at_time(&self.transcript, update.seconds).cloned();
        self.snapshot_tx.send_replace(PlaybackSnapshot {
            current_time: update.seconds,
            current_transcript: segment
                .as_ref()
                .map(|s| s.text.clone())
                .unwrap_or_default(),
            current_segment: segment,
        });
    }

    /// Drains updates until the sender is dropped.
    pub async fn run(self, mut rx: TimeUpdateReceiver) {
        while let Some(update) = rx.recv().await {
            self.apply(update);
        }
        tracing::debug!("playback tracker stopped");
    }

    pub fn spawn(
        transcript: Transcript,
        capacity: usize,
    ) -> (TimeUpdateSender, watch::Receiver<PlaybackSnapshot>) {
        let (sender, rx) = time_channel(capacity);
        let (tracker, snapshot_rx) = Self::new(transcript);
        tokio::spawn(tracker.run(rx));
        (sender, snapshot_rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn transcript() -> Transcript {
        Arc::new(vec![
            TranscriptSegment::new("intro", 0, 2000),
            TranscriptSegment::new("main point", 2000, 3000),
            TranscriptSegment::new("after gap", 6000, 1000),
        ])
    }

    #[test]
    fn apply_resolves_segment_at_playhead() {
        let (tracker, rx) = PlaybackTracker::new(transcript());
        tracker.apply(TimeUpdate { seconds: 3.5 });
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.current_time, 3.5);
        assert_eq!(snapshot.current_transcript, "main point");

        tracker.apply(TimeUpdate { seconds: 5.5 });
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.current_transcript, "");
        assert!(snapshot.current_segment.is_none());
    }

    #[tokio::test]
    async fn spawned_tracker_consumes_updates_in_order() {
        let (sender, mut rx) = PlaybackTracker::spawn(transcript(), 4);
        for seconds in [0.5, 1.0, 2.5, 6.2] {
            sender.send(TimeUpdate { seconds }).await.unwrap();
        }
        let snapshot = rx
            .wait_for(|s| s.current_time == 6.2)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.current_transcript, "after gap");
    }

    #[tokio::test]
    async fn invalid_time_is_rejected() {
        let (sender, _rx) = PlaybackTracker::spawn(transcript(), 1);
        assert!(sender.send(TimeUpdate { seconds: -1.0 }).await.is_err());
        assert!(sender.send(TimeUpdate { seconds: f64::NAN }).await.is_err());
    }

    #[tokio::test]
    async fn tracker_stops_when_sender_dropped() {
        let (sender, rx) = time_channel(2);
        let (tracker, _snapshots) = PlaybackTracker::new(transcript());
        let handle = tokio::spawn(tracker.run(rx));
        drop(sender);
        handle.await.unwrap();
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snapshot = PlaybackSnapshot {
            current_time: 1.0,
            current_transcript: "intro".into(),
            current_segment: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["currentTime"], 1.0);
        assert_eq!(json["currentTranscript"], "intro");
    }
}
