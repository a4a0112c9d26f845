use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vidtutor_provider::{LlmMessage, LlmProvider, LlmRequest};
use vidtutor_schema::FrameRef;

use crate::config::FrameGateConfig;
use crate::frame_gate::{extract_features, FrameGate, GateDecision};

const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub confidence: f32,
}

/// Formats labels as `"person (87.2%), laptop (9.1%)"`.
pub fn describe_labels(labels: &[Label]) -> String {
    labels
        .iter()
        .map(|l| format!("{} ({:.1}%)", l.name, l.confidence * 100.0))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
pub trait FrameClassifier: Send + Sync {
    /// Top guesses for what the frame shows, most confident first.
    async fn classify(&self, frame: &FrameRef) -> Result<Vec<Label>>;
}

/// Admits frames without describing them.
pub struct NoopClassifier;

#[async_trait]
impl FrameClassifier for NoopClassifier {
    async fn classify(&self, _frame: &FrameRef) -> Result<Vec<Label>> {
        Ok(Vec::new())
    }
}

/// Labels a frame by asking a vision-capable chat model for JSON.
pub struct VisionClassifier {
    provider: Arc<dyn LlmProvider>,
    model: String,
    top_k: usize,
}

impl VisionClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, top_k: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl FrameClassifier for VisionClassifier {
    async fn classify(&self, frame: &FrameRef) -> Result<Vec<Label>> {
        let request = LlmRequest {
            model: self.model.clone(),
            system: Some(
                "You label still frames from videos. Reply with JSON only, shaped as \
                 {\"labels\":[{\"name\":\"...\",\"confidence\":0.0}]} with confidence between 0 and 1."
                    .to_string(),
            ),
            messages: vec![LlmMessage::user_with_image(
                frame.to_image_url(),
                format!("List up to {} things visible in this frame.", self.top_k),
            )],
            max_tokens: 200,
            temperature: Some(0.0),
            tools: vec![],
        };
        let response = self.provider.chat(request).await?;
        parse_labels(&response.text, self.top_k)
    }
}

/// Extracts the label list from a model reply, tolerating code fences and
/// surrounding prose.
pub fn parse_labels(reply: &str, top_k: usize) -> Result<Vec<Label>> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        _ => bail!("classifier reply has no json object"),
    };

    #[derive(Deserialize)]
    struct LabelsReply {
        #[serde(default)]
        labels: Vec<Label>,
    }

    let parsed: LabelsReply =
        serde_json::from_str(json).context("classifier reply is not valid label json")?;
    let mut labels: Vec<Label> = parsed
        .labels
        .into_iter()
        .filter(|l| !l.name.trim().is_empty() && l.confidence.is_finite())
        .map(|l| Label {
            name: l.name.trim().to_string(),
            confidence: l.confidence.clamp(0.0, 1.0),
        })
        .collect();
    labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    labels.truncate(top_k);
    Ok(labels)
}

/// Outcome of offering one frame to a session's gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameAnalysis {
    pub should_process: bool,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl FrameAnalysis {
    fn rejected(decision: &str, similarity: Option<f32>) -> Self {
        Self {
            should_process: false,
            decision: decision.to_string(),
            similarity,
            description: None,
            image_url: None,
        }
    }
}

/// Gate plus classifier for one viewing session.
pub struct FrameAnalyzer {
    gate: FrameGate,
    classifier: Arc<dyn FrameClassifier>,
    http: reqwest::Client,
}

impl FrameAnalyzer {
    pub fn new(
        config: &FrameGateConfig,
        classifier: Arc<dyn FrameClassifier>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            gate: FrameGate::new(config),
            classifier,
            http,
        }
    }

    /// Never fails: fetch, decode and classifier errors are logged and
    /// reported as `should_process = false`.
    pub async fn analyze(&mut self, frame: &FrameRef, now: Instant) -> FrameAnalysis {
        if self.gate.is_rate_limited(now) {
            tracing::debug!("frame skipped: rate limited");
            return FrameAnalysis::rejected(GateDecision::RateLimited.as_str(), None);
        }

        let bytes = match self.load(frame).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "frame fetch failed");
                return FrameAnalysis::rejected("fetch_failed", None);
            }
        };

        let features = match tokio::task::spawn_blocking(move || extract_features(&bytes)).await
        {
            Ok(Ok(features)) => features,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "frame decode failed");
                return FrameAnalysis::rejected("decode_failed", None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame feature task failed");
                return FrameAnalysis::rejected("decode_failed", None);
            }
        };

        let decision = self.gate.offer(features, now);
        tracing::debug!(
            decision = decision.as_str(),
            similarity = ?decision.similarity(),
            "frame gate decision"
        );
        if !decision.is_admitted() {
            return FrameAnalysis::rejected(decision.as_str(), decision.similarity());
        }

        match self.classifier.classify(frame).await {
            Ok(labels) => FrameAnalysis {
                should_process: true,
                decision: decision.as_str().to_string(),
                similarity: decision.similarity(),
                description: (!labels.is_empty()).then(|| describe_labels(&labels)),
                image_url: Some(frame.to_image_url()),
            },
            Err(e) => {
                tracing::warn!(error = %e, "frame classification failed");
                FrameAnalysis::rejected("classify_failed", decision.similarity())
            }
        }
    }

    async fn load(&self, frame: &FrameRef) -> Result<Vec<u8>> {
        match frame {
            FrameRef::Bytes(bytes) => Ok(bytes.clone()),
            FrameRef::Url(url) => {
                let resp = self
                    .http
                    .get(url)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await
                    .with_context(|| format!("failed to fetch frame {url}"))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(anyhow!("frame fetch returned {status}: {url}"));
                }
                let bytes = resp.bytes().await.context("failed to read frame body")?;
                if bytes.len() > MAX_FRAME_BYTES {
                    bail!("frame too large: {} bytes", bytes.len());
                }
                Ok(bytes.to_vec())
            }
        }
    }
}
