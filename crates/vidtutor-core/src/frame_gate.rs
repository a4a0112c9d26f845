//! Frame-change gate.
//!
//! Decides whether a sampled frame differs enough from the previous one to
//! be worth describing again. Each frame is reduced to a small centred RGB
//! vector and compared to its predecessor by cosine similarity.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::imageops::FilterType;

use crate::config::FrameGateConfig;

pub const FEATURE_SIDE: u32 = 32;
pub const FEATURE_LEN: usize = (FEATURE_SIDE * FEATURE_SIDE * 3) as usize;

/// Flattened 32x32 RGB pixels, each channel mapped to `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFeatures(Vec<f32>);

impl FrameFeatures {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decodes an encoded image (jpeg, png, webp) into gate features.
pub fn extract_features(bytes: &[u8]) -> Result<FrameFeatures> {
    let img = image::load_from_memory(bytes).context("failed to decode frame image")?;
    let rgb = img
        .resize_exact(FEATURE_SIDE, FEATURE_SIDE, FilterType::Triangle)
        .to_rgb8();
    let values = rgb
        .into_raw()
        .into_iter()
        .map(|channel| channel as f32 / 127.5 - 1.0)
        .collect();
    Ok(FrameFeatures(values))
}

/// Cosine similarity of two vectors. Mismatched lengths and zero vectors
/// compare as `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    RateLimited,
    First,
    Changed { similarity: f32 },
    Unchanged { similarity: f32 },
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::First | Self::Changed { .. })
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            Self::Changed { similarity } | Self::Unchanged { similarity } => Some(*similarity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::First => "first",
            Self::Changed { .. } => "changed",
            Self::Unchanged { .. } => "unchanged",
        }
    }
}

/// Per-session gate state: one prior feature vector and the time of the
/// last frame that got past the rate limit.
#[derive(Debug)]
pub struct FrameGate {
    min_interval: Duration,
    threshold: f32,
    last_evaluated_at: Option<Instant>,
    previous: Option<FrameFeatures>,
}

impl FrameGate {
    pub fn new(config: &FrameGateConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            threshold: config.similarity_threshold,
            last_evaluated_at: None,
            previous: None,
        }
    }

    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.last_evaluated_at
            .map(|last| now.saturating_duration_since(last) < self.min_interval)
            .unwrap_or(false)
    }

    /// Rate-limited calls leave the state untouched. Any other call replaces
    /// the prior vector with `features`, whatever the outcome.
    pub fn offer(&mut self, features: FrameFeatures, now: Instant) -> GateDecision {
        if self.is_rate_limited(now) {
            return GateDecision::RateLimited;
        }
        self.last_evaluated_at = Some(now);

        let decision = match self.previous.as_ref() {
            None => GateDecision::First,
            Some(previous) => {
                let similarity = cosine_similarity(previous.as_slice(), features.as_slice());
                if similarity.abs() < self.threshold {
                    GateDecision::Changed { similarity }
                } else {
                    GateDecision::Unchanged { similarity }
                }
            }
        };
        self.previous = Some(features);
        decision
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> FrameGate {
        FrameGate::new(&FrameGateConfig::default())
    }

    fn features(values: &[f32]) -> FrameFeatures {
        FrameFeatures::from_vec(values.to_vec())
    }

    fn encode_png(color: [u8; 3]) -> Vec<u8> {
        encode_png_with(|_, _| color)
    }

    fn encode_png_with(pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_fn(64, 48, |x, y| image::Rgb(pixel(x, y)));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn first_call_admits() {
        let mut gate = gate();
        let decision = gate.offer(features(&[1.0, 0.0]), Instant::now());
        assert_eq!(decision, GateDecision::First);
        assert!(decision.is_admitted());
        assert!(gate.has_previous());
    }

    #[test]
    fn calls_within_interval_reject_regardless_of_content() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.offer(features(&[1.0, 0.0]), t0);

        let decision = gate.offer(features(&[0.0, 1.0]), t0 + Duration::from_millis(999));
        assert_eq!(decision, GateDecision::RateLimited);
        assert!(!decision.is_admitted());
    }

    #[test]
    fn rate_limited_call_keeps_previous_vector() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.offer(features(&[1.0, 0.0]), t0);
        gate.offer(features(&[0.0, 1.0]), t0 + Duration::from_millis(500));

        // Still compared against the first vector.
        let decision = gate.offer(features(&[1.0, 0.0]), t0 + Duration::from_secs(1));
        assert!(matches!(decision, GateDecision::Unchanged { .. }));
    }

    #[test]
    fn identical_vectors_a_second_apart_reject() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.offer(features(&[0.3, -0.2, 0.9]), t0);

        let decision = gate.offer(features(&[0.3, -0.2, 0.9]), t0 + Duration::from_secs(1));
        let similarity = decision.similarity().unwrap();
        assert!((similarity - 1.0).abs() < 1e-6);
        assert!(!decision.is_admitted());
    }

    #[test]
    fn orthogonal_vectors_admit() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.offer(features(&[1.0, 0.0, 0.0]), t0);

        let decision = gate.offer(features(&[0.0, 1.0, 0.0]), t0 + Duration::from_secs(2));
        assert!(decision.is_admitted());
        assert!(decision.similarity().unwrap().abs() < 1e-6);
    }

    #[test]
    fn anti_correlated_vectors_reject() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.offer(features(&[1.0, -1.0]), t0);

        let decision = gate.offer(features(&[-1.0, 1.0]), t0 + Duration::from_secs(1));
        assert!(matches!(decision, GateDecision::Unchanged { similarity } if similarity < -0.99));
    }

    #[test]
    fn state_advances_after_rejection() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.offer(features(&[1.0, 0.0]), t0);
        gate.offer(features(&[1.0, 0.01]), t0 + Duration::from_secs(1));

        // Compared against the second vector, not the first.
        let decision = gate.offer(features(&[0.0, 1.0]), t0 + Duration::from_secs(2));
        assert!(decision.is_admitted());
    }

    #[test]
    fn cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[5.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn extract_features_has_fixed_size_and_range() {
        let features = extract_features(&encode_png([255, 0, 128])).unwrap();
        assert_eq!(features.len(), FEATURE_LEN);
        assert!(features.as_slice().iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!((features.as_slice()[0] - 1.0).abs() < 1e-2);
        assert!((features.as_slice()[1] + 1.0).abs() < 1e-2);
    }

    #[test]
    fn extract_features_rejects_garbage() {
        assert!(extract_features(b"not an image").is_err());
    }

    #[test]
    fn same_image_is_unchanged_and_different_scene_is_changed() {
        let left_bright = encode_png_with(|x, _| if x < 32 { [240, 240, 240] } else { [10, 10, 10] });
        let right_bright = encode_png_with(|x, _| if x < 32 { [10, 10, 10] } else { [240, 240, 240] });
        let a = extract_features(&left_bright).unwrap();
        let b = extract_features(&left_bright).unwrap();
        let c = extract_features(&right_bright).unwrap();

        assert!(cosine_similarity(a.as_slice(), b.as_slice()) > 0.99);
        assert!(cosine_similarity(a.as_slice(), c.as_slice()) < 0.0);

        let mut gate = gate();
        let t0 = Instant::now();
        assert!(gate.offer(a, t0).is_admitted());
        assert!(!gate.offer(b, t0 + Duration::from_secs(1)).is_admitted());
    }
}
