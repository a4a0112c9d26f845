use crate::TranscriptSegment;

/// Returns the segment whose half-open span `[offset, offset + duration)`
/// contains `time_seconds`, or `None` when the time falls in a gap.
pub fn find_segment_at_time(
    segments: &[TranscriptSegment],
    time_seconds: f64,
) -> Option<&TranscriptSegment> {
    segments
        .iter()
        .find(|seg| time_seconds >= seg.start_seconds() && time_seconds < seg.end_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment::new("intro", 0, 2_000),
            TranscriptSegment::new("cats purr", 2_000, 3_000),
            // gap between 5.0s and 7.5s
            TranscriptSegment::new("dogs bark", 7_500, 1_500),
        ]
    }

    #[test]
    fn finds_segment_containing_time() {
        let segments = sample();
        assert_eq!(find_segment_at_time(&segments, 0.0).unwrap().text, "intro");
        assert_eq!(find_segment_at_time(&segments, 3.2).unwrap().text, "cats purr");
        assert_eq!(find_segment_at_time(&segments, 8.9).unwrap().text, "dogs bark");
    }

    #[test]
    fn boundary_belongs_to_next_segment() {
        let segments = sample();
        assert_eq!(find_segment_at_time(&segments, 2.0).unwrap().text, "cats purr");
    }

    #[test]
    fn gap_and_past_end_return_none() {
        let segments = sample();
        assert!(find_segment_at_time(&segments, 5.0).is_none());
        assert!(find_segment_at_time(&segments, 6.0).is_none());
        assert!(find_segment_at_time(&segments, 9.0).is_none());
        assert!(find_segment_at_time(&[], 1.0).is_none());
    }

    #[test]
    fn zero_duration_segment_never_matches() {
        let segments = vec![TranscriptSegment::new("blip", 1_000, 0)];
        assert!(find_segment_at_time(&segments, 1.0).is_none());
    }
}
