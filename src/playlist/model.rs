use serde::{Deserialize, Serialize};

pub use crate::audio::NoiseKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub noise_kind: NoiseKind,
    pub duration_seconds: u32,
    #[serde(default)]
    pub start_offset_seconds: u32,
    #[serde(default)]
    pub reason: String,
}

impl Segment {
    pub fn new(noise_kind: NoiseKind, duration_seconds: u32, reason: impl Into<String>) -> Self {
        Self {
            noise_kind,
            duration_seconds,
            start_offset_seconds: 0,
            reason: reason.into(),
        }
    }
}

/// Ordered, contiguous noise plan for one work phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub total_duration_seconds: u32,
}

impl Playlist {
    /// Builds a playlist whose offsets and total are derived from `segments`.
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut playlist = Self {
            segments,
            total_duration_seconds: 0,
        };
        playlist.reflow();
        playlist.total_duration_seconds = playlist.summed_duration();
        playlist
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn summed_duration(&self) -> u32 {
        self.segments
            .iter()
            .map(|segment| segment.duration_seconds)
            .fold(0u32, u32::saturating_add)
    }

    /// Repairs a plan from an untrusted source. Segment order is kept, zero
    /// durations become one second, offsets are recomputed to be contiguous and
    /// a mismatching declared total is forced through the final segment.
    pub fn normalized(mut self) -> Self {
        for segment in &mut self.segments {
            segment.duration_seconds = segment.duration_seconds.max(1);
        }

        let declared = self.total_duration_seconds;
        let summed = self.summed_duration();
        if declared != 0 && declared != summed {
            if let Some(last) = self.segments.last() {
                let others = summed - last.duration_seconds;
                if declared > others {
                    let fixed = declared - others;
                    if let Some(last) = self.segments.last_mut() {
                        last.duration_seconds = fixed;
                    }
                }
            }
        }

        self.reflow();
        self.total_duration_seconds = self.summed_duration();
        self
    }

    /// Rescales every segment so the plan lasts exactly `target_seconds`.
    ///
    /// Durations scale proportionally with the final segment absorbing the
    /// rounding remainder; no segment drops below one second. A target shorter
    /// than one second per segment keeps only the leading segments.
    pub fn rescaled_to(&self, target_seconds: u32) -> Self {
        if self.is_empty() || target_seconds == self.total_duration_seconds {
            return self.clone();
        }
        if target_seconds == 0 {
            return Self::default();
        }

        let mut segments = self.segments.clone();
        if (target_seconds as usize) < segments.len() {
            segments.truncate(target_seconds as usize);
            for segment in &mut segments {
                segment.duration_seconds = 1;
            }
            return Self::new(segments);
        }

        let planned = u64::from(self.summed_duration().max(1));
        let target = u64::from(target_seconds);
        let last_index = segments.len() - 1;

        let mut assigned: u64 = 0;
        for segment in segments.iter_mut().take(last_index) {
            let scaled = (u64::from(segment.duration_seconds) * target / planned).max(1);
            segment.duration_seconds = scaled as u32;
            assigned += scaled;
        }

        // Rounding up to one second can overshoot; take it back from the
        // longest leading segments.
        while assigned >= target {
            let Some(longest) = segments[..last_index]
                .iter_mut()
                .filter(|segment| segment.duration_seconds > 1)
                .max_by_key(|segment| segment.duration_seconds)
            else {
                break;
            };
            longest.duration_seconds -= 1;
            assigned -= 1;
        }

        segments[last_index].duration_seconds = (target - assigned) as u32;
        Self::new(segments)
    }

    fn reflow(&mut self) {
        let mut offset = 0u32;
        for segment in &mut self.segments {
            segment.start_offset_seconds = offset;
            offset = offset.saturating_add(segment.duration_seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(durations: &[u32]) -> Playlist {
        let kinds = [NoiseKind::PinkNoise, NoiseKind::BrownNoise, NoiseKind::Rain];
        Playlist::new(
            durations
                .iter()
                .enumerate()
                .map(|(i, &d)| Segment::new(kinds[i % kinds.len()], d, "test"))
                .collect(),
        )
    }

    fn assert_contiguous(playlist: &Playlist) {
        let mut offset = 0;
        for segment in &playlist.segments {
            assert_eq!(segment.start_offset_seconds, offset);
            assert!(segment.duration_seconds >= 1);
            offset += segment.duration_seconds;
        }
        assert_eq!(offset, playlist.total_duration_seconds);
    }

    #[test]
    fn shrink_matches_remaining_exactly() {
        let original = plan(&[600, 600, 600]);
        let rescaled = original.rescaled_to(1_500);
        assert_eq!(rescaled.summed_duration(), 1_500);
        assert_eq!(rescaled.total_duration_seconds, 1_500);
        assert_eq!(rescaled.segments[0].duration_seconds, 500);
        assert_contiguous(&rescaled);
    }

    #[test]
    fn grow_matches_remaining_exactly() {
        let original = plan(&[600, 600, 600]);
        let rescaled = original.rescaled_to(2_000);
        assert_eq!(rescaled.summed_duration(), 2_000);
        assert_eq!(rescaled.segments[0].duration_seconds, 666);
        assert_eq!(rescaled.segments[2].duration_seconds, 668);
        assert_contiguous(&rescaled);
    }

    #[test]
    fn tiny_segments_never_drop_below_one_second() {
        let original = plan(&[1, 1, 1_798]);
        let rescaled = original.rescaled_to(100);
        assert_eq!(rescaled.summed_duration(), 100);
        assert_eq!(rescaled.segments[0].duration_seconds, 1);
        assert_eq!(rescaled.segments[1].duration_seconds, 1);
        assert_contiguous(&rescaled);
    }

    #[test]
    fn overshoot_from_minimums_is_taken_back() {
        let original = plan(&[10, 10, 10, 1]);
        let rescaled = original.rescaled_to(4);
        assert_eq!(rescaled.summed_duration(), 4);
        assert!(rescaled.segments.iter().all(|s| s.duration_seconds == 1));
    }

    #[test]
    fn target_below_segment_count_truncates() {
        let rescaled = plan(&[60, 60, 60]).rescaled_to(2);
        assert_eq!(rescaled.len(), 2);
        assert_eq!(rescaled.total_duration_seconds, 2);
    }

    #[test]
    fn normalized_forces_declared_total_through_last_segment() {
        let mut playlist = plan(&[300, 300, 300]);
        playlist.total_duration_seconds = 1_000;
        playlist.segments[1].start_offset_seconds = 17;

        let fixed = playlist.normalized();
        assert_eq!(fixed.segments[2].duration_seconds, 400);
        assert_eq!(fixed.total_duration_seconds, 1_000);
        assert_contiguous(&fixed);
    }

    #[test]
    fn normalized_raises_zero_durations() {
        let mut playlist = plan(&[0, 120]);
        playlist.total_duration_seconds = 0;
        let fixed = playlist.normalized();
        assert_eq!(fixed.segments[0].duration_seconds, 1);
        assert_eq!(fixed.total_duration_seconds, 121);
    }

    #[test]
    fn deserializes_advisory_payload_with_aliases() {
        let json = r#"{
            "segments": [
                {"noise_kind": "pink", "duration_seconds": 600, "reason": "warm up"},
                {"noise_kind": "brown_noise", "duration_seconds": 1200}
            ],
            "total_duration_seconds": 1800
        }"#;
        let playlist: Playlist = serde_json::from_str(json).unwrap();
        let playlist = playlist.normalized();
        assert_eq!(playlist.segments[0].noise_kind, NoiseKind::PinkNoise);
        assert_eq!(playlist.segments[1].start_offset_seconds, 600);
        assert_eq!(playlist.total_duration_seconds, 1_800);
    }
}
