use super::model::{NoiseKind, Playlist, Segment};

const STAGE_REASONS: [&str; 3] = ["settling in", "deep focus", "final stretch"];

/// Built-in plan used whenever the advisory service cannot supply one: the
/// remaining time split evenly across three kinds, the last segment taking the
/// remainder.
pub fn default_playlist(remaining_seconds: u32, kinds: [NoiseKind; 3]) -> Playlist {
    if remaining_seconds == 0 {
        return Playlist::default();
    }

    let stages = remaining_seconds.min(3);
    let base = remaining_seconds / stages;
    let segments = (0..stages)
        .map(|stage| {
            let duration = if stage + 1 == stages {
                remaining_seconds - base * (stages - 1)
            } else {
                base
            };
            Segment::new(
                kinds[stage as usize],
                duration,
                format!("default plan: {}", STAGE_REASONS[stage as usize]),
            )
        })
        .collect();

    Playlist::new(segments)
}

/// The kind the default plan would have audible at `progress` (0..=1) of a phase.
pub fn proportional_kind(progress: f64, kinds: [NoiseKind; 3]) -> NoiseKind {
    let progress = if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if progress < 1.0 / 3.0 {
        kinds[0]
    } else if progress < 2.0 / 3.0 {
        kinds[1]
    } else {
        kinds[2]
    }
}
