//! Shared fixtures for the integration tests: a fake process backend that
//! writes real WAV files and tracks its players, plus small builders.

#![allow(dead_code)]

pub mod fake_backend;

use std::{sync::Arc, time::Duration};

use focustide_lib::{
    audio::{AudioConfig, AudioProcessController},
    playlist::{NoiseKind, Playlist, Segment},
    timer::PhaseDurations,
};
use tempfile::TempDir;

pub use fake_backend::FakeBackend;

/// Low enough that long segments render quickly, high enough to pass validation.
pub const TEST_SAMPLE_RATE: u32 = 50;

pub fn test_audio_config(work_dir: &TempDir) -> AudioConfig {
    AudioConfig {
        fade_window: Duration::from_secs(2),
        crossfade_window: Duration::from_secs(2),
        min_bytes_per_second: 50,
        cleanup_grace: Duration::from_secs(3),
        sample_rate: TEST_SAMPLE_RATE,
        channels: 1,
        work_dir: work_dir.path().join("audio"),
    }
}

pub fn audio_controller(backend: &Arc<FakeBackend>, work_dir: &TempDir) -> Arc<AudioProcessController> {
    Arc::new(AudioProcessController::new(
        Arc::clone(backend) as Arc<dyn focustide_lib::audio::AudioBackend>,
        test_audio_config(work_dir),
    ))
}

pub fn durations(work_secs: u64, short_break_secs: u64) -> PhaseDurations {
    PhaseDurations {
        work: Duration::from_secs(work_secs),
        short_break: Duration::from_secs(short_break_secs),
        long_break: Duration::from_secs(short_break_secs * 3),
        long_break_every: 4,
    }
}

pub fn playlist(segments: &[(NoiseKind, u32)]) -> Playlist {
    Playlist::new(
        segments
            .iter()
            .map(|&(kind, secs)| Segment::new(kind, secs, "test"))
            .collect(),
    )
}

/// Lets spawned tasks run without moving the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Number of entries left in the transient audio directory.
pub fn transient_files(work_dir: &TempDir) -> usize {
    std::fs::read_dir(work_dir.path().join("audio"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}
