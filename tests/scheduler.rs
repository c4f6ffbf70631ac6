//! Playlist playback driven by the real timer and a fake process backend.

mod helpers;

use std::{sync::Arc, time::Duration};

use focustide_lib::{
    audio::{AudioProcessController, StreamStatus},
    playlist::{NoiseKind, Playlist, PlaylistScheduler, SchedulerOptions},
    timer::{Phase, TimerController},
};
use helpers::{audio_controller, durations, playlist, settle, transient_files, FakeBackend};
use tempfile::TempDir;
use tokio::time::sleep;

use NoiseKind::{BrownNoise, PinkNoise, Rain};

struct Rig {
    dir: TempDir,
    backend: Arc<FakeBackend>,
    audio: Arc<AudioProcessController>,
    timer: TimerController,
    scheduler: PlaylistScheduler,
}

impl Rig {
    fn new(work_secs: u64) -> Self {
        Self::with_options(work_secs, SchedulerOptions::default())
    }

    fn with_options(work_secs: u64, options: SchedulerOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let audio = audio_controller(&backend, &dir);
        let timer = TimerController::new(durations(work_secs, 30));
        let scheduler = PlaylistScheduler::new(Arc::clone(&audio), timer.clone(), options);
        Self {
            dir,
            backend,
            audio,
            timer,
            scheduler,
        }
    }

    fn files(&self) -> usize {
        transient_files(&self.dir)
    }
}

fn thirds(each: u32) -> Playlist {
    playlist(&[(PinkNoise, each), (BrownNoise, each), (Rain, each)])
}

#[tokio::test(start_paused = true)]
async fn rejects_empty_playlists_and_idle_timers() {
    let rig = Rig::new(60);

    assert!(!rig.scheduler.load_and_play(thirds(20)).await, "timer is stopped");

    rig.timer.start().await;
    assert!(!rig.scheduler.load_and_play(Playlist::default()).await);
    assert!(!rig.scheduler.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn plan_is_rescaled_to_the_remaining_work_time() {
    let rig = Rig::new(1_500);
    rig.timer.start().await;

    assert!(rig.scheduler.load_and_play(thirds(600)).await);

    let loaded = rig.scheduler.playlist().await.unwrap();
    assert_eq!(loaded.total_duration_seconds, 1_500);
    let lengths: Vec<u32> = loaded.segments.iter().map(|s| s.duration_seconds).collect();
    assert_eq!(lengths, vec![500, 500, 500]);
    assert_eq!(loaded.segments[2].start_offset_seconds, 1_000);
}

#[tokio::test(start_paused = true)]
async fn segments_play_in_order_and_crossfade() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);

    settle().await;
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise]);

    sleep(Duration::from_secs(21)).await;
    assert_eq!(rig.backend.spawned_kinds(), vec![PinkNoise, BrownNoise]);
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise, BrownNoise]);
    assert_eq!(rig.scheduler.cursor().await.unwrap().segment_index, 1);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.backend.live_kinds(), vec![BrownNoise]);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(rig.backend.spawned_kinds(), vec![PinkNoise, BrownNoise, Rain]);
    assert_eq!(rig.audio.current_kind().await, Some(Rain));
}

#[tokio::test(start_paused = true)]
async fn next_segment_fades_in_before_the_previous_one_runs_out() {
    let rig = Rig::new(60);
    rig.backend.set_render_delay(Duration::from_secs(2));
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);

    // Pink became audible after its 2 s render and is due to hand over at 22 s.
    sleep(Duration::from_millis(22_500)).await;
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise, BrownNoise]);

    sleep(Duration::from_secs(25)).await;
    let spans = rig.backend.player_spans();
    let kinds: Vec<NoiseKind> = spans.iter().map(|span| span.kind).collect();
    assert_eq!(kinds, vec![PinkNoise, BrownNoise, Rain]);
    for pair in spans.windows(2) {
        assert!(
            pair[1].started_at < pair[0].audio_ends_at(),
            "{:?} started after {:?} ran out",
            pair[1].kind,
            pair[0].kind
        );
    }
    assert_eq!(spans[0].audio, Duration::from_secs(22));
    assert_eq!(spans[1].audio, Duration::from_secs(22));
    assert_eq!(spans[2].audio, Duration::from_secs(20), "last segment has no tail");
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_the_cursor_and_resume_finishes_the_segment() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(playlist(&[(PinkNoise, 30), (BrownNoise, 30)])).await);

    settle().await;
    sleep(Duration::from_secs(10)).await;
    rig.timer.pause().await;
    settle().await;

    assert_eq!(rig.backend.live_count(), 0, "pause stops audio immediately");
    let cursor = rig.scheduler.cursor().await.unwrap();
    assert!(cursor.paused);
    assert_eq!(cursor.segment_index, 0);
    let frozen = cursor.elapsed_in_segment;
    assert!(
        frozen >= Duration::from_millis(9_900) && frozen <= Duration::from_millis(10_100),
        "elapsed {frozen:?}"
    );

    sleep(Duration::from_secs(120)).await;
    let cursor = rig.scheduler.cursor().await.unwrap();
    assert_eq!(cursor.elapsed_in_segment, frozen);
    assert_eq!(rig.timer.phase().await, Phase::WorkPaused);

    rig.timer.resume().await;
    settle().await;
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise]);
    assert!(!rig.scheduler.cursor().await.unwrap().paused);

    // Twenty seconds of the first segment were left at the pause.
    sleep(Duration::from_secs(19)).await;
    assert_eq!(rig.scheduler.cursor().await.unwrap().segment_index, 0);
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(rig.scheduler.cursor().await.unwrap().segment_index, 1);
    assert_eq!(
        rig.backend.spawned_kinds(),
        vec![PinkNoise, PinkNoise, BrownNoise]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_mid_generation_leaves_nothing_running() {
    let rig = Rig::new(60);
    rig.backend.set_render_delay(Duration::from_secs(5));
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);

    sleep(Duration::from_secs(1)).await;
    rig.timer.stop().await;
    sleep(Duration::from_secs(10)).await;

    assert!(rig.backend.spawned_kinds().is_empty());
    assert_eq!(rig.audio.live_stream_count().await, 0);
    assert!(!rig.scheduler.is_active().await);
    assert_eq!(rig.scheduler.cursor().await, None);
    assert_eq!(rig.files(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_mid_crossfade_kills_both_streams() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);

    sleep(Duration::from_secs(21)).await;
    assert_eq!(rig.backend.live_count(), 2);

    rig.timer.stop().await;
    settle().await;

    assert_eq!(rig.backend.live_count(), 0);
    assert_eq!(rig.audio.live_stream_count().await, 0);
    assert_eq!(rig.scheduler.playlist().await, None);
    assert_eq!(rig.files(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_while_paused_keeps_everything_silent() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);
    settle().await;

    rig.timer.pause().await;
    settle().await;
    rig.timer.stop().await;
    settle().await;
    rig.timer.start().await;
    sleep(Duration::from_secs(5)).await;

    // A fresh start without a new plan plays nothing.
    assert_eq!(rig.backend.spawned_kinds(), vec![PinkNoise]);
    assert_eq!(rig.backend.live_count(), 0);
    assert!(!rig.scheduler.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn pause_during_generation_discards_the_render() {
    let rig = Rig::new(60);
    rig.backend.set_render_delay(Duration::from_secs(2));
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);

    sleep(Duration::from_millis(500)).await;
    rig.timer.pause().await;
    sleep(Duration::from_secs(5)).await;

    assert!(rig.backend.spawned_kinds().is_empty());
    let cursor = rig.scheduler.cursor().await.unwrap();
    assert!(cursor.paused);
    assert_eq!(cursor.elapsed_in_segment, Duration::ZERO);

    rig.timer.resume().await;
    sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise]);
}

#[tokio::test(start_paused = true)]
async fn failed_segment_is_skipped_on_its_own_timeout() {
    let rig = Rig::new(60);
    rig.backend.fail_kind(PinkNoise);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);

    sleep(Duration::from_secs(5)).await;
    assert!(rig.backend.spawned_kinds().is_empty());
    assert_eq!(rig.scheduler.cursor().await.unwrap().segment_index, 0);

    sleep(Duration::from_secs(16)).await;
    assert_eq!(rig.backend.live_kinds(), vec![BrownNoise]);
}

#[tokio::test(start_paused = true)]
async fn a_new_playlist_supersedes_the_active_one() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);
    settle().await;

    sleep(Duration::from_secs(10)).await;
    assert!(rig.scheduler.load_and_play(playlist(&[(Rain, 100)])).await);
    settle().await;

    let loaded = rig.scheduler.playlist().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.total_duration_seconds, 50);
    assert_eq!(rig.backend.spawned_kinds(), vec![PinkNoise, Rain]);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.backend.live_kinds(), vec![Rain]);
}

#[tokio::test(start_paused = true)]
async fn finished_playlist_fades_out() {
    let rig = Rig::new(30);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(10)).await);

    sleep(Duration::from_millis(30_500)).await;
    assert!(!rig.scheduler.is_active().await);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.backend.live_count(), 0);
    assert_eq!(rig.audio.live_stream_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn discard_fades_out_and_forgets_the_plan() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);
    settle().await;

    rig.scheduler.discard(true).await;
    assert_eq!(rig.scheduler.cursor().await, None);
    assert_eq!(rig.backend.live_count(), 1, "still fading");

    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(rig.backend.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_if_needed_follows_the_default_schedule_without_a_plan() {
    let rig = Rig::new(90);
    rig.timer.start().await;

    assert_eq!(rig.scheduler.update_if_needed().await, Some(PinkNoise));
    assert_eq!(rig.scheduler.update_if_needed().await, None);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(rig.scheduler.update_if_needed().await, Some(BrownNoise));
    assert_eq!(rig.backend.spawned_kinds(), vec![PinkNoise, BrownNoise]);

    rig.timer.pause().await;
    settle().await;
    assert_eq!(rig.scheduler.update_if_needed().await, None);
    assert_eq!(rig.backend.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_if_needed_restores_the_planned_segment() {
    let rig = Rig::new(60);
    rig.timer.start().await;
    assert!(rig.scheduler.load_and_play(thirds(20)).await);
    settle().await;

    // Something else took over the output.
    rig.audio.crossfade_to(Rain, 30).await;
    assert_eq!(rig.scheduler.update_if_needed().await, Some(PinkNoise));
    assert_eq!(rig.audio.current_kind().await, Some(PinkNoise));
    assert_eq!(rig.scheduler.update_if_needed().await, None);
}

#[tokio::test(start_paused = true)]
async fn adaptive_resume_without_a_plan_restarts_audio() {
    let options = SchedulerOptions {
        adaptive_when_idle: true,
        ..SchedulerOptions::default()
    };
    let rig = Rig::with_options(90, options);
    rig.timer.start().await;
    rig.scheduler.update_if_needed().await;

    rig.timer.pause().await;
    settle().await;
    assert_eq!(rig.backend.live_count(), 0);

    rig.timer.resume().await;
    settle().await;
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise]);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_an_adaptive_restart_still_rendering() {
    let options = SchedulerOptions {
        adaptive_when_idle: true,
        ..SchedulerOptions::default()
    };
    let rig = Rig::with_options(90, options);
    rig.backend.set_render_delay(Duration::from_secs(5));
    rig.timer.start().await;
    rig.timer.pause().await;
    settle().await;

    rig.timer.resume().await;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(rig.backend.render_count(), 1, "restart is rendering");
    rig.timer.stop().await;
    sleep(Duration::from_secs(10)).await;

    assert!(rig.backend.spawned_kinds().is_empty());
    assert_eq!(rig.audio.live_stream_count().await, 0);
    assert_eq!(rig.audio.status().await, StreamStatus::Idle);
    assert_eq!(rig.files(), 0);
}

#[tokio::test(start_paused = true)]
async fn pause_cancels_a_requested_update() {
    let rig = Rig::new(90);
    rig.backend.set_render_delay(Duration::from_secs(3));
    rig.timer.start().await;

    rig.scheduler.request_update();
    sleep(Duration::from_secs(1)).await;
    rig.timer.pause().await;
    sleep(Duration::from_secs(5)).await;
    assert!(rig.backend.spawned_kinds().is_empty());

    // Updates requested after the pause run normally.
    rig.timer.resume().await;
    rig.scheduler.request_update();
    sleep(Duration::from_secs(4)).await;
    assert_eq!(rig.backend.live_kinds(), vec![PinkNoise]);
}
