use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use super::{
    defaults::proportional_kind,
    model::{NoiseKind, Playlist},
};
use crate::{
    audio::{AudioProcessController, RenderedSegment, StreamStatus},
    notify::NotificationSink,
    timer::{Phase, TimerController, TimerEvent},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Default recheck interval of the segment wait. Signals wake the loop
/// immediately; the interval only bounds how stale the published cursor gets.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Position within the active playlist, preserved across pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCursor {
    pub segment_index: usize,
    pub elapsed_in_segment: Duration,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunSignal {
    Play,
    Pause,
    /// Session stopped or phase left; audio was stopped by whoever sent this.
    Abort,
    /// A newer playlist took over; audio belongs to the new run.
    Superseded,
}

impl RunSignal {
    fn is_final(self) -> bool {
        matches!(self, RunSignal::Abort | RunSignal::Superseded)
    }
}

struct ActiveRun {
    id: u64,
    playlist: Playlist,
    cursor: PlaybackCursor,
    /// When the current segment last became audible. `None` while paused or
    /// while its stream is being started.
    audible_since: Option<Instant>,
    signal: watch::Sender<RunSignal>,
}

impl ActiveRun {
    fn segment_duration(&self) -> Duration {
        self.playlist
            .segments
            .get(self.cursor.segment_index)
            .map(|segment| Duration::from_secs(u64::from(segment.duration_seconds)))
            .unwrap_or_default()
    }

    fn live_elapsed(&self, now: Instant) -> Duration {
        let audible = self
            .audible_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        (self.cursor.elapsed_in_segment + audible).min(self.segment_duration())
    }

    fn live_cursor(&self, now: Instant) -> PlaybackCursor {
        PlaybackCursor {
            elapsed_in_segment: self.live_elapsed(now),
            ..self.cursor
        }
    }

    fn advance(&mut self) {
        self.cursor.segment_index += 1;
        self.cursor.elapsed_in_segment = Duration::ZERO;
        self.audible_since = None;
    }
}

struct Runs {
    active: Option<ActiveRun>,
    next_id: u64,
}

impl Runs {
    fn current_mut(&mut self, run_id: u64) -> Option<&mut ActiveRun> {
        self.active.as_mut().filter(|run| run.id == run_id)
    }
}

enum Step {
    Finished,
    Segment {
        index: usize,
        kind: NoiseKind,
        left: Duration,
        fresh: bool,
        /// Seconds the stream keeps sounding past `left` so the next segment
        /// can fade in over it. Zero for the last segment.
        tail: u32,
        reason: String,
    },
}

/// The next segment, rendered while the current one plays.
struct Prefetch {
    index: usize,
    task: JoinHandle<Option<RenderedSegment>>,
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum WaitOutcome {
    SegmentDone,
    Interrupted,
    Gone,
}

#[derive(Clone)]
pub struct SchedulerOptions {
    pub default_kinds: [NoiseKind; 3],
    pub poll_interval: Duration,
    pub notifier: Option<Arc<dyn NotificationSink>>,
    /// Fall back to the progress-keyed schedule on resume when no playlist is loaded.
    pub adaptive_when_idle: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            default_kinds: [NoiseKind::PinkNoise, NoiseKind::BrownNoise, NoiseKind::Rain],
            poll_interval: DEFAULT_POLL_INTERVAL,
            notifier: None,
            adaptive_when_idle: false,
        }
    }
}

struct SchedulerInner {
    audio: Arc<AudioProcessController>,
    timer: TimerController,
    options: SchedulerOptions,
    runs: Mutex<Runs>,
    /// Cancels background soundscape updates; replaced after each pause or stop.
    updates: StdMutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Plays a playlist's segments back to back through the audio controller and
/// follows the timer's pause, resume and stop events.
#[derive(Clone)]
pub struct PlaylistScheduler {
    inner: Arc<SchedulerInner>,
}

impl PlaylistScheduler {
    /// Subscribes to `timer` once, here; must be called inside a tokio runtime.
    pub fn new(
        audio: Arc<AudioProcessController>,
        timer: TimerController,
        options: SchedulerOptions,
    ) -> Self {
        let events = timer.subscribe();
        let shutdown = CancellationToken::new();
        let inner = Arc::new(SchedulerInner {
            audio,
            timer,
            options,
            runs: Mutex::new(Runs {
                active: None,
                next_id: 1,
            }),
            updates: StdMutex::new(shutdown.child_token()),
            shutdown,
        });
        spawn_listener(Arc::downgrade(&inner), events, inner.shutdown.clone());
        Self { inner }
    }

    /// Starts playing `playlist` for the active work phase, replacing any
    /// playlist already loaded. The plan is rescaled to the phase's actual
    /// remaining time first. Returns `false` (and logs) when there is nothing to
    /// play or no work phase to play it in.
    pub async fn load_and_play(&self, playlist: Playlist) -> bool {
        if playlist.is_empty() {
            log_warn!("ignoring empty playlist");
            return false;
        }
        let playlist = playlist.normalized();

        let (run_id, signal) = {
            let mut runs = self.inner.runs.lock().await;
            // Read under the run lock so a concurrent stop or pause is either
            // visible here or processed against the run installed below.
            let snapshot = self.inner.timer.snapshot().await;
            if !snapshot.phase.is_work() {
                log_warn!("not loading playlist outside a work phase ({})", snapshot.phase);
                return false;
            }
            let remaining_secs = ((snapshot.remaining_ms + 500) / 1_000) as u32;
            if remaining_secs == 0 {
                log_warn!("not loading playlist: work phase already over");
                return false;
            }

            let playlist = if playlist.total_duration_seconds != remaining_secs {
                log_info!(
                    "rescaling playlist from {}s to {}s remaining",
                    playlist.total_duration_seconds,
                    remaining_secs
                );
                playlist.rescaled_to(remaining_secs)
            } else {
                playlist
            };

            if let Some(previous) = runs.active.take() {
                log_info!("playlist run {} superseded", previous.id);
                previous.signal.send_replace(RunSignal::Superseded);
            }

            let paused = snapshot.phase == Phase::WorkPaused;
            let initial = if paused {
                RunSignal::Pause
            } else {
                RunSignal::Play
            };
            let (signal_tx, signal_rx) = watch::channel(initial);
            let id = runs.next_id;
            runs.next_id += 1;
            log_info!(
                "playlist run {id}: {} segments over {}s{}",
                playlist.len(),
                playlist.total_duration_seconds,
                if paused { " (paused)" } else { "" }
            );
            runs.active = Some(ActiveRun {
                id,
                playlist,
                cursor: PlaybackCursor {
                    segment_index: 0,
                    elapsed_in_segment: Duration::ZERO,
                    paused,
                },
                audible_since: None,
                signal: signal_tx,
            });
            (id, signal_rx)
        };

        tokio::spawn(playback_loop(Arc::clone(&self.inner), run_id, signal));
        true
    }

    /// Re-derives the kind that fits the current moment and crossfades to it if
    /// something else is audible. With a playlist loaded that is the planned
    /// segment; without one it is the progress-keyed default schedule. Returns
    /// the kind switched to, if any.
    pub async fn update_if_needed(&self) -> Option<NoiseKind> {
        self.inner.update_if_needed().await
    }

    /// Runs [`update_if_needed`](Self::update_if_needed) in the background. A
    /// pause, stop or discard issued meanwhile cancels it, render included.
    pub fn request_update(&self) {
        self.inner.spawn_update();
    }

    /// Ends playback for the current phase: discards the playlist and cursor and
    /// stops audio, with a fade when `use_fade_out`.
    pub async fn discard(&self, use_fade_out: bool) {
        self.inner.discard(use_fade_out).await;
    }

    pub async fn cursor(&self) -> Option<PlaybackCursor> {
        let runs = self.inner.runs.lock().await;
        let now = Instant::now();
        runs.active.as_ref().map(|run| run.live_cursor(now))
    }

    pub async fn playlist(&self) -> Option<Playlist> {
        let runs = self.inner.runs.lock().await;
        runs.active.as_ref().map(|run| run.playlist.clone())
    }

    pub async fn is_active(&self) -> bool {
        self.inner.runs.lock().await.active.is_some()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl SchedulerInner {
    async fn on_state_changed(self: &Arc<Self>, from: Phase, to: Phase) {
        match to {
            Phase::WorkPaused => self.suspend().await,
            Phase::WorkRunning if from == Phase::WorkPaused => self.resume().await,
            Phase::Stopped => self.discard(false).await,
            _ => {}
        }
    }

    async fn resync(self: &Arc<Self>) {
        match self.timer.phase().await {
            Phase::Stopped => self.discard(false).await,
            Phase::WorkPaused => self.suspend().await,
            Phase::WorkRunning => self.resume().await,
            Phase::ShortBreak | Phase::LongBreak => {}
        }
    }

    /// Pause: silence immediately, bank the segment's audible time.
    async fn suspend(&self) {
        let mut runs = self.runs.lock().await;
        if let Some(run) = runs.active.as_mut() {
            if !run.cursor.paused {
                let now = Instant::now();
                run.cursor.elapsed_in_segment = run.live_elapsed(now);
                run.audible_since = None;
                run.cursor.paused = true;
                run.signal.send_replace(RunSignal::Pause);
                log_info!(
                    "run {} paused at segment {} +{:.1}s",
                    run.id,
                    run.cursor.segment_index,
                    run.cursor.elapsed_in_segment.as_secs_f64()
                );
            }
        }
        self.cancel_updates();
        self.audio.stop(false).await;
    }

    async fn resume(self: &Arc<Self>) {
        let resumed = {
            let mut runs = self.runs.lock().await;
            match runs.active.as_mut() {
                Some(run) => {
                    if run.cursor.paused {
                        run.cursor.paused = false;
                        run.signal.send_replace(RunSignal::Play);
                        log_info!("run {} resumed", run.id);
                    }
                    true
                }
                None => false,
            }
        };
        if !resumed && self.options.adaptive_when_idle {
            self.spawn_update();
        }
    }

    async fn discard(&self, use_fade_out: bool) {
        let mut runs = self.runs.lock().await;
        if let Some(run) = runs.active.take() {
            log_info!("playlist run {} discarded", run.id);
            run.signal.send_replace(RunSignal::Abort);
        }
        self.cancel_updates();
        // Under the run lock so a loop cannot start a stream after this.
        self.audio.stop(use_fade_out).await;
    }

    fn spawn_update(self: &Arc<Self>) {
        let token = self
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => log_debug!("soundscape update cancelled"),
                _ = inner.update_if_needed() => {}
            }
        });
    }

    fn cancel_updates(&self) {
        let mut updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        updates.cancel();
        *updates = self.shutdown.child_token();
    }

    async fn update_if_needed(&self) -> Option<NoiseKind> {
        let snapshot = self.timer.snapshot().await;
        if snapshot.phase != Phase::WorkRunning {
            return None;
        }
        if self.audio.status().await == StreamStatus::Generating {
            return None;
        }

        let (target, seconds) = {
            let runs = self.runs.lock().await;
            match runs.active.as_ref() {
                Some(run) if run.cursor.paused => return None,
                Some(run) => {
                    let segment = run.playlist.segments.get(run.cursor.segment_index)?;
                    let left = run
                        .segment_duration()
                        .saturating_sub(run.live_elapsed(Instant::now()));
                    (segment.noise_kind, ceil_secs(left))
                }
                None => (
                    proportional_kind(snapshot.progress(), self.options.default_kinds),
                    ceil_secs(Duration::from_millis(snapshot.remaining_ms)),
                ),
            }
        };
        if seconds == 0 {
            return None;
        }

        match self.audio.current_kind().await {
            Some(kind) if kind == target => None,
            Some(kind) => {
                log_info!("soundscape drifted from plan: {kind} -> {target}");
                self.audio.crossfade_to(target, seconds).await;
                Some(target)
            }
            None => {
                self.audio.play(target, seconds, true).await;
                Some(target)
            }
        }
    }

    async fn next_step(&self, run_id: u64) -> Option<Step> {
        let mut runs = self.runs.lock().await;
        let run = runs.current_mut(run_id)?;
        loop {
            let Some(segment) = run.playlist.segments.get(run.cursor.segment_index) else {
                return Some(Step::Finished);
            };
            let duration = Duration::from_secs(u64::from(segment.duration_seconds));
            let left = duration.saturating_sub(run.cursor.elapsed_in_segment);
            if left.is_zero() {
                run.advance();
                continue;
            }
            return Some(Step::Segment {
                index: run.cursor.segment_index,
                kind: segment.noise_kind,
                left,
                fresh: run.cursor.elapsed_in_segment.is_zero(),
                tail: self.tail_after(&run.playlist, run.cursor.segment_index),
                reason: segment.reason.clone(),
            });
        }
    }

    fn tail_after(&self, playlist: &Playlist, index: usize) -> u32 {
        if index + 1 < playlist.len() {
            whole_secs(self.audio.config().crossfade_window)
        } else {
            0
        }
    }

    /// Starts rendering the segment after `index` in the background.
    async fn prefetch_after(&self, run_id: u64, index: usize) -> Option<Prefetch> {
        let (kind, seconds, tail) = {
            let mut runs = self.runs.lock().await;
            let run = runs.current_mut(run_id)?;
            let next = run.playlist.segments.get(index + 1)?;
            (
                next.noise_kind,
                next.duration_seconds,
                self.tail_after(&run.playlist, index + 1),
            )
        };
        log_debug!("run {run_id}: prerendering segment {} ({kind})", index + 1);
        let audio = Arc::clone(&self.audio);
        Some(Prefetch {
            index: index + 1,
            task: tokio::spawn(async move { audio.prerender(kind, seconds, tail).await }),
        })
    }

    /// Starts a prerendered segment and its clock, unless the run was paused,
    /// stopped or replaced while it waited.
    async fn start_prefetched(&self, run_id: u64, segment: RenderedSegment) -> bool {
        let mut runs = self.runs.lock().await;
        match runs.current_mut(run_id) {
            Some(run) if *run.signal.borrow() == RunSignal::Play => {
                self.audio.start_rendered(segment).await;
                run.audible_since = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Starts the segment clock unless a signal arrived while the stream started.
    async fn mark_audible(&self, run_id: u64) -> bool {
        let mut runs = self.runs.lock().await;
        match runs.current_mut(run_id) {
            Some(run) if *run.signal.borrow() == RunSignal::Play => {
                run.audible_since = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Time left in the current segment, advancing the cursor when it is up.
    async fn time_left(&self, run_id: u64) -> Option<Duration> {
        let mut runs = self.runs.lock().await;
        let run = runs.current_mut(run_id)?;
        let left = run
            .segment_duration()
            .saturating_sub(run.live_elapsed(Instant::now()));
        if left.is_zero() {
            run.advance();
        }
        Some(left)
    }

    async fn finish(&self, run_id: u64) {
        let mut runs = self.runs.lock().await;
        if runs.current_mut(run_id).is_none() {
            return;
        }
        runs.active = None;
        log_info!("playlist run {run_id} finished");
        self.audio.stop(true).await;
    }

    fn announce(&self, index: usize, kind: NoiseKind, reason: &str) {
        log_info!("segment {index}: {kind} ({reason})");
        if let Some(notifier) = &self.options.notifier {
            let message = if reason.is_empty() {
                kind.label().to_string()
            } else {
                format!("{}: {reason}", kind.label())
            };
            notifier.notify("Now playing", &message, Some("segment"));
        }
    }
}

fn spawn_listener(
    inner: Weak<SchedulerInner>,
    mut events: broadcast::Receiver<TimerEvent>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(inner) = inner.upgrade() else { break };
            match event {
                Ok(TimerEvent::StateChanged { from, to, .. }) => {
                    inner.on_state_changed(from, to).await
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log_warn!("scheduler missed {missed} timer events, resyncing");
                    inner.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        log_debug!("scheduler listener stopped");
    });
}

async fn playback_loop(
    inner: Arc<SchedulerInner>,
    run_id: u64,
    mut signal: watch::Receiver<RunSignal>,
) {
    let mut prefetch: Option<Prefetch> = None;
    loop {
        let current = *signal.borrow_and_update();
        if current.is_final() {
            break;
        }
        if current == RunSignal::Pause {
            if signal.changed().await.is_err() {
                break;
            }
            continue;
        }

        let (index, kind, left, fresh, tail, reason) = match inner.next_step(run_id).await {
            None => break,
            Some(Step::Finished) => {
                inner.finish(run_id).await;
                break;
            }
            Some(Step::Segment {
                index,
                kind,
                left,
                fresh,
                tail,
                reason,
            }) => (index, kind, left, fresh, tail, reason),
        };

        // A resumed segment is rendered again for its remaining time; only a
        // fresh one can use the prerendered file.
        if prefetch.as_ref().is_some_and(|next| next.index < index) {
            prefetch = None;
        }
        let ready = match prefetch.as_mut() {
            Some(next) if fresh && next.index == index => {
                let rendered = tokio::select! {
                    biased;
                    _ = signal.changed() => continue,
                    rendered = &mut next.task => rendered,
                };
                prefetch = None;
                match rendered {
                    Ok(Some(segment)) => Some(segment),
                    Ok(None) => None,
                    Err(err) => {
                        log_warn!("run {run_id}: prerender of segment {index} failed: {err}");
                        None
                    }
                }
            }
            _ => None,
        };

        let started = match ready {
            Some(segment) => {
                let started = inner.start_prefetched(run_id, segment).await;
                if started {
                    inner.announce(index, kind, &reason);
                }
                started
            }
            None => {
                let seconds = ceil_secs(left).saturating_add(tail);
                let audible = inner.audio.current_kind().await.is_some();
                let start = async {
                    if audible {
                        inner.audio.crossfade_to(kind, seconds).await;
                    } else {
                        inner.audio.play(kind, seconds, true).await;
                    }
                };
                // A pause or stop while the stream renders abandons the start;
                // the sender of the signal has already stopped audio.
                let interrupted = tokio::select! {
                    biased;
                    _ = signal.changed() => true,
                    _ = start => false,
                };
                if interrupted {
                    continue;
                }
                if fresh {
                    inner.announce(index, kind, &reason);
                }
                inner.mark_audible(run_id).await
            }
        };
        if !started {
            continue;
        }
        if prefetch.as_ref().map_or(true, |next| next.index != index + 1) {
            prefetch = inner.prefetch_after(run_id, index).await;
        }

        let outcome = loop {
            let Some(left) = inner.time_left(run_id).await else {
                break WaitOutcome::Gone;
            };
            if left.is_zero() {
                break WaitOutcome::SegmentDone;
            }
            let nap = left.min(inner.options.poll_interval);
            tokio::select! {
                biased;
                changed = signal.changed() => {
                    if changed.is_err() {
                        break WaitOutcome::Gone;
                    }
                    break WaitOutcome::Interrupted;
                }
                _ = tokio::time::sleep(nap) => {}
            }
        };

        match outcome {
            WaitOutcome::SegmentDone => {
                log_debug!("run {run_id}: segment {index} done");
            }
            WaitOutcome::Interrupted => {}
            WaitOutcome::Gone => break,
        }
    }
    log_debug!("run {run_id}: playback loop exited");
}

fn ceil_secs(duration: Duration) -> u32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

fn whole_secs(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}
