use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::Mutex;

use super::{
    backend::{AudioBackend, PlayerProcess},
    render::RenderJob,
    transient::TransientAudio,
    NoiseKind,
};
use crate::settings::AudioSettings;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamStatus {
    Idle,
    Generating,
    Playing,
    FadingOut,
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Length of the baked fade-in/fade-out and of a fading stop.
    pub fade_window: Duration,
    /// Overlap between outgoing and incoming streams.
    pub crossfade_window: Duration,
    pub min_bytes_per_second: u64,
    /// Extra time after a stream's nominal end before it is reaped.
    pub cleanup_grace: Duration,
    pub sample_rate: u32,
    pub channels: u16,
    pub work_dir: PathBuf,
}

impl AudioConfig {
    pub fn from_settings(settings: &AudioSettings, work_dir: PathBuf) -> Self {
        Self {
            fade_window: settings.fade_window(),
            crossfade_window: settings.crossfade_window(),
            min_bytes_per_second: settings.min_bytes_per_second,
            cleanup_grace: settings.cleanup_grace(),
            sample_rate: settings.sample_rate.max(1),
            channels: settings.channels.clamp(1, 2),
            work_dir,
        }
    }

    pub fn default_work_dir() -> PathBuf {
        std::env::temp_dir().join("focustide-audio")
    }
}

struct ActiveStream {
    id: u64,
    kind: NoiseKind,
    player: Box<dyn PlayerProcess>,
    // Declared after `player` so the file outlives the process on drop.
    audio: TransientAudio,
}

impl ActiveStream {
    async fn terminate(mut self) {
        if let Err(err) = self.player.start_kill() {
            log_warn!("stream {} ({}): {err:#}", self.id, self.kind);
        }
        if let Err(err) = self.player.wait().await {
            log_warn!("stream {} ({}): {err:#}", self.id, self.kind);
        }
        log_debug!(
            "stream {} ({}) terminated, removing {}",
            self.id,
            self.kind,
            self.audio.path().display()
        );
    }
}

/// A validated render that has not been started yet. Dropping it deletes the
/// file.
pub struct RenderedSegment {
    kind: NoiseKind,
    duration_secs: u32,
    audio: TransientAudio,
}

impl RenderedSegment {
    pub fn kind(&self) -> NoiseKind {
        self.kind
    }

    /// Length of the rendered file, overlap tail included.
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }
}

struct StreamState {
    status: StreamStatus,
    current: Option<ActiveStream>,
    /// Streams past their foreground life, awaiting termination after the
    /// crossfade or fade-out window.
    outgoing: Vec<ActiveStream>,
    /// Kind being rendered right now, if any.
    pending: Option<NoiseKind>,
    /// Bumped by every play/crossfade/stop; renders finishing under an older
    /// generation are discarded.
    generation: u64,
    next_stream_id: u64,
}

impl StreamState {
    fn settle_status(&mut self) {
        self.status = if self.pending.is_some() {
            StreamStatus::Generating
        } else if self.current.is_some() {
            StreamStatus::Playing
        } else if !self.outgoing.is_empty() {
            StreamStatus::FadingOut
        } else {
            StreamStatus::Idle
        };
    }

    fn take_outgoing(&mut self, id: u64) -> Option<ActiveStream> {
        let position = self.outgoing.iter().position(|stream| stream.id == id)?;
        Some(self.outgoing.remove(position))
    }
}

/// Owns "one audible noise stream" and its transitions.
///
/// At most one stream is in the foreground. A second one exists only inside a
/// crossfade or fade-out window, after which the predecessor is killed. All
/// bookkeeping sits behind a single lock so stop orders and render completions
/// cannot interleave inconsistently.
pub struct AudioProcessController {
    backend: Arc<dyn AudioBackend>,
    config: AudioConfig,
    state: Arc<Mutex<StreamState>>,
}

impl AudioProcessController {
    pub fn new(backend: Arc<dyn AudioBackend>, config: AudioConfig) -> Self {
        Self {
            backend,
            config,
            state: Arc::new(Mutex::new(StreamState {
                status: StreamStatus::Idle,
                current: None,
                outgoing: Vec::new(),
                pending: None,
                generation: 0,
                next_stream_id: 1,
            })),
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub async fn status(&self) -> StreamStatus {
        self.state.lock().await.status
    }

    /// Kind of the foreground stream, if one is audible.
    pub async fn current_kind(&self) -> Option<NoiseKind> {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map(|stream| stream.kind)
    }

    /// Foreground plus overlapping streams whose player is still alive.
    pub async fn live_stream_count(&self) -> usize {
        let mut state = self.state.lock().await;
        let StreamState {
            current, outgoing, ..
        } = &mut *state;
        current
            .iter_mut()
            .chain(outgoing.iter_mut())
            .map(|stream| !stream.player.has_exited())
            .filter(|alive| *alive)
            .count()
    }

    /// Starts `kind` for `duration_secs`. A no-op when that kind is already
    /// audible or being rendered; a crossfade when another kind is.
    pub async fn play(&self, kind: NoiseKind, duration_secs: u32, use_fade: bool) {
        let generation = {
            let mut state = self.state.lock().await;
            let busy_kind = state.pending.or(state.current.as_ref().map(|s| s.kind));
            match busy_kind {
                Some(busy) if busy == kind => {
                    log_debug!("{kind} already playing, ignoring play request");
                    return;
                }
                Some(_) => None,
                None => Some(self.begin_render(&mut state, kind)),
            }
        };

        let Some(generation) = generation else {
            self.crossfade_to(kind, duration_secs).await;
            return;
        };

        let fade = self.fade_secs_for(duration_secs, use_fade);
        let Some(audio) = self.generate(kind, duration_secs, fade, fade).await else {
            self.abandon_render(generation).await;
            return;
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            log_info!("{kind} render superseded before playback, discarding");
            return;
        }
        state.pending = None;
        self.bring_to_front(&mut state, kind, audio, duration_secs);
        state.settle_status();
    }

    /// Renders `kind` with a fade-in, starts it on top of the outgoing stream and
    /// kills the outgoing one after the crossfade window.
    pub async fn crossfade_to(&self, kind: NoiseKind, duration_secs: u32) {
        let generation = {
            let mut state = self.state.lock().await;
            self.begin_render(&mut state, kind)
        };

        let crossfade = whole_secs(self.config.crossfade_window);
        let fade_out = self.fade_secs_for(duration_secs, true);
        let fade_in = if duration_secs > crossfade + fade_out {
            crossfade
        } else {
            0
        };
        let Some(audio) = self.generate(kind, duration_secs, fade_in, fade_out).await else {
            self.abandon_render(generation).await;
            return;
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            log_info!("{kind} crossfade superseded before playback, discarding");
            return;
        }
        state.pending = None;
        self.bring_to_front(&mut state, kind, audio, duration_secs);
        state.settle_status();
    }

    /// Renders `duration_secs + tail_secs` of `kind` ahead of time without
    /// touching the foreground stream. The first `tail_secs` past the nominal
    /// end carry the fade-out, so the file keeps sounding while a successor
    /// fades in over it.
    pub async fn prerender(
        &self,
        kind: NoiseKind,
        duration_secs: u32,
        tail_secs: u32,
    ) -> Option<RenderedSegment> {
        let total = duration_secs.saturating_add(tail_secs);
        let crossfade = whole_secs(self.config.crossfade_window);
        let fade_out = if tail_secs > 0 {
            tail_secs.min(total / 2)
        } else {
            self.fade_secs_for(total, true)
        };
        let fade_in = if total > crossfade + fade_out {
            crossfade
        } else {
            0
        };
        let audio = self.generate(kind, total, fade_in, fade_out).await?;
        Some(RenderedSegment {
            kind,
            duration_secs: total,
            audio,
        })
    }

    /// Starts a prerendered segment on top of whatever is audible; the
    /// previous foreground stream is killed after the crossfade window. Any
    /// render still in flight is superseded.
    pub async fn start_rendered(&self, segment: RenderedSegment) -> bool {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.pending = None;
        let RenderedSegment {
            kind,
            duration_secs,
            audio,
        } = segment;
        let started = self.bring_to_front(&mut state, kind, audio, duration_secs);
        state.settle_status();
        started
    }

    /// Ends the foreground stream. With `use_fade_out` the process is killed one
    /// fade window later; otherwise every stream, overlapping ones included, is
    /// killed and reaped before this returns. Safe to call when idle.
    pub async fn stop(&self, use_fade_out: bool) {
        let doomed = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.pending = None;

            let current = state.current.take();
            let doomed: Vec<ActiveStream> = if use_fade_out {
                if let Some(stream) = current {
                    log_info!("fading out {}", stream.kind);
                    let id = stream.id;
                    state.outgoing.push(stream);
                    self.schedule_retirement(id, self.config.fade_window);
                }
                Vec::new()
            } else {
                current
                    .into_iter()
                    .chain(state.outgoing.drain(..))
                    .collect()
            };
            state.settle_status();
            doomed
        };

        if !doomed.is_empty() {
            log_info!("stopping {} stream(s)", doomed.len());
        }
        for stream in doomed {
            stream.terminate().await;
        }
    }

    fn begin_render(&self, state: &mut StreamState, kind: NoiseKind) -> u64 {
        state.generation += 1;
        state.pending = Some(kind);
        state.settle_status();
        state.generation
    }

    async fn abandon_render(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.pending = None;
            state.settle_status();
        }
    }

    fn fade_secs_for(&self, duration_secs: u32, use_fade: bool) -> u32 {
        let fade = whole_secs(self.config.fade_window);
        if use_fade && fade > 0 && duration_secs > fade * 2 {
            fade
        } else {
            0
        }
    }

    /// Renders into a transient file and validates it. Failures are logged and
    /// yield `None`; the transient file is removed either way.
    async fn generate(
        &self,
        kind: NoiseKind,
        duration_secs: u32,
        fade_in_secs: u32,
        fade_out_secs: u32,
    ) -> Option<TransientAudio> {
        if duration_secs == 0 {
            log_warn!("refusing to render zero-length {kind}");
            return None;
        }
        let audio = match TransientAudio::new_in(&self.config.work_dir, kind) {
            Ok(audio) => audio,
            Err(err) => {
                log_error!("cannot prepare {kind} segment: {err:#}");
                return None;
            }
        };

        let job = RenderJob {
            kind,
            duration_secs,
            fade_in_secs,
            fade_out_secs,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            output: audio.path().to_path_buf(),
        };

        if let Err(err) = self.backend.render(&job).await {
            log_warn!("skipping {kind} segment ({duration_secs}s): {err:#}");
            return None;
        }

        let size = audio.size_bytes();
        let minimum = job.min_expected_bytes(self.config.min_bytes_per_second);
        if size < minimum {
            log_warn!(
                "skipping {kind} segment: rendered {size} bytes, expected at least {minimum}"
            );
            return None;
        }

        match hound::WavReader::open(audio.path()) {
            Ok(reader) => {
                let rate = u64::from(reader.spec().sample_rate.max(1));
                let rendered_secs = u64::from(reader.duration()) / rate;
                if rendered_secs * 2 < u64::from(duration_secs) {
                    log_warn!(
                        "skipping {kind} segment: rendered {rendered_secs}s of {duration_secs}s"
                    );
                    return None;
                }
            }
            Err(err) => {
                log_warn!("skipping {kind} segment: undecodable output: {err}");
                return None;
            }
        }

        Some(audio)
    }

    fn start_stream(
        &self,
        state: &mut StreamState,
        kind: NoiseKind,
        audio: TransientAudio,
    ) -> Option<ActiveStream> {
        match self.backend.spawn_player(audio.path()) {
            Ok(player) => {
                let id = state.next_stream_id;
                state.next_stream_id += 1;
                log_info!("stream {id}: playing {kind} (pid {:?})", player.pid());
                Some(ActiveStream {
                    id,
                    kind,
                    player,
                    audio,
                })
            }
            Err(err) => {
                log_warn!("skipping {kind} segment: {err:#}");
                None
            }
        }
    }

    /// Makes `audio` the foreground stream. A previous foreground stream moves
    /// to the overlap list and is retired after the crossfade window.
    fn bring_to_front(
        &self,
        state: &mut StreamState,
        kind: NoiseKind,
        audio: TransientAudio,
        duration_secs: u32,
    ) -> bool {
        let Some(stream) = self.start_stream(state, kind, audio) else {
            return false;
        };
        let id = stream.id;
        if let Some(previous) = state.current.replace(stream) {
            log_info!(
                "crossfading {} -> {} over {}s",
                previous.kind,
                kind,
                whole_secs(self.config.crossfade_window)
            );
            let previous_id = previous.id;
            state.outgoing.push(previous);
            self.schedule_retirement(previous_id, self.config.crossfade_window);
        }
        self.schedule_completion(id, duration_secs);
        true
    }

    /// Reaps the stream once its audio would have finished.
    fn schedule_completion(&self, id: u64, duration_secs: u32) {
        let state = Arc::clone(&self.state);
        let after = Duration::from_secs(u64::from(duration_secs)) + self.config.cleanup_grace;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let finished = {
                let mut state = state.lock().await;
                let is_current = state.current.as_ref().map_or(false, |s| s.id == id);
                let finished = if is_current {
                    state.current.take()
                } else {
                    state.take_outgoing(id)
                };
                state.settle_status();
                finished
            };
            if let Some(stream) = finished {
                log_debug!("stream {id} reached its end");
                stream.terminate().await;
            }
        });
    }

    /// Kills an overlapping stream after `window`, unless something already did.
    fn schedule_retirement(&self, id: u64, window: Duration) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let retired = {
                let mut state = state.lock().await;
                let retired = state.take_outgoing(id);
                state.settle_status();
                retired
            };
            if let Some(stream) = retired {
                stream.terminate().await;
            }
        });
    }
}

fn whole_secs(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}
