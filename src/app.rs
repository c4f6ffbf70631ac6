use std::{
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
    time::Duration,
};

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    advisory::{fetch_or_default, AdvisoryClient, AdvisoryContext, HttpAdvisoryClient, PlanOrigin},
    audio::{AudioBackend, AudioConfig, AudioProcessController, ExternalBackend},
    notify::{self, NotificationSink},
    playlist::{PlaybackCursor, Playlist, PlaylistScheduler, SchedulerOptions},
    settings::{SettingsStore, SoundscapeMode, TimerSettings, UserSettings},
    timer::{
        commands::apply_timer_command, parse_command, Phase, PhaseDurations, TimerCommand,
        TimerController, TimerEvent, TimerSnapshot,
    },
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Everything the app is assembled from. Tests swap the backend, advisory
/// client and notifier for fakes.
pub struct AppParts {
    pub settings: UserSettings,
    pub backend: Arc<dyn AudioBackend>,
    pub advisory: Option<Arc<dyn AdvisoryClient>>,
    pub notifier: Option<Arc<dyn NotificationSink>>,
    /// Where changed phase lengths are saved; `None` keeps them in memory.
    pub store: Option<Arc<SettingsStore>>,
    pub work_dir: PathBuf,
    pub tick_interval: Duration,
}

impl AppParts {
    /// Real processes, the configured advisory endpoint and notifier.
    pub fn from_settings(settings: UserSettings) -> Result<Self> {
        let backend: Arc<dyn AudioBackend> = Arc::new(ExternalBackend::from_settings(&settings.audio)?);
        let advisory = HttpAdvisoryClient::from_settings(&settings.advisory)
            .map(|client| Arc::new(client) as Arc<dyn AdvisoryClient>);
        let notifier = notify::from_settings(&settings.notifications);
        Ok(Self {
            settings,
            backend,
            advisory,
            notifier,
            store: None,
            work_dir: AudioConfig::default_work_dir(),
            tick_interval: crate::timer::controller::DEFAULT_TICK_INTERVAL,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanSource {
    /// Ask the advisory service (or fall back to the default plan).
    Fresh,
    /// Reuse the session's last plan; advisory is not re-queried.
    Replay,
}

/// Owns the session's collaborators and reacts to timer phase changes by
/// requesting, replaying and discarding playlists.
pub struct App {
    settings: UserSettings,
    timer: TimerController,
    audio: Arc<AudioProcessController>,
    scheduler: PlaylistScheduler,
    advisory: Option<Arc<dyn AdvisoryClient>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    store: Option<Arc<SettingsStore>>,
    timer_settings: StdMutex<TimerSettings>,
    last_plan: Mutex<Option<Playlist>>,
    plan_request: StdMutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl App {
    /// Wires the parts together and starts the phase listener. Must be called
    /// inside a tokio runtime.
    pub fn assemble(parts: AppParts) -> Arc<Self> {
        let AppParts {
            settings,
            backend,
            advisory,
            notifier,
            store,
            work_dir,
            tick_interval,
        } = parts;

        let timer = TimerController::with_tick_interval(
            PhaseDurations::from(&settings.timer),
            tick_interval,
        );
        let audio = Arc::new(AudioProcessController::new(
            backend,
            AudioConfig::from_settings(&settings.audio, work_dir),
        ));
        let scheduler = PlaylistScheduler::new(
            Arc::clone(&audio),
            timer.clone(),
            SchedulerOptions {
                default_kinds: settings.audio.default_kinds,
                poll_interval: settings.audio.segment_poll_interval(),
                notifier: notifier.clone(),
                adaptive_when_idle: settings.audio.mode == SoundscapeMode::Adaptive,
            },
        );

        let events = timer.subscribe();
        let app = Arc::new(Self {
            timer_settings: StdMutex::new(settings.timer.clone()),
            settings,
            timer,
            audio,
            scheduler,
            advisory,
            notifier,
            store,
            last_plan: Mutex::new(None),
            plan_request: StdMutex::new(None),
            shutdown: CancellationToken::new(),
        });
        spawn_phase_listener(Arc::downgrade(&app), events, app.shutdown.clone());
        log_info!(
            "focustide ready: {:?} mode, advisory {}",
            app.settings.audio.mode,
            if app.advisory.is_some() { "enabled" } else { "disabled" }
        );
        app
    }

    pub fn timer(&self) -> &TimerController {
        &self.timer
    }

    pub fn audio(&self) -> &Arc<AudioProcessController> {
        &self.audio
    }

    pub fn scheduler(&self) -> &PlaylistScheduler {
        &self.scheduler
    }

    pub async fn last_plan(&self) -> Option<Playlist> {
        self.last_plan.lock().await.clone()
    }

    /// Runs one interactive command. Returns `false` once the app should exit.
    pub async fn handle_command(self: &Arc<Self>, command: TimerCommand) -> bool {
        match command {
            TimerCommand::Quit => return false,
            TimerCommand::Refresh => self.refresh().await,
            TimerCommand::Status => {
                let snapshot = self.timer.snapshot().await;
                println!("{}", self.status_line(&snapshot).await);
            }
            TimerCommand::Durations {
                work_minutes,
                short_break_minutes,
                long_break_minutes,
            } => {
                let updated = self
                    .set_durations(work_minutes, short_break_minutes, long_break_minutes)
                    .await;
                println!(
                    "durations: work {}m, short break {}m, long break {}m",
                    updated.work_minutes, updated.short_break_minutes, updated.long_break_minutes
                );
            }
            other => {
                if let Some(snapshot) = apply_timer_command(&self.timer, other).await {
                    log_debug!("{other:?} -> {}", snapshot.phase);
                }
            }
        }
        true
    }

    /// Changes phase lengths, clamped to the configured bounds. They apply from
    /// the next phase on, or right away while stopped, and are saved when a
    /// settings store is attached.
    pub async fn set_durations(
        &self,
        work_minutes: u32,
        short_break_minutes: Option<u32>,
        long_break_minutes: Option<u32>,
    ) -> TimerSettings {
        let updated = {
            let mut current = self
                .timer_settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut requested = current.clone();
            requested.work_minutes = work_minutes;
            if let Some(minutes) = short_break_minutes {
                requested.short_break_minutes = minutes;
            }
            if let Some(minutes) = long_break_minutes {
                requested.long_break_minutes = minutes;
            }
            let updated = match &self.store {
                Some(store) => store.update_timer(requested.clone()).unwrap_or_else(|err| {
                    log_warn!("phase lengths not saved: {err:#}");
                    requested.clamped()
                }),
                None => requested.clamped(),
            };
            *current = updated.clone();
            updated
        };
        self.timer
            .set_durations(PhaseDurations::from(&updated))
            .await;
        updated
    }

    /// Asks for a new plan mid-phase; it supersedes the active one.
    pub async fn refresh(self: &Arc<Self>) {
        let phase = self.timer.phase().await;
        if !phase.is_work() {
            println!("nothing to refresh outside a work phase");
            return;
        }
        self.request_plan(PlanSource::Fresh);
    }

    /// Reads commands from stdin until `quit`, end of input or Ctrl-C, printing a
    /// status line every few ticks, then shuts down.
    pub async fn run_interactive(self: &Arc<Self>) -> Result<()> {
        let debug_mode = std::env::var("FOCUSTIDE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let status_every_ticks: u64 = if debug_mode { 1 } else { 10 };

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut events = self.timer.subscribe();
        let mut ticks: u64 = 0;

        println!(
            "commands: start | pause | resume | toggle | skip | stop | status | refresh \
             | durations <work> [short] [long] | quit"
        );

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        log_info!("input closed");
                        break;
                    };
                    match parse_command(&line) {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => println!("unknown command '{}'", line.trim()),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    log_info!("interrupted");
                    break;
                }
                event = events.recv() => match event {
                    Ok(TimerEvent::Tick { snapshot }) => {
                        ticks += 1;
                        if ticks % status_every_ticks == 0 {
                            println!("{}", self.status_line(&snapshot).await);
                        }
                    }
                    Ok(TimerEvent::StateChanged { snapshot, .. }) => {
                        ticks = 0;
                        println!("{}", self.status_line(&snapshot).await);
                    }
                    Ok(TimerEvent::PhaseComplete { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops the session and waits for every audio process to be gone.
    pub async fn shutdown(&self) {
        self.cancel_plan_request();
        self.timer.stop().await;
        *self.last_plan.lock().await = None;
        // The scheduler also reacts to the stop event; this covers a lagged listener.
        self.scheduler.discard(false).await;

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let mut live = self.audio.live_stream_count().await;
        while live > 0 && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL).await;
            live = self.audio.live_stream_count().await;
        }
        if live > 0 {
            log_warn!("{live} audio processes still alive at shutdown");
        }

        self.scheduler.shutdown();
        self.timer.shutdown();
        self.shutdown.cancel();
        log_info!("focustide stopped");
    }

    async fn status_line(&self, snapshot: &TimerSnapshot) -> String {
        let cursor = self.scheduler.cursor().await;
        let playlist = self.scheduler.playlist().await;
        let kind = self.audio.current_kind().await;
        format_status(snapshot, cursor.as_ref(), playlist.as_ref(), kind.map(|k| k.label()))
    }

    async fn on_transition(self: &Arc<Self>, from: Phase, to: Phase) {
        match (from, to) {
            (Phase::Stopped, Phase::WorkRunning) => {
                self.notify("Focus session started", "Work phase running", None);
                *self.last_plan.lock().await = None;
                self.request_plan(PlanSource::Fresh);
            }
            (from, Phase::WorkRunning) if from.is_break() => {
                self.request_plan(PlanSource::Replay);
            }
            (_, to) if to.is_break() => {
                self.cancel_plan_request();
                self.scheduler.discard(true).await;
            }
            (from, Phase::Stopped) if from != Phase::Stopped => {
                self.cancel_plan_request();
                *self.last_plan.lock().await = None;
                self.notify("Focus session stopped", "Timer reset", None);
            }
            // Pause and resume are handled by the scheduler itself.
            _ => {}
        }
    }

    fn on_phase_complete(&self, phase: Phase, completed_work_sessions: u32) {
        if phase.is_work() {
            let message = format!("{completed_work_sessions} work sessions done, time for a break");
            self.notify("Work phase complete", &message, Some("complete"));
        } else {
            self.notify("Break over", "Back to focus", Some("complete"));
        }
    }

    fn request_plan(self: &Arc<Self>, source: PlanSource) {
        let app = Arc::clone(self);
        let handle = tokio::spawn(async move { app.load_plan(source).await });
        let previous = self
            .plan_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_plan_request(&self) {
        let pending = self
            .plan_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            pending.abort();
        }
    }

    async fn load_plan(&self, source: PlanSource) {
        if self.settings.audio.mode == SoundscapeMode::Adaptive {
            self.scheduler.request_update();
            return;
        }

        let cached = match source {
            PlanSource::Replay => self.last_plan.lock().await.clone(),
            PlanSource::Fresh => None,
        };
        let playlist = match cached {
            Some(playlist) => {
                log_info!("replaying previous plan ({} segments)", playlist.len());
                playlist
            }
            None => {
                let snapshot = self.timer.snapshot().await;
                let context = AdvisoryContext::from_snapshot(&snapshot, None);
                let (playlist, origin) = fetch_or_default(
                    self.advisory.as_deref(),
                    &context,
                    self.settings.advisory.timeout(),
                    self.settings.audio.default_kinds,
                )
                .await;
                if origin == PlanOrigin::Default {
                    log_info!("playing default plan");
                }
                *self.last_plan.lock().await = Some(playlist.clone());
                playlist
            }
        };

        if !self.scheduler.load_and_play(playlist).await {
            log_warn!("plan was not loaded");
        }
    }

    fn notify(&self, title: &str, message: &str, sound_hint: Option<&str>) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(title, message, sound_hint);
        }
    }
}

fn spawn_phase_listener(
    app: Weak<App>,
    mut events: broadcast::Receiver<TimerEvent>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticks_since_update: u64 = 0;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(app) = app.upgrade() else { break };
            match event {
                Ok(TimerEvent::StateChanged { from, to, .. }) => {
                    if to == Phase::WorkRunning {
                        ticks_since_update = 0;
                    }
                    app.on_transition(from, to).await;
                }
                Ok(TimerEvent::PhaseComplete {
                    phase,
                    completed_work_sessions,
                }) => app.on_phase_complete(phase, completed_work_sessions),
                Ok(TimerEvent::Tick { snapshot }) => {
                    if app.settings.audio.mode != SoundscapeMode::Adaptive
                        || snapshot.phase != Phase::WorkRunning
                    {
                        continue;
                    }
                    ticks_since_update += 1;
                    if ticks_since_update >= app.settings.audio.adaptive_update_secs.max(1) {
                        ticks_since_update = 0;
                        app.scheduler.request_update();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log_warn!("phase listener missed {missed} timer events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn format_clock(ms: u64) -> String {
    let secs = (ms + 999) / 1_000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// One-line session summary printed by the interactive loop.
pub fn format_status(
    snapshot: &TimerSnapshot,
    cursor: Option<&PlaybackCursor>,
    playlist: Option<&Playlist>,
    playing: Option<&str>,
) -> String {
    let mut line = format!(
        "[{}] {} left | {} done",
        snapshot.phase,
        format_clock(snapshot.remaining_ms),
        snapshot.completed_work_sessions
    );
    if let (Some(cursor), Some(playlist)) = (cursor, playlist) {
        line.push_str(&format!(
            " | segment {}/{} +{}s{}",
            cursor.segment_index + 1,
            playlist.len(),
            cursor.elapsed_in_segment.as_secs(),
            if cursor.paused { " (paused)" } else { "" }
        ));
    }
    if let Some(playing) = playing {
        line.push_str(&format!(" | {playing}"));
    }
    line
}
