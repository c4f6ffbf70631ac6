use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::{broadcast, Mutex},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    events::{TimerEvent, TimerSnapshot},
    state::{Phase, PhaseDurations, TickOutcome, TimerState, Transition},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

const EVENT_CAPACITY: usize = 256;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

struct TimerInner {
    state: Mutex<TimerState>,
    events: broadcast::Sender<TimerEvent>,
    shutdown: CancellationToken,
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Authoritative session clock. Cloning yields another handle onto the same
/// session; the ticker runs until [`TimerController::shutdown`] or until the last
/// handle is dropped.
#[derive(Clone)]
pub struct TimerController {
    inner: Arc<TimerInner>,
}

impl TimerController {
    /// Must be called inside a tokio runtime.
    pub fn new(durations: PhaseDurations) -> Self {
        Self::with_tick_interval(durations, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_tick_interval(durations: PhaseDurations, tick_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState::new(durations)),
            events,
            shutdown: CancellationToken::new(),
        });
        spawn_ticker(Arc::downgrade(&inner), inner.shutdown.clone(), tick_interval);
        Self { inner }
    }

    /// Receiver for every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.inner.events.subscribe()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let guard = self.inner.state.lock().await;
        snapshot_of(&guard, Instant::now())
    }

    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.phase()
    }

    pub async fn start(&self) -> TimerSnapshot {
        self.apply(|state, now| state.start(now)).await
    }

    pub async fn pause(&self) -> TimerSnapshot {
        self.apply(|state, now| state.pause(now)).await
    }

    pub async fn resume(&self) -> TimerSnapshot {
        self.apply(|state, now| state.resume(now)).await
    }

    pub async fn toggle(&self) -> TimerSnapshot {
        self.apply(|state, now| state.toggle(now)).await
    }

    pub async fn skip(&self) -> TimerSnapshot {
        self.apply(|state, now| state.skip(now)).await
    }

    /// Idempotent. A stop always emits `StateChanged` so late listeners can
    /// converge on `Stopped` even if they missed the first one.
    pub async fn stop(&self) -> TimerSnapshot {
        self.apply(|state, _| Some(state.stop())).await
    }

    pub async fn set_durations(&self, durations: PhaseDurations) -> TimerSnapshot {
        let now = Instant::now();
        let mut guard = self.inner.state.lock().await;
        guard.set_durations(durations);
        snapshot_of(&guard, now)
    }

    /// One clock step: completes the phase when its time is up, otherwise
    /// publishes a `Tick` for display refresh. Also driven by the internal ticker.
    pub async fn tick(&self) {
        tick_inner(&self.inner).await;
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn apply<F>(&self, op: F) -> TimerSnapshot
    where
        F: FnOnce(&mut TimerState, Instant) -> Option<Transition>,
    {
        let now = Instant::now();
        let mut guard = self.inner.state.lock().await;
        if let Some(transition) = op(&mut guard, now) {
            publish_transition(&self.inner.events, &guard, transition, now);
        }
        snapshot_of(&guard, now)
    }
}

fn spawn_ticker(inner: Weak<TimerInner>, shutdown: CancellationToken, tick_interval: Duration) {
    tokio::spawn(async move {
        let mut interval = time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of `interval` fires immediately; skip it.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    tick_inner(&inner).await;
                }
                _ = shutdown.cancelled() => {
                    log_debug!("timer ticker shutting down");
                    break;
                }
            }
        }
    });
}

async fn tick_inner(inner: &TimerInner) {
    let now = Instant::now();
    let mut guard = inner.state.lock().await;
    match guard.tick(now) {
        TickOutcome::Idle => {}
        TickOutcome::Ticked { .. } => {
            let _ = inner.events.send(TimerEvent::Tick {
                snapshot: snapshot_of(&guard, now),
            });
        }
        TickOutcome::PhaseComplete {
            completed,
            transition,
        } => {
            log_info!(
                "phase {} complete ({} work sessions done)",
                completed,
                guard.completed_work_sessions()
            );
            let _ = inner.events.send(TimerEvent::PhaseComplete {
                phase: completed,
                completed_work_sessions: guard.completed_work_sessions(),
            });
            publish_transition(&inner.events, &guard, transition, now);
        }
    }
}

fn publish_transition(
    events: &broadcast::Sender<TimerEvent>,
    state: &TimerState,
    transition: Transition,
    now: Instant,
) {
    log_info!("timer {} -> {}", transition.from, transition.to);
    let _ = events.send(TimerEvent::StateChanged {
        from: transition.from,
        to: transition.to,
        snapshot: snapshot_of(state, now),
    });
}

fn snapshot_of(state: &TimerState, now: Instant) -> TimerSnapshot {
    TimerSnapshot {
        phase: state.phase(),
        remaining_ms: state.remaining(now).as_millis() as u64,
        phase_total_ms: state.phase_total().as_millis() as u64,
        completed_work_sessions: state.completed_work_sessions(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn durations() -> PhaseDurations {
        PhaseDurations {
            work: Duration::from_secs(25 * 60),
            short_break: Duration::from_secs(5 * 60),
            long_break: Duration::from_secs(15 * 60),
            long_break_every: 4,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_resume_freezes_clock() {
        let timer = TimerController::new(durations());
        timer.start().await;
        time::advance(Duration::from_secs(90)).await;

        let paused = timer.pause().await;
        assert_eq!(paused.phase, Phase::WorkPaused);
        time::advance(Duration::from_secs(600)).await;

        let resumed = timer.resume().await;
        assert_eq!(resumed.phase, Phase::WorkRunning);
        assert_eq!(resumed.remaining_ms, paused.remaining_ms);
        assert_eq!(resumed.remaining_ms, (25 * 60 - 90) * 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_completes_work_phase() {
        let timer = TimerController::new(durations());
        let mut events = timer.subscribe();
        timer.start().await;

        time::sleep(Duration::from_secs(25 * 60) + Duration::from_millis(1_500)).await;

        let snapshot = timer.snapshot().await;
        assert_eq!(snapshot.phase, Phase::ShortBreak);
        assert_eq!(snapshot.completed_work_sessions, 1);

        let mut saw_complete = false;
        loop {
            match events.try_recv() {
                Ok(TimerEvent::PhaseComplete { phase, .. }) => {
                    assert_eq!(phase, Phase::WorkRunning);
                    saw_complete = true;
                }
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_tick_after_work_minutes_enters_short_break() {
        let timer = TimerController::new(durations());
        timer.shutdown();
        timer.start().await;
        time::advance(Duration::from_secs(25 * 60)).await;
        timer.tick().await;

        let snapshot = timer.snapshot().await;
        assert_eq!(snapshot.phase, Phase::ShortBreak);
        assert_eq!(snapshot.completed_work_sessions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_durations_wait_for_the_next_phase() {
        let timer = TimerController::new(durations());
        timer.start().await;

        let shorter = PhaseDurations {
            work: Duration::from_secs(10 * 60),
            short_break: Duration::from_secs(2 * 60),
            ..durations()
        };
        let running = timer.set_durations(shorter).await;
        assert_eq!(running.remaining_ms, 25 * 60 * 1_000);

        let on_break = timer.skip().await;
        assert_eq!(on_break.phase, Phase::ShortBreak);
        assert_eq!(on_break.remaining_ms, 2 * 60 * 1_000);

        let stopped = timer.stop().await;
        assert_eq!(stopped.remaining_ms, 10 * 60 * 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_operations_emit_nothing() {
        let timer = TimerController::new(durations());
        let mut events = timer.subscribe();
        timer.pause().await;
        timer.resume().await;
        timer.skip().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_wins_over_resume() {
        let timer = TimerController::new(durations());
        timer.start().await;
        timer.pause().await;
        timer.stop().await;
        timer.stop().await;
        let after = timer.resume().await;
        assert_eq!(after.phase, Phase::Stopped);
        assert_eq!(after.remaining_ms, 25 * 60 * 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_published_while_running_only() {
        let timer = TimerController::new(durations());
        let mut events = timer.subscribe();
        timer.start().await;
        let _ = events.recv().await; // StateChanged

        time::sleep(Duration::from_millis(1_100)).await;
        assert!(matches!(events.try_recv(), Ok(TimerEvent::Tick { .. })));

        timer.pause().await;
        let _ = events.recv().await; // StateChanged
        time::sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());
    }
}
