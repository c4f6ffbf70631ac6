use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::settings::TimerSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Stopped,
    WorkRunning,
    WorkPaused,
    ShortBreak,
    LongBreak,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Stopped
    }
}

impl Phase {
    pub fn is_work(self) -> bool {
        matches!(self, Phase::WorkRunning | Phase::WorkPaused)
    }

    pub fn is_break(self) -> bool {
        matches!(self, Phase::ShortBreak | Phase::LongBreak)
    }

    /// True when the phase clock is counting down.
    pub fn is_running(self) -> bool {
        matches!(self, Phase::WorkRunning | Phase::ShortBreak | Phase::LongBreak)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Stopped => write!(f, "Stopped"),
            Phase::WorkRunning => write!(f, "WorkRunning"),
            Phase::WorkPaused => write!(f, "WorkPaused"),
            Phase::ShortBreak => write!(f, "ShortBreak"),
            Phase::LongBreak => write!(f, "LongBreak"),
        }
    }
}

/// Which representation of "time left" is authoritative. Running phases derive it
/// from `end_time`, a paused phase stores it, a stopped session has neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseClock {
    Stopped,
    Running { end_time: Instant },
    Paused { remaining: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub work: Duration,
    pub short_break: Duration,
    pub long_break: Duration,
    pub long_break_every: u32,
}

impl From<&TimerSettings> for PhaseDurations {
    fn from(settings: &TimerSettings) -> Self {
        let settings = settings.clamped();
        Self {
            work: minutes(settings.work_minutes),
            short_break: minutes(settings.short_break_minutes),
            long_break: minutes(settings.long_break_minutes),
            long_break_every: settings.long_break_every,
        }
    }
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self::from(&TimerSettings::default())
    }
}

fn minutes(value: u32) -> Duration {
    Duration::from_secs(u64::from(value) * 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is counting down (stopped or paused).
    Idle,
    Ticked { remaining: Duration },
    PhaseComplete { completed: Phase, transition: Transition },
}

/// Session clock and phase tracker.
///
/// Every operation takes the current instant explicitly and returns `None` when
/// called from a phase that does not allow it. Invalid calls are silent no-ops
/// rather than errors; callers never inspect the result to decide what to do.
#[derive(Debug, Clone)]
pub struct TimerState {
    phase: Phase,
    clock: PhaseClock,
    durations: PhaseDurations,
    completed_work_sessions: u32,
    /// Full length of the current phase, for progress calculations.
    phase_total: Duration,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(PhaseDurations::default())
    }
}

impl TimerState {
    pub fn new(durations: PhaseDurations) -> Self {
        Self {
            phase: Phase::Stopped,
            clock: PhaseClock::Stopped,
            durations,
            completed_work_sessions: 0,
            phase_total: durations.work,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn durations(&self) -> PhaseDurations {
        self.durations
    }

    pub fn completed_work_sessions(&self) -> u32 {
        self.completed_work_sessions
    }

    pub fn phase_total(&self) -> Duration {
        self.phase_total
    }

    pub fn end_time(&self) -> Option<Instant> {
        match self.clock {
            PhaseClock::Running { end_time } => Some(end_time),
            _ => None,
        }
    }

    /// Never negative: a running clock past its end reads as zero.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.clock {
            PhaseClock::Stopped => self.durations.work,
            PhaseClock::Running { end_time } => end_time.saturating_duration_since(now),
            PhaseClock::Paused { remaining } => remaining,
        }
    }

    /// New durations apply from the next phase on, or right away when stopped.
    pub fn set_durations(&mut self, durations: PhaseDurations) {
        self.durations = durations;
        if self.phase == Phase::Stopped {
            self.phase_total = durations.work;
        }
    }

    pub fn start(&mut self, now: Instant) -> Option<Transition> {
        if self.phase != Phase::Stopped {
            return None;
        }
        Some(self.enter(Phase::WorkRunning, now))
    }

    pub fn pause(&mut self, now: Instant) -> Option<Transition> {
        let PhaseClock::Running { end_time } = self.clock else {
            return None;
        };
        if self.phase != Phase::WorkRunning {
            return None;
        }
        self.clock = PhaseClock::Paused {
            remaining: end_time.saturating_duration_since(now),
        };
        Some(self.set_phase(Phase::WorkPaused))
    }

    pub fn resume(&mut self, now: Instant) -> Option<Transition> {
        let PhaseClock::Paused { remaining } = self.clock else {
            return None;
        };
        self.clock = PhaseClock::Running {
            end_time: now + remaining,
        };
        Some(self.set_phase(Phase::WorkRunning))
    }

    pub fn toggle(&mut self, now: Instant) -> Option<Transition> {
        match self.phase {
            Phase::WorkRunning => self.pause(now),
            Phase::WorkPaused => self.resume(now),
            _ => None,
        }
    }

    pub fn skip(&mut self, now: Instant) -> Option<Transition> {
        let next = match self.phase {
            Phase::Stopped => return None,
            Phase::WorkRunning | Phase::WorkPaused => {
                self.completed_work_sessions = self.completed_work_sessions.saturating_add(1);
                if self.completed_work_sessions % self.durations.long_break_every.max(1) == 0 {
                    Phase::LongBreak
                } else {
                    Phase::ShortBreak
                }
            }
            Phase::ShortBreak | Phase::LongBreak => Phase::WorkRunning,
        };
        Some(self.enter(next, now))
    }

    /// Valid from every phase, including `Stopped`.
    pub fn stop(&mut self) -> Transition {
        self.clock = PhaseClock::Stopped;
        self.completed_work_sessions = 0;
        self.phase_total = self.durations.work;
        self.set_phase(Phase::Stopped)
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if !self.phase.is_running() {
            return TickOutcome::Idle;
        }
        let remaining = self.remaining(now);
        if !remaining.is_zero() {
            return TickOutcome::Ticked { remaining };
        }
        let completed = self.phase;
        match self.skip(now) {
            Some(transition) => TickOutcome::PhaseComplete {
                completed,
                transition,
            },
            None => TickOutcome::Idle,
        }
    }

    fn enter(&mut self, phase: Phase, now: Instant) -> Transition {
        let length = self.length_of(phase);
        self.phase_total = length;
        self.clock = PhaseClock::Running {
            end_time: now + length,
        };
        self.set_phase(phase)
    }

    fn length_of(&self, phase: Phase) -> Duration {
        match phase {
            Phase::ShortBreak => self.durations.short_break,
            Phase::LongBreak => self.durations.long_break,
            _ => self.durations.work,
        }
    }

    fn set_phase(&mut self, phase: Phase) -> Transition {
        let transition = Transition {
            from: self.phase,
            to: phase,
        };
        self.phase = phase;
        transition
    }
}
