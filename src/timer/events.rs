use serde::Serialize;

use super::state::Phase;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub phase: Phase,
    pub remaining_ms: u64,
    pub phase_total_ms: u64,
    pub completed_work_sessions: u32,
}

impl TimerSnapshot {
    pub fn remaining_secs(&self) -> u64 {
        self.remaining_ms / 1_000
    }

    /// Fraction of the current phase already elapsed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.phase_total_ms == 0 {
            return 0.0;
        }
        let elapsed = self.phase_total_ms.saturating_sub(self.remaining_ms);
        (elapsed as f64 / self.phase_total_ms as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimerEvent {
    Tick {
        snapshot: TimerSnapshot,
    },
    StateChanged {
        from: Phase,
        to: Phase,
        snapshot: TimerSnapshot,
    },
    PhaseComplete {
        phase: Phase,
        completed_work_sessions: u32,
    },
}
