use serde::Serialize;

use crate::history::format_time;
use crate::models::{
    BreakTimerState, Countdown, FocusSession, PendingBreak, PomodoroCycleData, TimerState,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    BreakPending,
    BreakRunning,
}

/// Where the engine is in the focus/break cycle, carrying the record that
/// backs the phase.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum TimerPhase {
    #[default]
    Idle,
    Focus(TimerState),
    BreakPending(PendingBreak),
    Break(BreakTimerState),
}

impl TimerPhase {
    pub fn status(&self) -> TimerStatus {
        match self {
            TimerPhase::Idle => TimerStatus::Idle,
            TimerPhase::Focus(timer) if timer.is_paused => TimerStatus::Paused,
            TimerPhase::Focus(_) => TimerStatus::Running,
            TimerPhase::BreakPending(_) => TimerStatus::BreakPending,
            TimerPhase::Break(_) => TimerStatus::BreakRunning,
        }
    }

    pub fn remaining_secs(&self, now_ms: i64) -> u64 {
        match self {
            TimerPhase::Idle => 0,
            TimerPhase::Focus(timer) => timer.remaining_secs(now_ms),
            TimerPhase::BreakPending(pending) => u64::from(pending.duration_minutes) * 60,
            TimerPhase::Break(timer) => timer.remaining_secs(now_ms),
        }
    }

    /// True while a countdown should be ticking.
    pub fn is_counting_down(&self) -> bool {
        match self {
            TimerPhase::Focus(timer) => timer.is_counting_down(),
            TimerPhase::Break(timer) => timer.is_counting_down(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    #[serde(flatten)]
    pub phase: TimerPhase,
    pub remaining_seconds: u64,
    pub display: String,
    pub cycle: PomodoroCycleData,
}

impl TimerSnapshot {
    pub fn capture(phase: &TimerPhase, cycle: &PomodoroCycleData, now_ms: i64) -> Self {
        let remaining_seconds = phase.remaining_secs(now_ms);
        Self {
            status: phase.status(),
            phase: phase.clone(),
            remaining_seconds,
            display: format_time(remaining_seconds),
            cycle: cycle.clone(),
        }
    }
}

/// Published on every engine transition.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TimerEvent {
    StateChanged(TimerSnapshot),
    Tick {
        remaining_seconds: u64,
    },
    FocusCompleted {
        session: Option<FocusSession>,
        next_break: Option<PendingBreak>,
        handled_elsewhere: bool,
    },
    BreakCompleted {
        is_long_break: bool,
        handled_elsewhere: bool,
    },
}
