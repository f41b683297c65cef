use serde::{Deserialize, Serialize};

/// Shared view over the two persisted countdown records. Remaining time is
/// always re-derived from the absolute deadline while the countdown runs.
pub trait Countdown {
    fn end_time_epoch_ms(&self) -> Option<i64>;

    /// Frozen value; authoritative only while no deadline is set.
    fn stored_time_left_seconds(&self) -> u64;

    fn is_counting_down(&self) -> bool;

    fn remaining_secs(&self, now_ms: i64) -> u64 {
        match (self.is_counting_down(), self.end_time_epoch_ms()) {
            (true, Some(end)) => floor_secs(end.saturating_sub(now_ms)),
            _ => self.stored_time_left_seconds(),
        }
    }

    fn has_expired(&self, now_ms: i64) -> bool {
        self.is_counting_down() && self.remaining_secs(now_ms) == 0
    }
}

fn floor_secs(delta_ms: i64) -> u64 {
    (delta_ms.max(0) / 1000) as u64
}

fn round_secs(delta_ms: i64) -> u64 {
    (delta_ms.max(0).saturating_add(500) / 1000) as u64
}

fn minutes_to_ms(minutes: u32) -> i64 {
    i64::from(minutes) * 60_000
}

/// Focus session in progress (`active-timer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub label: String,
    pub planned_duration_minutes: u32,
    pub time_left_seconds: u64,
    pub is_running: bool,
    pub is_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_epoch_ms: Option<i64>,
    pub started_at_epoch_ms: i64,
}

impl TimerState {
    pub fn begin(label: &str, minutes: u32, now_ms: i64) -> Self {
        Self {
            label: label.trim().to_string(),
            planned_duration_minutes: minutes,
            time_left_seconds: u64::from(minutes) * 60,
            is_running: true,
            is_paused: false,
            end_time_epoch_ms: Some(now_ms.saturating_add(minutes_to_ms(minutes))),
            started_at_epoch_ms: now_ms,
        }
    }

    /// Freezes the countdown. Rounds to the nearest second so a pause taken
    /// right on a boundary shows the value the user was looking at.
    pub fn pause(&mut self, now_ms: i64) {
        if let Some(end) = self.end_time_epoch_ms.take() {
            self.time_left_seconds = round_secs(end.saturating_sub(now_ms));
        }
        self.is_paused = true;
    }

    pub fn resume(&mut self, now_ms: i64) {
        let left_ms = i64::try_from(self.time_left_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.end_time_epoch_ms = Some(now_ms.saturating_add(left_ms));
        self.is_paused = false;
    }

    /// Records that break the model's invariants are read as absent. Pauses
    /// push the deadline past `started + planned`, so only the lower bound of
    /// the deadline is checked.
    pub fn is_consistent(&self) -> bool {
        !self.label.trim().is_empty()
            && self.planned_duration_minutes > 0
            && self.is_running
            && self.started_at_epoch_ms >= 0
            && self.time_left_seconds <= u64::from(self.planned_duration_minutes) * 60
            && match self.end_time_epoch_ms {
                Some(end) => !self.is_paused && end >= self.started_at_epoch_ms,
                None => self.is_paused,
            }
    }
}

impl Countdown for TimerState {
    fn end_time_epoch_ms(&self) -> Option<i64> {
        self.end_time_epoch_ms
    }

    fn stored_time_left_seconds(&self) -> u64 {
        self.time_left_seconds
    }

    fn is_counting_down(&self) -> bool {
        self.is_running && !self.is_paused && self.end_time_epoch_ms.is_some()
    }
}

/// Break countdown (`active-break-timer`). Breaks cannot be paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakTimerState {
    pub duration_minutes: u32,
    pub time_left_seconds: u64,
    pub is_running: bool,
    pub is_long_break: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_epoch_ms: Option<i64>,
    pub started_at_epoch_ms: i64,
}

impl BreakTimerState {
    pub fn begin(is_long_break: bool, minutes: u32, now_ms: i64) -> Self {
        Self {
            duration_minutes: minutes,
            time_left_seconds: u64::from(minutes) * 60,
            is_running: true,
            is_long_break,
            end_time_epoch_ms: Some(now_ms.saturating_add(minutes_to_ms(minutes))),
            started_at_epoch_ms: now_ms,
        }
    }

    /// Breaks never pause, so the deadline sits within one duration of the
    /// start.
    pub fn is_consistent(&self) -> bool {
        let latest_end = self
            .started_at_epoch_ms
            .saturating_add(minutes_to_ms(self.duration_minutes));
        self.duration_minutes > 0
            && self.is_running
            && self.started_at_epoch_ms >= 0
            && self.time_left_seconds <= u64::from(self.duration_minutes) * 60
            && self
                .end_time_epoch_ms
                .is_some_and(|end| (self.started_at_epoch_ms..=latest_end).contains(&end))
    }

    pub fn kind(&self) -> BreakKind {
        BreakKind::from_long(self.is_long_break)
    }
}

impl Countdown for BreakTimerState {
    fn end_time_epoch_ms(&self) -> Option<i64> {
        self.end_time_epoch_ms
    }

    fn stored_time_left_seconds(&self) -> u64 {
        self.time_left_seconds
    }

    fn is_counting_down(&self) -> bool {
        self.is_running && self.end_time_epoch_ms.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakKind {
    Short,
    Long,
}

impl BreakKind {
    pub fn from_long(is_long: bool) -> Self {
        if is_long {
            BreakKind::Long
        } else {
            BreakKind::Short
        }
    }

    pub fn is_long(self) -> bool {
        matches!(self, BreakKind::Long)
    }
}

/// "Start break now" hand-off (`start-break-timer`). Written by whichever
/// observer completed the focus timer so the next engine mount offers the
/// break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBreak {
    pub is_long_break: bool,
    pub duration_minutes: u32,
}

impl PendingBreak {
    pub fn kind(&self) -> BreakKind {
        BreakKind::from_long(self.is_long_break)
    }
}
