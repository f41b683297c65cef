use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::timer::BreakKind;

pub const POMODOROS_PER_CYCLE: u8 = 4;

/// Today's Pomodoro counters (`pomodoro-data`).
///
/// `cycle_count` is the position inside the current 4-pomodoro cycle and
/// always equals `daily_count % 4` for the stored day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroCycleData {
    pub date: NaiveDate,
    pub cycle_count: u8,
    pub daily_count: u32,
}

impl PomodoroCycleData {
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            date: today,
            cycle_count: 0,
            daily_count: 0,
        }
    }

    /// Counters as they apply to `today`. A different stored day resets both
    /// counters in the same value, never one without the other.
    pub fn for_day(&self, today: NaiveDate) -> Self {
        if self.date == today {
            self.normalized()
        } else {
            Self::fresh(today)
        }
    }

    pub fn is_stale(&self, today: NaiveDate) -> bool {
        self.date != today
    }

    /// Re-derives `cycle_count` from `daily_count` if an older write left them
    /// out of step.
    pub fn normalized(&self) -> Self {
        Self {
            date: self.date,
            cycle_count: (self.daily_count % u32::from(POMODOROS_PER_CYCLE)) as u8,
            daily_count: self.daily_count,
        }
    }

    /// Counts one finished pomodoro and returns the break it earns: every
    /// fourth completion of the day earns the long break.
    pub fn record_completion(&mut self, today: NaiveDate) -> BreakKind {
        *self = self.for_day(today);
        self.cycle_count = (self.cycle_count + 1) % POMODOROS_PER_CYCLE;
        self.daily_count += 1;
        BreakKind::from_long(self.cycle_count == 0 && self.daily_count > 0)
    }
}
