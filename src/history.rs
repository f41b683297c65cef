//! Read-only views over the session history and today's counters. Nothing
//! here mutates its input.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::models::{FocusSession, PomodoroCycleData};

/// Length of the classic pomodoro, used when counting them in history.
pub const POMODORO_MINUTES: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGroup {
    pub label: String,
    pub duration_minutes: u32,
    pub count: usize,
    pub last_completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    pub date: NaiveDate,
    pub sessions: usize,
    pub total_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekStats {
    pub sessions: usize,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelStats {
    pub label: String,
    pub count: usize,
    pub total_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_sessions: usize,
    pub total_minutes: u32,
    pub hours: u32,
    pub minutes: u32,
    pub pomodoros: usize,
}

fn local_day<Tz: TimeZone>(at: &DateTime<Utc>, tz: &Tz) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

/// Sessions sharing a label and duration, most recently used first. Feeds
/// the "start again" list.
pub fn group_sessions(sessions: &[FocusSession]) -> Vec<SessionGroup> {
    let mut groups: Vec<SessionGroup> = Vec::new();
    let mut index: HashMap<(&str, u32), usize> = HashMap::new();

    for session in sessions {
        let key = (session.label.as_str(), session.duration_minutes);
        match index.get(&key) {
            Some(&at) => {
                let group = &mut groups[at];
                group.count += 1;
                if session.completed_at > group.last_completed_at {
                    group.last_completed_at = session.completed_at;
                }
            }
            None => {
                index.insert(key, groups.len());
                groups.push(SessionGroup {
                    label: session.label.clone(),
                    duration_minutes: session.duration_minutes,
                    count: 1,
                    last_completed_at: session.completed_at,
                });
            }
        }
    }

    groups.sort_by(|a, b| b.last_completed_at.cmp(&a.last_completed_at));
    groups
}

/// Consecutive local days with at least one session, counting back from
/// `today`. A day without sessions ends the streak; no session today means 0.
pub fn current_streak<Tz: TimeZone>(
    sessions: &[FocusSession],
    today: NaiveDate,
    tz: &Tz,
) -> u32 {
    let days: BTreeSet<NaiveDate> = sessions
        .iter()
        .map(|session| local_day(&session.completed_at, tz))
        .collect();

    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}

/// Per-day totals for the `days` days ending at `today`, oldest first.
pub fn daily_stats<Tz: TimeZone>(
    sessions: &[FocusSession],
    today: NaiveDate,
    days: u32,
    tz: &Tz,
) -> Vec<DayStats> {
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(u64::from(back))))
        .map(|date| {
            let on_day = sessions
                .iter()
                .filter(|session| local_day(&session.completed_at, tz) == date);
            let (count, minutes) = on_day.fold((0, 0), |(count, minutes), session| {
                (count + 1, minutes + session.duration_minutes)
            });
            DayStats {
                date,
                sessions: count,
                total_minutes: minutes,
            }
        })
        .collect()
}

/// Totals since local midnight of the most recent Sunday.
pub fn week_stats<Tz: TimeZone>(
    sessions: &[FocusSession],
    now: DateTime<Utc>,
    tz: &Tz,
) -> WeekStats {
    let today = local_day(&now, tz);
    let back = u64::from(today.weekday().num_days_from_sunday());
    let Some(week_start) = today.checked_sub_days(Days::new(back)) else {
        return WeekStats::default();
    };

    sessions
        .iter()
        .filter(|session| local_day(&session.completed_at, tz) >= week_start)
        .fold(WeekStats::default(), |acc, session| WeekStats {
            sessions: acc.sessions + 1,
            minutes: acc.minutes + session.duration_minutes,
        })
}

/// Most used labels by session count. Ties keep history order.
pub fn top_labels(sessions: &[FocusSession], limit: usize) -> Vec<LabelStats> {
    let mut labels: Vec<LabelStats> = Vec::new();
    for session in sessions {
        match labels.iter_mut().find(|entry| entry.label == session.label) {
            Some(entry) => {
                entry.count += 1;
                entry.total_minutes += session.duration_minutes;
            }
            None => labels.push(LabelStats {
                label: session.label.clone(),
                count: 1,
                total_minutes: session.duration_minutes,
            }),
        }
    }
    labels.sort_by(|a, b| b.count.cmp(&a.count));
    labels.truncate(limit);
    labels
}

pub fn overall_stats(sessions: &[FocusSession]) -> OverallStats {
    let total_minutes: u32 = sessions.iter().map(|s| s.duration_minutes).sum();
    OverallStats {
        total_sessions: sessions.len(),
        total_minutes,
        hours: total_minutes / 60,
        minutes: total_minutes % 60,
        pomodoros: sessions
            .iter()
            .filter(|s| s.duration_minutes == POMODORO_MINUTES)
            .count(),
    }
}

/// Pomodoros finished today; counters stored for another day read as 0.
pub fn today_count(cycle: Option<&PomodoroCycleData>, today: NaiveDate) -> u32 {
    cycle
        .filter(|data| !data.is_stale(today))
        .map_or(0, |data| data.daily_count)
}

/// `MM:SS`; minutes keep counting past 59.
pub fn format_time(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
