use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A finished focus timer. Never mutated after it is appended to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: i64,
    pub label: String,
    pub duration_minutes: u32,
    pub completed_at: DateTime<Utc>,
}

impl FocusSession {
    /// Builds the next record for a newest-first `history`. Ids are the
    /// completion timestamp in milliseconds, bumped past the newest id when two
    /// completions land in the same millisecond.
    pub fn next(
        history: &[FocusSession],
        label: &str,
        duration_minutes: u32,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let stamp = completed_at.timestamp_millis();
        let id = match history.first() {
            Some(newest) if newest.id >= stamp => newest.id + 1,
            _ => stamp,
        };

        Self {
            id,
            label: label.to_string(),
            duration_minutes,
            completed_at,
        }
    }
}
