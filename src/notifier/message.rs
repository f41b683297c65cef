use serde::{Deserialize, Serialize};

/// Foreground → worker messages. One-way; the worker never replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum NotifierMessage {
    TimerStarted { label: String, end_time_epoch_ms: i64 },
    TimerStopped,
    BreakStarted { is_long_break: bool, end_time_epoch_ms: i64 },
}

pub const DEEP_LINK: &str = "/deep-work";
pub const FOCUS_VIBRATION: [u64; 5] = [200, 100, 200, 100, 200];
pub const BREAK_VIBRATION: [u64; 3] = [200, 100, 200];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// System notification raised by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub deep_link: String,
    pub vibrate: Vec<u64>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn focus_complete(label: &str) -> Self {
        Self {
            title: "Pomodoro complete".into(),
            body: format!("Done: {label}. Time for a break!"),
            tag: "clarityhub-timer".into(),
            deep_link: DEEP_LINK.into(),
            vibrate: FOCUS_VIBRATION.to_vec(),
            require_interaction: true,
            actions: vec![action("open", "Open app"), action("close", "Close")],
        }
    }

    pub fn break_complete(is_long_break: bool) -> Self {
        let body = if is_long_break {
            "Long break is over! Ready to focus again?"
        } else {
            "Time to get back to focus!"
        };
        Self {
            title: "Break over".into(),
            body: body.into(),
            tag: "clarityhub-break".into(),
            deep_link: DEEP_LINK.into(),
            vibrate: BREAK_VIBRATION.to_vec(),
            require_interaction: true,
            actions: vec![action("open", "Start focus"), action("close", "Later")],
        }
    }

    /// Where a click on the notification (or one of its actions) leads.
    pub fn click_target(&self, action: Option<&str>) -> Option<&str> {
        match action {
            Some("close") => None,
            _ => Some(self.deep_link.as_str()),
        }
    }
}

fn action(action: &str, title: &str) -> NotificationAction {
    NotificationAction {
        action: action.into(),
        title: title.into(),
    }
}
