use std::sync::Mutex;

use log::info;

use super::message::Notification;
use crate::error::NotifyError;

/// Platform notification surface. Permission may be missing; implementations
/// report that as [`NotifyError::Unavailable`].
pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn show(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            "[notification:{}] {} - {} ({})",
            notification.tag, notification.title, notification.body, notification.deep_link
        );
        Ok(())
    }
}

/// Notification permission was never granted.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeniedNotificationSink;

impl NotificationSink for DeniedNotificationSink {
    fn show(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable("permission not granted".into()))
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn show(&self, notification: Notification) -> Result<(), NotifyError> {
        if let Ok(mut guard) = self.shown.lock() {
            guard.push(notification);
        }
        Ok(())
    }
}
