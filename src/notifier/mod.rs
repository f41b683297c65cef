//! Background alarm bridge.
//!
//! The foreground posts one-way messages; a worker task owns the single
//! pending alarm and raises a system notification when it fires, even while
//! the foreground timer is not ticking.

mod message;
mod sink;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use message::{
    Notification, NotificationAction, NotifierMessage, BREAK_VIBRATION, DEEP_LINK,
    FOCUS_VIBRATION,
};
pub use sink::{
    DeniedNotificationSink, LogNotificationSink, NotificationSink, RecordingNotificationSink,
};
pub use worker::MAX_DELAY_MS;

use crate::clock::SharedClock;
use crate::error::NotifyError;

/// Foreground handle. Cheap to clone; a disconnected bridge drops every
/// message, which is how hosts without background execution behave.
#[derive(Clone, Default)]
pub struct NotifierBridge {
    tx: Option<UnboundedSender<NotifierMessage>>,
}

impl NotifierBridge {
    pub fn spawn(clock: SharedClock, sink: Arc<dyn NotificationSink>) -> (Self, NotifierWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(worker::notifier_loop(
            rx,
            clock,
            sink,
            cancel_token.clone(),
        ));
        (
            Self { tx: Some(tx) },
            NotifierWorker {
                handle: Some(handle),
                cancel_token,
            },
        )
    }

    /// Bridge whose messages land in the returned receiver instead of a worker.
    pub fn channel() -> (Self, UnboundedReceiver<NotifierMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn arm_timer(&self, label: &str, end_time_epoch_ms: i64) {
        self.post(NotifierMessage::TimerStarted {
            label: label.to_string(),
            end_time_epoch_ms,
        });
    }

    pub fn arm_break(&self, is_long_break: bool, end_time_epoch_ms: i64) {
        self.post(NotifierMessage::BreakStarted {
            is_long_break,
            end_time_epoch_ms,
        });
    }

    pub fn disarm(&self) {
        self.post(NotifierMessage::TimerStopped);
    }

    fn post(&self, message: NotifierMessage) {
        match self.try_post(message) {
            Ok(()) => {}
            // Hosts without background execution never had a worker.
            Err(err) if self.tx.is_none() => debug!("{err}"),
            Err(err) => warn!("{err}"),
        }
    }

    fn try_post(&self, message: NotifierMessage) -> Result<(), NotifyError> {
        let Some(tx) = &self.tx else {
            return Err(NotifyError::SchedulingUnavailable(format!(
                "no background worker; dropping {message:?}"
            )));
        };
        tx.send(message).map_err(|err| {
            NotifyError::SchedulingUnavailable(format!("worker gone; dropping {:?}", err.0))
        })
    }
}

pub struct NotifierWorker {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl NotifierWorker {
    /// Resolves when the worker exits on its own. A panic surfaces as an error.
    pub async fn wait(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => {
                let joined = handle.await;
                self.handle = None;
                joined.context("notifier worker task failed")
            }
            None => std::future::pending().await,
        }
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("notifier worker task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
