use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::message::{Notification, NotifierMessage};
use super::sink::NotificationSink;
use crate::clock::SharedClock;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Delays at or beyond this are not scheduled at all.
pub const MAX_DELAY_MS: i64 = 2_147_483_647;

/// Owns at most one pending alarm. Every incoming message supersedes it; a
/// fire whose generation is no longer current is dropped.
pub(super) async fn notifier_loop(
    mut rx: UnboundedReceiver<NotifierMessage>,
    clock: SharedClock,
    sink: Arc<dyn NotificationSink>,
    cancel_token: CancellationToken,
) {
    let generation = Arc::new(AtomicU64::new(0));
    let mut pending: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    log_info!("notifier channel closed");
                    break;
                };
                handle_message(message, &clock, &sink, &generation, &mut pending);
            }
            _ = cancel_token.cancelled() => {
                log_info!("notifier loop shutting down");
                break;
            }
        }
    }

    if let Some(token) = pending.take() {
        token.cancel();
    }
}

fn handle_message(
    message: NotifierMessage,
    clock: &SharedClock,
    sink: &Arc<dyn NotificationSink>,
    generation: &Arc<AtomicU64>,
    pending: &mut Option<CancellationToken>,
) {
    let seq = generation.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(token) = pending.take() {
        token.cancel();
    }

    let (end_time_epoch_ms, notification) = match message {
        NotifierMessage::TimerStopped => {
            log_info!("alarm disarmed (#{seq})");
            return;
        }
        NotifierMessage::TimerStarted {
            label,
            end_time_epoch_ms,
        } => (end_time_epoch_ms, Notification::focus_complete(&label)),
        NotifierMessage::BreakStarted {
            is_long_break,
            end_time_epoch_ms,
        } => (end_time_epoch_ms, Notification::break_complete(is_long_break)),
    };

    let delay_ms = end_time_epoch_ms.saturating_sub(clock.now_ms());
    if delay_ms >= MAX_DELAY_MS {
        log_warn!("alarm #{seq} is {delay_ms}ms out; not scheduling");
        return;
    }
    if delay_ms <= 0 {
        deliver(sink.as_ref(), notification);
        return;
    }

    let token = CancellationToken::new();
    *pending = Some(token.clone());
    let generation = Arc::clone(generation);
    let sink = Arc::clone(sink);
    log_info!("alarm #{seq} armed for {delay_ms}ms");

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {
                if generation.load(Ordering::SeqCst) == seq {
                    deliver(sink.as_ref(), notification);
                } else {
                    log_info!("dropping stale alarm #{seq}");
                }
            }
            _ = token.cancelled() => {}
        }
    });
}

fn deliver(sink: &dyn NotificationSink, notification: Notification) {
    let tag = notification.tag.clone();
    if let Err(err) = sink.show(notification) {
        log_error!("failed to show notification {tag}: {err}");
    }
}
