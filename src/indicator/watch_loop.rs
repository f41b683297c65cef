use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{FloatingIndicator, IndicatorView, WatchMode};
use crate::store::{keys, StoreChange};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub(super) async fn indicator_loop(
    mut indicator: FloatingIndicator,
    mode: WatchMode,
    views: watch::Sender<IndicatorView>,
    cancel_token: CancellationToken,
) {
    let (period, mut changes) = match mode {
        WatchMode::Poll(interval) => (interval, None),
        WatchMode::Subscribe { fallback } => (fallback, Some(indicator.store().subscribe())),
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log_info!("indicator loop started ({mode:?})");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            open = next_timer_change(&mut changes) => {
                if !open {
                    log_warn!("store change feed closed; falling back to polling");
                    changes = None;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("indicator loop shutting down");
                break;
            }
        }

        let view = indicator.poll().await;
        views.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                log::debug!("indicator view: {view:?}");
                *current = view;
                true
            }
        });
    }
}

/// Waits for a write to one of the timer keys. Returns false once the feed is
/// gone; never resolves without a feed.
async fn next_timer_change(changes: &mut Option<broadcast::Receiver<StoreChange>>) -> bool {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(change) if keys::TIMER_KEYS.contains(&change.key.as_str()) => return true,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => return true,
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}
