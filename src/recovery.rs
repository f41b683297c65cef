//! Last-resort reset after an unexpected failure. Only in-flight timer state
//! is cleared; history, counters, todos and expenses survive.

use log::{error, warn};

use crate::error::StoreError;
use crate::notifier::NotifierBridge;
use crate::store::{keys, Store};

pub async fn reset_timer_state(store: &Store, bridge: &NotifierBridge) -> Result<(), StoreError> {
    bridge.disarm();
    store.remove_many(&keys::TIMER_KEYS).await?;
    warn!("Timer state reset after failure; {:?} cleared", keys::TIMER_KEYS);
    Ok(())
}

/// Logs `failure` and resets timer state. A reset that itself fails is
/// logged too.
pub async fn recover(store: &Store, bridge: &NotifierBridge, failure: &anyhow::Error) {
    error!("Service failed: {failure:#}");
    if let Err(err) = reset_timer_state(store, bridge).await {
        error!("Recovery reset failed: {err}");
    }
}
