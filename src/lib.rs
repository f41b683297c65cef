pub mod alert;
pub mod clock;
pub mod error;
pub mod history;
pub mod indicator;
pub mod models;
pub mod notifier;
pub mod recovery;
pub mod settings;
pub mod store;
pub mod timer;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};

use alert::SharedAlerter;
use clock::{SharedClock, SystemClock};
use indicator::{FloatingIndicator, IndicatorController, WatchMode};
use notifier::{LogNotificationSink, NotifierBridge};
use settings::{SettingsStore, TimerSettings};
use store::Store;
use timer::{TimerController, TimerEvent};

pub fn run() -> Result<()> {
    let debug_mode = settings::debug_mode();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    log::info!("ClarityHub starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(debug_mode))
}

async fn serve(debug_mode: bool) -> Result<()> {
    let data_dir = settings::data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let timer_settings = settings_store.timer().apply_debug_overrides(debug_mode);

    let store = Store::open(
        data_dir.join("clarityhub.sqlite3"),
        timer_settings.store_options(),
    )?;
    let clock: SharedClock = Arc::new(SystemClock);
    let (bridge, mut notifier) =
        NotifierBridge::spawn(clock.clone(), Arc::new(LogNotificationSink));

    let engine = TimerController::new(
        store.clone(),
        clock,
        bridge.clone(),
        default_alerter(&timer_settings),
        &timer_settings,
    );
    let restored = engine.restore().await;
    info!(
        "Restored timer: {:?} ({})",
        restored.status, restored.display
    );

    // No primary timer view in the headless host; the indicator stays on.
    let (_primary_view, primary_view_rx) = watch::channel(false);
    let watch_mode = WatchMode::from_settings(&timer_settings);
    let mut indicator = IndicatorController::new();
    let mut views = indicator.start(
        FloatingIndicator::new(engine.completion().clone(), primary_view_rx.clone()),
        watch_mode,
    )?;
    let mut events = engine.subscribe();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("Failed to listen for Ctrl-C: {err}");
                }
                info!("Shutting down");
                break;
            }
            result = notifier.wait() => {
                if let Err(err) = result {
                    recovery::recover(&store, &bridge, &err).await;
                    engine.restore().await;
                }
                warn!("Notifier worker stopped; background alarms unavailable");
            }
            result = indicator.wait() => {
                if let Err(err) = result {
                    recovery::recover(&store, &bridge, &err).await;
                    engine.restore().await;
                }
                views = indicator.start(
                    FloatingIndicator::new(engine.completion().clone(), primary_view_rx.clone()),
                    watch_mode,
                )?;
            }
            failure = engine.ticker_failed() => {
                recovery::recover(&store, &bridge, &failure).await;
                engine.restore().await;
            }
            changed = views.changed() => {
                if changed.is_ok() {
                    debug!("Indicator: {:?}", *views.borrow());
                }
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {skipped} timer events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    indicator.stop().await?;
    notifier.shutdown().await?;
    Ok(())
}

fn log_event(event: &TimerEvent) {
    match event {
        TimerEvent::FocusCompleted {
            session,
            next_break,
            handled_elsewhere,
        } => info!(
            "Focus completed{}: {:?}, next break {:?}",
            if *handled_elsewhere { " elsewhere" } else { "" },
            session.as_ref().map(|s| s.label.as_str()),
            next_break
        ),
        TimerEvent::BreakCompleted { is_long_break, .. } => {
            info!("Break completed (long: {is_long_break})")
        }
        TimerEvent::StateChanged(snapshot) => {
            debug!("Timer {:?} {}", snapshot.status, snapshot.display)
        }
        TimerEvent::Tick { .. } => {}
    }
}

#[cfg(feature = "audio")]
fn default_alerter(settings: &TimerSettings) -> SharedAlerter {
    if settings.alert_sound {
        Arc::new(alert::AudioAlerter::new())
    } else {
        Arc::new(alert::LogAlerter)
    }
}

#[cfg(not(feature = "audio"))]
fn default_alerter(_settings: &TimerSettings) -> SharedAlerter {
    Arc::new(alert::LogAlerter)
}
