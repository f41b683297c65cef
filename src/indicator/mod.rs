//! Floating countdown shown outside the primary timer view. It re-derives
//! everything from the store and completes timers nobody else is watching.

mod watch_loop;

use anyhow::{bail, Context, Result};
use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::history::format_time;
use crate::models::{BreakTimerState, Countdown, TimerState};
use crate::settings::{IndicatorWatch, TimerSettings};
use crate::store::{keys, Store};
use crate::timer::Completion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "view", rename_all = "camelCase")]
pub enum IndicatorView {
    #[default]
    Hidden,
    #[serde(rename_all = "camelCase")]
    Focus {
        label: String,
        remaining_seconds: u64,
        display: String,
        is_paused: bool,
    },
    #[serde(rename_all = "camelCase")]
    Break {
        is_long_break: bool,
        remaining_seconds: u64,
        display: String,
    },
}

pub struct FloatingIndicator {
    completion: Completion,
    primary_view: watch::Receiver<bool>,
    /// `startedAtEpochMs` of the instances this indicator already fired for.
    fired_focus: Option<i64>,
    fired_break: Option<i64>,
}

impl FloatingIndicator {
    /// `primary_view` is true while the full timer view is showing; the
    /// indicator stands down for that time.
    pub fn new(completion: Completion, primary_view: watch::Receiver<bool>) -> Self {
        Self {
            completion,
            primary_view,
            fired_focus: None,
            fired_break: None,
        }
    }

    pub fn store(&self) -> &Store {
        self.completion.store()
    }

    pub async fn poll(&mut self) -> IndicatorView {
        let standing_down = *self.primary_view.borrow();
        if standing_down {
            return IndicatorView::Hidden;
        }

        let now = self.completion.clock().now_ms();
        let store = self.completion.store();

        match store
            .get::<TimerState>(keys::ACTIVE_TIMER)
            .await
            .filter(TimerState::is_consistent)
        {
            Some(timer) if timer.has_expired(now) => {
                if self.fired_focus != Some(timer.started_at_epoch_ms) {
                    self.fired_focus = Some(timer.started_at_epoch_ms);
                    self.complete_focus().await;
                }
                return IndicatorView::Hidden;
            }
            Some(timer) => {
                let remaining_seconds = timer.remaining_secs(now);
                return IndicatorView::Focus {
                    label: timer.label,
                    remaining_seconds,
                    display: format_time(remaining_seconds),
                    is_paused: timer.is_paused,
                };
            }
            None => self.fired_focus = None,
        }

        match store
            .get::<BreakTimerState>(keys::ACTIVE_BREAK_TIMER)
            .await
            .filter(BreakTimerState::is_consistent)
        {
            Some(timer) if timer.has_expired(now) => {
                if self.fired_break != Some(timer.started_at_epoch_ms) {
                    self.fired_break = Some(timer.started_at_epoch_ms);
                    self.complete_break().await;
                }
                IndicatorView::Hidden
            }
            Some(timer) => {
                let remaining_seconds = timer.remaining_secs(now);
                IndicatorView::Break {
                    is_long_break: timer.is_long_break,
                    remaining_seconds,
                    display: format_time(remaining_seconds),
                }
            }
            None => {
                self.fired_break = None;
                IndicatorView::Hidden
            }
        }
    }

    async fn complete_focus(&self) {
        match self.completion.claim_expired_focus().await {
            Ok(Some(timer)) => {
                let outcome = self.completion.finish_focus(&timer, None).await;
                info!(
                    "Indicator completed focus '{}'; {} minute break pending",
                    timer.label, outcome.next_break.duration_minutes
                );
            }
            Ok(None) => debug!("Focus completion already claimed"),
            Err(err) => error!("Indicator failed to claim focus record: {err}"),
        }
    }

    async fn complete_break(&self) {
        match self.completion.claim_expired_break().await {
            Ok(Some(timer)) => {
                self.completion.finish_break(&timer).await;
                info!("Indicator completed break");
            }
            Ok(None) => debug!("Break completion already claimed"),
            Err(err) => error!("Indicator failed to claim break record: {err}"),
        }
    }
}

/// What wakes the indicator up. Both modes share one loop so they can be
/// swapped by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Poll(Duration),
    /// React to store changes, re-polling every `fallback` so the countdown
    /// keeps moving.
    Subscribe { fallback: Duration },
}

impl WatchMode {
    pub fn from_settings(settings: &TimerSettings) -> Self {
        match settings.indicator_watch {
            IndicatorWatch::Poll => WatchMode::Poll(settings.indicator_poll_interval()),
            IndicatorWatch::Subscribe => WatchMode::Subscribe {
                fallback: settings.tick_interval(),
            },
        }
    }
}

impl Default for WatchMode {
    fn default() -> Self {
        WatchMode::Poll(Duration::from_millis(500))
    }
}

pub struct IndicatorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl IndicatorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        indicator: FloatingIndicator,
        mode: WatchMode,
    ) -> Result<watch::Receiver<IndicatorView>> {
        if self.handle.is_some() {
            bail!("indicator already active");
        }

        let cancel_token = CancellationToken::new();
        let (views_tx, views_rx) = watch::channel(IndicatorView::Hidden);
        let handle = tokio::spawn(watch_loop::indicator_loop(
            indicator,
            mode,
            views_tx,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(views_rx)
    }

    /// Resolves when the loop exits on its own. A panic surfaces as an error.
    pub async fn wait(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => {
                let joined = handle.await;
                self.handle = None;
                self.cancel_token = None;
                joined.context("indicator loop task failed")
            }
            None => std::future::pending().await,
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("indicator loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for IndicatorController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlerter;
    use crate::clock::ManualClock;
    use crate::models::{PendingBreak, PomodoroCycleData};
    use crate::notifier::NotifierBridge;
    use crate::store::StoreOptions;
    use std::sync::Arc;

    const T0: i64 = 1_780_000_000_000;

    struct Fixture {
        clock: ManualClock,
        alerter: Arc<RecordingAlerter>,
        primary: watch::Sender<bool>,
        indicator: FloatingIndicator,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(T0);
        let alerter = Arc::new(RecordingAlerter::new());
        let completion = Completion::new(
            Store::in_memory(StoreOptions::default()).unwrap(),
            Arc::new(clock.clone()),
            NotifierBridge::disconnected(),
            alerter.clone(),
            &TimerSettings::default(),
        );
        let (primary, primary_rx) = watch::channel(false);
        Fixture {
            clock,
            alerter,
            primary,
            indicator: FloatingIndicator::new(completion, primary_rx),
        }
    }

    #[tokio::test]
    async fn test_shows_focus_countdown() {
        let mut fx = fixture();
        let timer = TimerState::begin("draft", 25, T0);
        fx.indicator.store().set(keys::ACTIVE_TIMER, &timer).await.unwrap();

        fx.clock.advance_secs(90);
        assert_eq!(
            fx.indicator.poll().await,
            IndicatorView::Focus {
                label: "draft".into(),
                remaining_seconds: 23 * 60 + 30,
                display: "23:30".into(),
                is_paused: false,
            }
        );
    }

    #[tokio::test]
    async fn test_hidden_while_primary_view_active() {
        let mut fx = fixture();
        let timer = TimerState::begin("draft", 1, T0);
        fx.indicator.store().set(keys::ACTIVE_TIMER, &timer).await.unwrap();
        fx.primary.send(true).unwrap();

        fx.clock.advance_secs(120);
        assert_eq!(fx.indicator.poll().await, IndicatorView::Hidden);
        assert_eq!(fx.alerter.alarms(), 0);
        assert!(fx
            .indicator
            .store()
            .get::<TimerState>(keys::ACTIVE_TIMER)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_completes_expired_focus_once() {
        let mut fx = fixture();
        let timer = TimerState::begin("draft", 1, T0);
        let store = fx.indicator.store().clone();
        store.set(keys::ACTIVE_TIMER, &timer).await.unwrap();

        fx.clock.advance_secs(61);
        assert_eq!(fx.indicator.poll().await, IndicatorView::Hidden);
        assert_eq!(fx.indicator.poll().await, IndicatorView::Hidden);

        assert_eq!(fx.alerter.alarms(), 1);
        assert_eq!(store.load_history().await.len(), 1);
        let cycle = store
            .get::<PomodoroCycleData>(keys::POMODORO_DATA)
            .await
            .unwrap();
        assert_eq!(cycle.daily_count, 1);
        assert_eq!(
            store.get::<PendingBreak>(keys::START_BREAK_TIMER).await,
            Some(PendingBreak {
                is_long_break: false,
                duration_minutes: 5
            })
        );
        assert!(store.get::<TimerState>(keys::ACTIVE_TIMER).await.is_none());
    }

    #[tokio::test]
    async fn test_guard_resets_for_next_timer() {
        let mut fx = fixture();
        let store = fx.indicator.store().clone();

        store
            .set(keys::ACTIVE_TIMER, &TimerState::begin("one", 1, T0))
            .await
            .unwrap();
        fx.clock.advance_secs(60);
        fx.indicator.poll().await;

        let second = TimerState::begin("two", 1, T0 + 60_000);
        store.set(keys::ACTIVE_TIMER, &second).await.unwrap();
        fx.clock.advance_secs(60);
        fx.indicator.poll().await;

        assert_eq!(fx.alerter.alarms(), 2);
        assert_eq!(store.load_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_completes_expired_break_without_bookkeeping() {
        let mut fx = fixture();
        let store = fx.indicator.store().clone();
        let rest = BreakTimerState::begin(true, 15, T0);
        store.set(keys::ACTIVE_BREAK_TIMER, &rest).await.unwrap();

        fx.clock.advance_secs(10);
        assert!(matches!(
            fx.indicator.poll().await,
            IndicatorView::Break {
                is_long_break: true,
                ..
            }
        ));

        fx.clock.advance_secs(15 * 60);
        assert_eq!(fx.indicator.poll().await, IndicatorView::Hidden);
        assert_eq!(fx.alerter.alarms(), 1);
        assert!(store.load_history().await.is_empty());
        assert!(store
            .get::<BreakTimerState>(keys::ACTIVE_BREAK_TIMER)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_subscribe_mode_wakes_on_store_writes() {
        let fx = fixture();
        let store = fx.indicator.store().clone();
        store
            .set(keys::ACTIVE_TIMER, &TimerState::begin("one", 25, T0))
            .await
            .unwrap();

        // The fallback never fires within the test; only the change feed can
        // deliver the second timer.
        let mut controller = IndicatorController::new();
        let mut views = controller
            .start(
                fx.indicator,
                WatchMode::Subscribe {
                    fallback: Duration::from_secs(3600),
                },
            )
            .unwrap();

        let first = views.wait_for(|view| {
            matches!(view, IndicatorView::Focus { label, .. } if label == "one")
        });
        tokio::time::timeout(Duration::from_secs(2), first)
            .await
            .unwrap()
            .unwrap();

        store
            .set(keys::ACTIVE_TIMER, &TimerState::begin("two", 25, T0))
            .await
            .unwrap();
        let second = views.wait_for(|view| {
            matches!(view, IndicatorView::Focus { label, .. } if label == "two")
        });
        tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .unwrap()
            .unwrap();

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_controller_publishes_views() {
        let fx = fixture();
        let store = fx.indicator.store().clone();
        store
            .set(keys::ACTIVE_TIMER, &TimerState::begin("live", 25, T0))
            .await
            .unwrap();

        let mut controller = IndicatorController::new();
        let mut views = controller
            .start(fx.indicator, WatchMode::Poll(Duration::from_millis(10)))
            .unwrap();
        assert!(controller.is_active());

        let shown = views.wait_for(|view| {
            matches!(view, IndicatorView::Focus { label, .. } if label == "live")
        });
        tokio::time::timeout(Duration::from_secs(2), shown)
            .await
            .unwrap()
            .unwrap();
        controller.stop().await.unwrap();
        assert!(!controller.is_active());
    }
}
