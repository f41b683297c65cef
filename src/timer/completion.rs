//! Completion side effects shared by every observer that can see a countdown
//! reach zero. Callers claim the persisted record first; only the claimant
//! runs [`Completion::finish_focus`] or [`Completion::finish_break`].

use log::{error, info, warn};

use crate::alert::{sound_alarm, SharedAlerter, ALARM_VIBRATION};
use crate::clock::SharedClock;
use crate::error::StoreError;
use crate::models::{
    BreakKind, BreakTimerState, Countdown, FocusSession, PendingBreak, PomodoroCycleData,
    TimerState,
};
use crate::notifier::NotifierBridge;
use crate::settings::TimerSettings;
use crate::store::{keys, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusOutcome {
    pub session: FocusSession,
    pub cycle: PomodoroCycleData,
    pub next_break: PendingBreak,
}

#[derive(Clone)]
pub struct Completion {
    store: Store,
    clock: SharedClock,
    bridge: NotifierBridge,
    alerter: SharedAlerter,
    short_break_minutes: u32,
    long_break_minutes: u32,
    alert_sound: bool,
}

impl Completion {
    pub fn new(
        store: Store,
        clock: SharedClock,
        bridge: NotifierBridge,
        alerter: SharedAlerter,
        settings: &TimerSettings,
    ) -> Self {
        Self {
            store,
            clock,
            bridge,
            alerter,
            short_break_minutes: settings.short_break_minutes,
            long_break_minutes: settings.long_break_minutes,
            alert_sound: settings.alert_sound,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn bridge(&self) -> &NotifierBridge {
        &self.bridge
    }

    pub fn break_minutes(&self, kind: BreakKind) -> u32 {
        match kind {
            BreakKind::Short => self.short_break_minutes,
            BreakKind::Long => self.long_break_minutes,
        }
    }

    /// Takes the focus record if it has run out. Used by observers that do
    /// not own the record.
    pub async fn claim_expired_focus(&self) -> Result<Option<TimerState>, StoreError> {
        let now = self.clock.now_ms();
        self.store
            .take_if(keys::ACTIVE_TIMER, move |timer: &TimerState| {
                timer.is_consistent() && timer.has_expired(now)
            })
            .await
    }

    pub async fn claim_expired_break(&self) -> Result<Option<BreakTimerState>, StoreError> {
        let now = self.clock.now_ms();
        self.store
            .take_if(keys::ACTIVE_BREAK_TIMER, move |timer: &BreakTimerState| {
                timer.is_consistent() && timer.has_expired(now)
            })
            .await
    }

    /// Side effects of a finished focus timer, in order: disarm, alert, count
    /// the pomodoro, record the session, hand off the earned break.
    ///
    /// `cached_cycle` stands in for the persisted counters when they cannot be
    /// read.
    pub async fn finish_focus(
        &self,
        timer: &TimerState,
        cached_cycle: Option<PomodoroCycleData>,
    ) -> FocusOutcome {
        self.bridge.disarm();
        self.alert();

        let today = self.clock.today();
        let mut cycle = self
            .store
            .get::<PomodoroCycleData>(keys::POMODORO_DATA)
            .await
            .or(cached_cycle)
            .unwrap_or_else(|| PomodoroCycleData::fresh(today));
        let kind = cycle.record_completion(today);
        if let Err(err) = self.store.set(keys::POMODORO_DATA, &cycle).await {
            error!("Failed to persist pomodoro counters: {err}");
        }

        let history = self.store.load_history().await;
        let session = FocusSession::next(
            &history,
            &timer.label,
            timer.planned_duration_minutes,
            self.clock.now_utc(),
        );
        if let Err(err) = self.store.append_session(session.clone()).await {
            error!("Failed to record focus session: {err}");
        }

        let next_break = PendingBreak {
            is_long_break: kind.is_long(),
            duration_minutes: self.break_minutes(kind),
        };
        if let Err(err) = self.store.set(keys::START_BREAK_TIMER, &next_break).await {
            error!("Failed to hand off pending break: {err}");
        }

        info!(
            "Focus '{}' complete: pomodoro {} today, {:?} break next",
            timer.label, cycle.daily_count, kind
        );

        FocusOutcome {
            session,
            cycle,
            next_break,
        }
    }

    pub async fn finish_break(&self, timer: &BreakTimerState) {
        self.bridge.disarm();
        self.alert();
        info!("{:?} break complete", timer.kind());
    }

    fn alert(&self) {
        if self.alert_sound {
            sound_alarm(self.alerter.as_ref());
        } else if let Err(err) = self.alerter.vibrate(&ALARM_VIBRATION) {
            warn!("Vibration unavailable: {err}");
        }
    }
}
