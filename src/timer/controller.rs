use std::{sync::Arc, time::Duration};

use log::{error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::AbortHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    alert::SharedAlerter,
    clock::SharedClock,
    error::{StoreError, TimerError, ValidationError},
    models::{BreakTimerState, Countdown, PendingBreak, PomodoroCycleData, TimerState},
    notifier::NotifierBridge,
    settings::TimerSettings,
    store::{keys, ChangeKind, StoreChange, Store},
};

use super::completion::Completion;
use super::{TimerEvent, TimerPhase, TimerSnapshot};

/// How long a losing observer waits for the winner's break hand-off.
const ADOPT_WAIT: Duration = Duration::from_secs(2);
const EVENT_CAPACITY: usize = 64;

struct EngineState {
    phase: TimerPhase,
    /// Whether the last write of the active record reached the store. When it
    /// did not, a missing record means our own write failed, not that another
    /// observer completed it.
    persisted: bool,
    cycle: PomodoroCycleData,
}

/// Foreground timer engine. Every transition runs under one lock; the ticker
/// task is only ever aborted while that lock is held.
#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<EngineState>>,
    completion: Completion,
    ticker: Arc<Mutex<Option<AbortHandle>>>,
    tick_interval: Duration,
    events: broadcast::Sender<TimerEvent>,
    failure_tx: mpsc::UnboundedSender<anyhow::Error>,
    failures: Arc<Mutex<mpsc::UnboundedReceiver<anyhow::Error>>>,
}

impl TimerController {
    pub fn new(
        store: Store,
        clock: SharedClock,
        bridge: NotifierBridge,
        alerter: SharedAlerter,
        settings: &TimerSettings,
    ) -> Self {
        let today = clock.today();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (failure_tx, failures) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(EngineState {
                phase: TimerPhase::Idle,
                persisted: false,
                cycle: PomodoroCycleData::fresh(today),
            })),
            completion: Completion::new(store, clock, bridge, alerter, settings),
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: settings.tick_interval(),
            events,
            failure_tx,
            failures: Arc::new(Mutex::new(failures)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    /// Resolves with the next ticker task failure. Aborted tickers are not
    /// failures.
    pub async fn ticker_failed(&self) -> anyhow::Error {
        let mut failures = self.failures.lock().await;
        match failures.recv().await {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }

    /// The completion routine this engine runs, for observers that share it.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let guard = self.state.lock().await;
        self.capture(&guard)
    }

    /// Mount: rebuild the phase from the store and finish anything that ran
    /// out while nobody was watching.
    pub async fn restore(&self) -> TimerSnapshot {
        let mut guard = self.state.lock().await;
        self.cancel_ticker().await;

        let store = self.completion.store();
        let now = self.now_ms();
        let today = self.completion.clock().today();

        guard.cycle = store
            .get::<PomodoroCycleData>(keys::POMODORO_DATA)
            .await
            .map(|cycle| cycle.for_day(today))
            .unwrap_or_else(|| PomodoroCycleData::fresh(today));

        let focus = store
            .get::<TimerState>(keys::ACTIVE_TIMER)
            .await
            .filter(consistent_focus);
        let rest = store
            .get::<BreakTimerState>(keys::ACTIVE_BREAK_TIMER)
            .await
            .filter(consistent_break);
        let pending = store.get::<PendingBreak>(keys::START_BREAK_TIMER).await;

        guard.phase = TimerPhase::Idle;
        guard.persisted = false;

        if let Some(timer) = focus {
            if rest.is_some() || pending.is_some() {
                warn!("Focus and break state both persisted; keeping the focus timer");
                self.remove_quietly(&[keys::ACTIVE_BREAK_TIMER, keys::START_BREAK_TIMER])
                    .await;
            }
            guard.persisted = true;
            let expired = timer.has_expired(now);
            let counting = timer.is_counting_down();
            if counting && !expired {
                if let Some(end) = timer.end_time_epoch_ms {
                    self.completion.bridge().arm_timer(&timer.label, end);
                }
            }
            guard.phase = TimerPhase::Focus(timer);
            if expired {
                info!("Focus timer ran out while unmounted; completing now");
                self.complete_focus_locked(&mut guard).await;
            } else if counting {
                self.spawn_ticker().await;
            }
        } else if let Some(pending) = pending {
            if rest.is_some() {
                self.remove_quietly(&[keys::ACTIVE_BREAK_TIMER]).await;
            }
            guard.phase = TimerPhase::BreakPending(pending);
        } else if let Some(timer) = rest {
            guard.persisted = true;
            let expired = timer.has_expired(now);
            if !expired {
                if let Some(end) = timer.end_time_epoch_ms {
                    self.completion.bridge().arm_break(timer.is_long_break, end);
                }
            }
            guard.phase = TimerPhase::Break(timer);
            if expired {
                info!("Break ran out while unmounted; completing now");
                self.complete_break_locked(&mut guard).await;
            } else {
                self.spawn_ticker().await;
            }
        }

        self.emit_state(&guard)
    }

    pub async fn start(&self, label: &str, minutes: u32) -> Result<TimerSnapshot, TimerError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::EmptyLabel.into());
        }
        if minutes == 0 {
            return Err(ValidationError::NonPositiveDuration.into());
        }

        let mut guard = self.state.lock().await;
        match &guard.phase {
            TimerPhase::Idle => {}
            TimerPhase::BreakPending(_) => {
                self.remove_quietly(&[keys::START_BREAK_TIMER]).await;
            }
            _ => return Err(TimerError::InvalidState("a timer is already active")),
        }

        let timer = TimerState::begin(label, minutes, self.now_ms());
        guard.persisted = self.persist(keys::ACTIVE_TIMER, &timer).await;
        if let Some(end) = timer.end_time_epoch_ms {
            self.completion.bridge().arm_timer(&timer.label, end);
        }
        info!("Focus '{}' started for {minutes} min", timer.label);
        guard.phase = TimerPhase::Focus(timer);
        self.spawn_ticker().await;

        Ok(self.emit_state(&guard))
    }

    pub async fn pause(&self) -> Result<TimerSnapshot, TimerError> {
        let mut guard = self.state.lock().await;
        self.pause_locked(&mut guard).await?;
        Ok(self.emit_state(&guard))
    }

    pub async fn resume(&self) -> Result<TimerSnapshot, TimerError> {
        let mut guard = self.state.lock().await;
        self.resume_locked(&mut guard).await?;
        Ok(self.emit_state(&guard))
    }

    pub async fn toggle_pause(&self) -> Result<TimerSnapshot, TimerError> {
        let mut guard = self.state.lock().await;
        let paused = matches!(&guard.phase, TimerPhase::Focus(timer) if timer.is_paused);
        if paused {
            self.resume_locked(&mut guard).await?;
        } else {
            self.pause_locked(&mut guard).await?;
        }
        Ok(self.emit_state(&guard))
    }

    /// Abandons whatever is in progress. Nothing is recorded.
    pub async fn reset(&self) -> TimerSnapshot {
        let mut guard = self.state.lock().await;
        self.cancel_ticker().await;
        self.completion.bridge().disarm();
        self.remove_quietly(&keys::TIMER_KEYS).await;
        guard.phase = TimerPhase::Idle;
        guard.persisted = false;
        info!("Timer reset");
        self.emit_state(&guard)
    }

    /// One ticker step. Returns whether the ticker should keep going.
    pub async fn tick(&self) -> bool {
        let mut guard = self.state.lock().await;
        if !guard.phase.is_counting_down() {
            return false;
        }

        let remaining_seconds = guard.phase.remaining_secs(self.now_ms());
        if remaining_seconds > 0 {
            let _ = self.events.send(TimerEvent::Tick { remaining_seconds });
            return true;
        }

        // Completion runs on this task; detach rather than abort ourselves.
        self.ticker.lock().await.take();
        if matches!(guard.phase, TimerPhase::Focus(_)) {
            self.complete_focus_locked(&mut guard).await;
        } else {
            self.complete_break_locked(&mut guard).await;
        }
        self.emit_state(&guard);
        false
    }

    /// Finishes the running focus timer. Calling it again, or after another
    /// observer already finished the same timer, changes nothing.
    pub async fn complete(&self) -> TimerSnapshot {
        let mut guard = self.state.lock().await;
        if matches!(guard.phase, TimerPhase::Focus(_)) {
            self.complete_focus_locked(&mut guard).await;
        }
        self.emit_state(&guard)
    }

    pub async fn set_break_duration(&self, minutes: u32) -> Result<TimerSnapshot, TimerError> {
        if minutes == 0 {
            return Err(ValidationError::NonPositiveDuration.into());
        }
        let mut guard = self.state.lock().await;
        let TimerPhase::BreakPending(pending) = &mut guard.phase else {
            return Err(TimerError::InvalidState("no break is waiting to start"));
        };
        pending.duration_minutes = minutes;
        let pending = *pending;
        self.persist(keys::START_BREAK_TIMER, &pending).await;
        Ok(self.emit_state(&guard))
    }

    pub async fn start_break(&self) -> Result<TimerSnapshot, TimerError> {
        let mut guard = self.state.lock().await;
        let TimerPhase::BreakPending(pending) = guard.phase.clone() else {
            return Err(TimerError::InvalidState("no break is waiting to start"));
        };

        let timer = BreakTimerState::begin(
            pending.is_long_break,
            pending.duration_minutes,
            self.now_ms(),
        );
        guard.persisted = self.persist(keys::ACTIVE_BREAK_TIMER, &timer).await;
        self.remove_quietly(&[keys::START_BREAK_TIMER]).await;
        if let Some(end) = timer.end_time_epoch_ms {
            self.completion.bridge().arm_break(timer.is_long_break, end);
        }
        info!(
            "{:?} break started for {} min",
            timer.kind(),
            timer.duration_minutes
        );
        guard.phase = TimerPhase::Break(timer);
        self.spawn_ticker().await;

        Ok(self.emit_state(&guard))
    }

    /// Drops the pending or running break without an alert.
    pub async fn skip_break(&self) -> Result<TimerSnapshot, TimerError> {
        let mut guard = self.state.lock().await;
        if !matches!(
            guard.phase,
            TimerPhase::BreakPending(_) | TimerPhase::Break(_)
        ) {
            return Err(TimerError::InvalidState("no break to skip"));
        }
        self.cancel_ticker().await;
        self.completion.bridge().disarm();
        self.remove_quietly(&[keys::ACTIVE_BREAK_TIMER, keys::START_BREAK_TIMER])
            .await;
        guard.phase = TimerPhase::Idle;
        guard.persisted = false;
        info!("Break skipped");
        Ok(self.emit_state(&guard))
    }

    pub async fn complete_break(&self) -> TimerSnapshot {
        let mut guard = self.state.lock().await;
        if matches!(guard.phase, TimerPhase::Break(_)) {
            self.complete_break_locked(&mut guard).await;
        }
        self.emit_state(&guard)
    }

    async fn pause_locked(&self, guard: &mut EngineState) -> Result<(), TimerError> {
        let TimerPhase::Focus(timer) = &mut guard.phase else {
            return Err(TimerError::InvalidState("no focus timer to pause"));
        };
        if timer.is_paused {
            return Err(TimerError::InvalidState("timer is already paused"));
        }
        timer.pause(self.completion.clock().now_ms());
        let timer = timer.clone();

        // The background alarm stays armed; resume supersedes it.
        self.cancel_ticker().await;
        guard.persisted = self.persist(keys::ACTIVE_TIMER, &timer).await;
        info!("Focus paused with {}s left", timer.time_left_seconds);
        Ok(())
    }

    async fn resume_locked(&self, guard: &mut EngineState) -> Result<(), TimerError> {
        let TimerPhase::Focus(timer) = &mut guard.phase else {
            return Err(TimerError::InvalidState("no focus timer to resume"));
        };
        if !timer.is_paused {
            return Err(TimerError::InvalidState("timer is not paused"));
        }
        timer.resume(self.completion.clock().now_ms());
        let timer = timer.clone();

        guard.persisted = self.persist(keys::ACTIVE_TIMER, &timer).await;
        if let Some(end) = timer.end_time_epoch_ms {
            self.completion.bridge().arm_timer(&timer.label, end);
        }
        self.spawn_ticker().await;
        info!("Focus resumed");
        Ok(())
    }

    async fn complete_focus_locked(&self, guard: &mut EngineState) {
        let TimerPhase::Focus(timer) = guard.phase.clone() else {
            return;
        };
        self.cancel_ticker().await;

        let store = self.completion.store();
        let mut changes = store.subscribe();
        let started_at = timer.started_at_epoch_ms;
        let claimed = store
            .take_if(keys::ACTIVE_TIMER, move |persisted: &TimerState| {
                persisted.started_at_epoch_ms == started_at
            })
            .await;

        if self.lost_claim(&claimed, guard.persisted) {
            self.adopt_focus_outcome(guard, &mut changes).await;
            return;
        }

        let outcome = self
            .completion
            .finish_focus(&timer, Some(guard.cycle.clone()))
            .await;
        guard.cycle = outcome.cycle.clone();
        guard.phase = TimerPhase::BreakPending(outcome.next_break);
        guard.persisted = false;
        let _ = self.events.send(TimerEvent::FocusCompleted {
            session: Some(outcome.session),
            next_break: Some(outcome.next_break),
            handled_elsewhere: false,
        });
    }

    /// Another observer completed the timer: take over its result instead of
    /// repeating its side effects.
    async fn adopt_focus_outcome(
        &self,
        guard: &mut EngineState,
        changes: &mut broadcast::Receiver<StoreChange>,
    ) {
        info!("Focus timer already completed elsewhere; adopting result");
        let store = self.completion.store();
        let mut pending = store.get::<PendingBreak>(keys::START_BREAK_TIMER).await;
        if pending.is_none() && wait_for_set(changes, keys::START_BREAK_TIMER).await {
            pending = store.get::<PendingBreak>(keys::START_BREAK_TIMER).await;
        }

        let today = self.completion.clock().today();
        if let Some(cycle) = store.get::<PomodoroCycleData>(keys::POMODORO_DATA).await {
            guard.cycle = cycle.for_day(today);
        }
        guard.phase = pending.map_or(TimerPhase::Idle, TimerPhase::BreakPending);
        guard.persisted = false;
        let _ = self.events.send(TimerEvent::FocusCompleted {
            session: store.load_history().await.into_iter().next(),
            next_break: pending,
            handled_elsewhere: true,
        });
    }

    async fn complete_break_locked(&self, guard: &mut EngineState) {
        let TimerPhase::Break(timer) = guard.phase.clone() else {
            return;
        };
        self.cancel_ticker().await;

        let started_at = timer.started_at_epoch_ms;
        let claimed = self
            .completion
            .store()
            .take_if(keys::ACTIVE_BREAK_TIMER, move |persisted: &BreakTimerState| {
                persisted.started_at_epoch_ms == started_at
            })
            .await;

        let handled_elsewhere = self.lost_claim(&claimed, guard.persisted);
        if handled_elsewhere {
            info!("Break already completed elsewhere");
        } else {
            self.completion.finish_break(&timer).await;
        }
        guard.phase = TimerPhase::Idle;
        guard.persisted = false;
        let _ = self.events.send(TimerEvent::BreakCompleted {
            is_long_break: timer.is_long_break,
            handled_elsewhere,
        });
    }

    /// A claim is lost only when the record is gone although our last write of
    /// it succeeded. Store failures fall back to completing locally.
    fn lost_claim<T>(&self, claimed: &Result<Option<T>, StoreError>, persisted: bool) -> bool {
        match claimed {
            Ok(Some(_)) => false,
            Ok(None) => persisted,
            Err(err) => {
                error!("Failed to claim timer record: {err}; completing locally");
                false
            }
        }
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let tick_interval = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval resolves immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if !controller.tick().await {
                    break;
                }
            }
        });
        *ticker_guard = Some(handle.abort_handle());

        let failure_tx = self.failure_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("Timer ticker panicked: {err}");
                    let failure = anyhow::Error::new(err).context("timer ticker failed");
                    let _ = failure_tx.send(failure);
                }
            }
        });
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    /// Writes a complete record. Failure leaves the engine running in memory.
    async fn persist<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match self.completion.store().set(key, value).await {
            Ok(()) => true,
            Err(err) => {
                error!("Failed to persist '{key}': {err}; continuing in memory");
                false
            }
        }
    }

    async fn remove_quietly(&self, keys: &[&str]) {
        if let Err(err) = self.completion.store().remove_many(keys).await {
            error!("Failed to clear {keys:?}: {err}");
        }
    }

    fn now_ms(&self) -> i64 {
        self.completion.clock().now_ms()
    }

    fn capture(&self, state: &EngineState) -> TimerSnapshot {
        TimerSnapshot::capture(&state.phase, &state.cycle, self.now_ms())
    }

    fn emit_state(&self, state: &EngineState) -> TimerSnapshot {
        let snapshot = self.capture(state);
        let _ = self.events.send(TimerEvent::StateChanged(snapshot.clone()));
        snapshot
    }
}

fn consistent_focus(timer: &TimerState) -> bool {
    if timer.is_consistent() {
        true
    } else {
        warn!("Ignoring inconsistent focus record");
        false
    }
}

fn consistent_break(timer: &BreakTimerState) -> bool {
    if timer.is_consistent() {
        true
    } else {
        warn!("Ignoring inconsistent break record");
        false
    }
}

async fn wait_for_set(changes: &mut broadcast::Receiver<StoreChange>, key: &str) -> bool {
    let wait = async {
        loop {
            match changes.recv().await {
                Ok(change) if change.key == key && change.kind == ChangeKind::Set => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    time::timeout(ADOPT_WAIT, wait).await.unwrap_or(false)
}
