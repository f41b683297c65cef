use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{Days, NaiveDate, TimeZone, Utc};
use tokio::sync::{mpsc::UnboundedReceiver, watch};

use clarityhub_lib::alert::RecordingAlerter;
use clarityhub_lib::clock::{Clock, ManualClock};
use clarityhub_lib::error::{TimerError, ValidationError};
use clarityhub_lib::indicator::{FloatingIndicator, IndicatorView};
use clarityhub_lib::models::{BreakTimerState, PendingBreak, PomodoroCycleData, TimerState};
use clarityhub_lib::notifier::{NotifierBridge, NotifierMessage};
use clarityhub_lib::settings::TimerSettings;
use clarityhub_lib::store::{keys, Store, StoreOptions};
use clarityhub_lib::timer::{TimerController, TimerEvent, TimerPhase, TimerStatus};

const MINUTE: i64 = 60;

struct Harness {
    clock: ManualClock,
    store: Store,
    alerter: Arc<RecordingAlerter>,
    engine: TimerController,
    messages: UnboundedReceiver<NotifierMessage>,
}

fn settings() -> TimerSettings {
    // Tests drive every tick by hand.
    TimerSettings {
        tick_interval_ms: 3_600_000,
        ..TimerSettings::default()
    }
}

fn harness_with(options: StoreOptions) -> Harness {
    let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 4, 14, 9, 0, 0).unwrap());
    let store = Store::in_memory(options).unwrap();
    let alerter = Arc::new(RecordingAlerter::new());
    let (bridge, messages) = NotifierBridge::channel();
    let engine = TimerController::new(
        store.clone(),
        Arc::new(clock.clone()),
        bridge,
        alerter.clone(),
        &settings(),
    );
    Harness {
        clock,
        store,
        alerter,
        engine,
        messages,
    }
}

fn harness() -> Harness {
    harness_with(StoreOptions::default())
}

fn drain(messages: &mut UnboundedReceiver<NotifierMessage>) -> Vec<NotifierMessage> {
    let mut out = Vec::new();
    while let Ok(message) = messages.try_recv() {
        out.push(message);
    }
    out
}

async fn cycle(store: &Store) -> Option<PomodoroCycleData> {
    store.get(keys::POMODORO_DATA).await
}

#[tokio::test]
async fn test_start_reports_full_duration_and_arms_alarm() {
    let mut h = harness();
    let t0 = h.clock.now_ms();

    let snapshot = h.engine.start("  write chapter ", 25).await.unwrap();
    assert_eq!(snapshot.status, TimerStatus::Running);
    assert_eq!(snapshot.remaining_seconds, 25 * 60);
    assert_eq!(snapshot.display, "25:00");

    let persisted: TimerState = h.store.get(keys::ACTIVE_TIMER).await.unwrap();
    assert_eq!(persisted.label, "write chapter");
    assert_eq!(persisted.end_time_epoch_ms, Some(t0 + 25 * 60_000));

    assert_eq!(
        drain(&mut h.messages),
        vec![NotifierMessage::TimerStarted {
            label: "write chapter".into(),
            end_time_epoch_ms: t0 + 25 * 60_000,
        }]
    );

    h.clock.advance_ms(999);
    assert_eq!(h.engine.snapshot().await.remaining_seconds, 25 * 60 - 1);
}

#[tokio::test]
async fn test_invalid_input_changes_nothing() {
    let mut h = harness();

    assert_eq!(
        h.engine.start("   ", 25).await,
        Err(TimerError::Validation(ValidationError::EmptyLabel))
    );
    assert_eq!(
        h.engine.start("read", 0).await,
        Err(TimerError::Validation(ValidationError::NonPositiveDuration))
    );
    assert_eq!(h.engine.snapshot().await.status, TimerStatus::Idle);
    assert_eq!(h.store.get_raw(keys::ACTIVE_TIMER).await.unwrap(), None);
    assert!(drain(&mut h.messages).is_empty());
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let h = harness();
    h.engine.start("read", 25).await.unwrap();
    assert!(matches!(
        h.engine.start("other", 5).await,
        Err(TimerError::InvalidState(_))
    ));
    assert!(matches!(
        h.engine.resume().await,
        Err(TimerError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_pause_excludes_paused_time() {
    let mut h = harness();
    h.engine.start("focus", 25).await.unwrap();

    h.clock.advance_secs(5 * MINUTE);
    let paused = h.engine.pause().await.unwrap();
    assert_eq!(paused.status, TimerStatus::Paused);
    assert_eq!(paused.display, "20:00");
    let persisted: TimerState = h.store.get(keys::ACTIVE_TIMER).await.unwrap();
    assert_eq!(persisted.end_time_epoch_ms, None);
    assert_eq!(persisted.time_left_seconds, 20 * 60);

    h.clock.advance_secs(30);
    assert_eq!(h.engine.snapshot().await.display, "20:00");

    let resumed = h.engine.toggle_pause().await.unwrap();
    assert_eq!(resumed.status, TimerStatus::Running);
    assert_eq!(resumed.display, "20:00");

    let resume_at = h.clock.now_ms();
    let messages = drain(&mut h.messages);
    assert_eq!(messages.len(), 2);
    assert!(!messages.contains(&NotifierMessage::TimerStopped));
    assert_eq!(
        messages[1],
        NotifierMessage::TimerStarted {
            label: "focus".into(),
            end_time_epoch_ms: resume_at + 20 * 60_000,
        }
    );
}

#[tokio::test]
async fn test_complete_is_idempotent() {
    let mut h = harness();
    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(25 * MINUTE);

    let first = h.engine.complete().await;
    let second = h.engine.complete().await;
    assert_eq!(first.status, TimerStatus::BreakPending);
    assert_eq!(second.status, TimerStatus::BreakPending);

    assert_eq!(h.alerter.alarms(), 1);
    assert_eq!(cycle(&h.store).await.unwrap().daily_count, 1);
    let history = h.store.load_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].label, "focus");
    assert_eq!(history[0].duration_minutes, 25);
    assert_eq!(h.store.get_raw(keys::ACTIVE_TIMER).await.unwrap(), None);
    assert_eq!(
        drain(&mut h.messages).last(),
        Some(&NotifierMessage::TimerStopped)
    );
}

#[tokio::test]
async fn test_tick_counts_down_then_completes() {
    let h = harness();
    let mut events = h.engine.subscribe();
    h.engine.start("focus", 1).await.unwrap();

    h.clock.advance_ms(20_500);
    assert!(h.engine.tick().await);

    h.clock.advance_secs(40);
    assert!(!h.engine.tick().await);
    assert_eq!(h.engine.snapshot().await.status, TimerStatus::BreakPending);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&TimerEvent::Tick {
        remaining_seconds: 39
    }));
    assert!(seen.iter().any(|event| matches!(
        event,
        TimerEvent::FocusCompleted {
            handled_elsewhere: false,
            next_break: Some(PendingBreak {
                is_long_break: false,
                duration_minutes: 5
            }),
            ..
        }
    )));
}

#[tokio::test]
async fn test_fourth_pomodoro_earns_long_break() {
    let h = harness();
    let today = h.clock.today();
    h.store
        .set(
            keys::POMODORO_DATA,
            &PomodoroCycleData {
                date: today,
                cycle_count: 3,
                daily_count: 3,
            },
        )
        .await
        .unwrap();
    h.engine.restore().await;

    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(25 * MINUTE);
    let snapshot = h.engine.complete().await;

    assert_eq!(snapshot.cycle.cycle_count, 0);
    assert_eq!(snapshot.cycle.daily_count, 4);
    assert_eq!(
        snapshot.phase,
        TimerPhase::BreakPending(PendingBreak {
            is_long_break: true,
            duration_minutes: 15
        })
    );
    assert_eq!(snapshot.remaining_seconds, 15 * 60);
}

#[tokio::test]
async fn test_counters_roll_over_with_the_day() {
    let h = harness();
    let yesterday = h.clock.today().checked_sub_days(Days::new(1)).unwrap();
    h.store
        .set(
            keys::POMODORO_DATA,
            &PomodoroCycleData {
                date: yesterday,
                cycle_count: 3,
                daily_count: 7,
            },
        )
        .await
        .unwrap();

    let restored = h.engine.restore().await;
    assert_eq!(restored.cycle.daily_count, 0);

    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(25 * MINUTE);
    h.engine.complete().await;

    let stored = cycle(&h.store).await.unwrap();
    assert_eq!(stored.date, h.clock.today());
    assert_eq!((stored.cycle_count, stored.daily_count), (1, 1));
}

#[tokio::test]
async fn test_restore_completes_timer_that_ran_out() {
    let h = harness();
    let started = h.clock.now_ms() - 40 * MINUTE * 1000;
    h.store
        .set(keys::ACTIVE_TIMER, &TimerState::begin("overnight", 25, started))
        .await
        .unwrap();

    let snapshot = h.engine.restore().await;
    assert_eq!(snapshot.status, TimerStatus::BreakPending);
    assert_eq!(h.alerter.alarms(), 1);
    assert_eq!(h.store.load_history().await.len(), 1);
    assert_eq!(
        h.store.get::<PendingBreak>(keys::START_BREAK_TIMER).await,
        Some(PendingBreak {
            is_long_break: false,
            duration_minutes: 5
        })
    );
}

#[tokio::test]
async fn test_restore_resumes_running_timer() {
    let mut h = harness();
    let started = h.clock.now_ms() - 10 * MINUTE * 1000;
    h.store
        .set(keys::ACTIVE_TIMER, &TimerState::begin("carry on", 25, started))
        .await
        .unwrap();

    let snapshot = h.engine.restore().await;
    assert_eq!(snapshot.status, TimerStatus::Running);
    assert_eq!(snapshot.display, "15:00");
    assert_eq!(h.alerter.alarms(), 0);
    assert!(matches!(
        drain(&mut h.messages).as_slice(),
        [NotifierMessage::TimerStarted { .. }]
    ));
}

#[tokio::test]
async fn test_restore_prefers_focus_over_break_record() {
    let h = harness();
    let now = h.clock.now_ms();
    h.store
        .set(keys::ACTIVE_TIMER, &TimerState::begin("focus", 25, now))
        .await
        .unwrap();
    h.store
        .set(keys::ACTIVE_BREAK_TIMER, &BreakTimerState::begin(false, 5, now))
        .await
        .unwrap();

    let snapshot = h.engine.restore().await;
    assert_eq!(snapshot.status, TimerStatus::Running);
    assert_eq!(
        h.store.get_raw(keys::ACTIVE_BREAK_TIMER).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_restore_prefers_pending_break_over_stale_break() {
    let h = harness();
    let now = h.clock.now_ms();
    let pending = PendingBreak {
        is_long_break: true,
        duration_minutes: 15,
    };
    h.store.set(keys::START_BREAK_TIMER, &pending).await.unwrap();
    h.store
        .set(keys::ACTIVE_BREAK_TIMER, &BreakTimerState::begin(false, 5, now))
        .await
        .unwrap();

    let snapshot = h.engine.restore().await;
    assert_eq!(snapshot.phase, TimerPhase::BreakPending(pending));
}

#[tokio::test]
async fn test_corrupt_record_reads_as_idle() {
    let h = harness();
    h.store
        .set_raw(keys::ACTIVE_TIMER, "{not json".into())
        .await
        .unwrap();
    assert_eq!(h.engine.restore().await.status, TimerStatus::Idle);
}

#[tokio::test]
async fn test_out_of_range_deadline_reads_as_idle() {
    let h = harness();
    let started = h.clock.now_ms();
    let raw = format!(
        r#"{{"label":"wild","plannedDurationMinutes":25,"timeLeftSeconds":1500,"isRunning":true,"isPaused":false,"endTimeEpochMs":{},"startedAtEpochMs":{started}}}"#,
        i64::MIN
    );
    h.store.set_raw(keys::ACTIVE_TIMER, raw).await.unwrap();

    assert_eq!(h.engine.restore().await.status, TimerStatus::Idle);
    assert_eq!(h.alerter.alarms(), 0);

    let (_primary, primary_rx) = watch::channel(false);
    let mut indicator = FloatingIndicator::new(h.engine.completion().clone(), primary_rx);
    assert_eq!(indicator.poll().await, IndicatorView::Hidden);
    assert!(h.store.load_history().await.is_empty());
}

#[tokio::test]
async fn test_reset_clears_timer_keys_and_disarms() {
    let mut h = harness();
    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(3 * MINUTE);

    let snapshot = h.engine.reset().await;
    assert_eq!(snapshot.status, TimerStatus::Idle);
    for key in keys::TIMER_KEYS {
        assert_eq!(h.store.get_raw(key).await.unwrap(), None, "{key}");
    }
    assert_eq!(
        drain(&mut h.messages).last(),
        Some(&NotifierMessage::TimerStopped)
    );
    assert!(h.store.load_history().await.is_empty());
    assert_eq!(h.alerter.alarms(), 0);
}

#[tokio::test]
async fn test_break_runs_and_returns_to_idle() {
    let mut h = harness();
    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(25 * MINUTE);
    h.engine.complete().await;
    drain(&mut h.messages);

    let adjusted = h.engine.set_break_duration(10).await.unwrap();
    assert_eq!(adjusted.remaining_seconds, 10 * 60);

    let running = h.engine.start_break().await.unwrap();
    assert_eq!(running.status, TimerStatus::BreakRunning);
    assert_eq!(running.display, "10:00");
    assert_eq!(
        h.store.get_raw(keys::START_BREAK_TIMER).await.unwrap(),
        None
    );
    let break_end = h.clock.now_ms() + 10 * 60_000;
    assert_eq!(
        drain(&mut h.messages),
        vec![NotifierMessage::BreakStarted {
            is_long_break: false,
            end_time_epoch_ms: break_end,
        }]
    );

    h.clock.advance_secs(10 * MINUTE);
    assert!(!h.engine.tick().await);

    let idle = h.engine.snapshot().await;
    assert_eq!(idle.status, TimerStatus::Idle);
    assert_eq!(h.alerter.alarms(), 2);
    assert_eq!(h.store.load_history().await.len(), 1);
    assert_eq!(idle.cycle.daily_count, 1);
    assert_eq!(
        h.store.get_raw(keys::ACTIVE_BREAK_TIMER).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_skip_break_is_silent() {
    let mut h = harness();
    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(25 * MINUTE);
    h.engine.complete().await;
    h.engine.start_break().await.unwrap();
    drain(&mut h.messages);

    let snapshot = h.engine.skip_break().await.unwrap();
    assert_eq!(snapshot.status, TimerStatus::Idle);
    assert_eq!(h.alerter.alarms(), 1);
    assert_eq!(drain(&mut h.messages), vec![NotifierMessage::TimerStopped]);
    assert!(matches!(
        h.engine.skip_break().await,
        Err(TimerError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_start_from_pending_break_discards_it() {
    let h = harness();
    h.engine.start("focus", 25).await.unwrap();
    h.clock.advance_secs(25 * MINUTE);
    h.engine.complete().await;

    let snapshot = h.engine.start("again", 25).await.unwrap();
    assert_eq!(snapshot.status, TimerStatus::Running);
    assert_eq!(
        h.store.get_raw(keys::START_BREAK_TIMER).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_indicator_wins_race_and_engine_adopts() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let (_primary, primary_rx) = watch::channel(false);
    let mut indicator = FloatingIndicator::new(h.engine.completion().clone(), primary_rx);

    h.engine.start("focus", 1).await.unwrap();
    h.clock.advance_secs(61);

    indicator.poll().await;
    assert!(!h.engine.tick().await);

    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.status, TimerStatus::BreakPending);
    assert_eq!(snapshot.cycle.daily_count, 1);
    assert_eq!(h.alerter.alarms(), 1);
    assert_eq!(h.store.load_history().await.len(), 1);

    let mut adopted = false;
    while let Ok(event) = events.try_recv() {
        if let TimerEvent::FocusCompleted {
            handled_elsewhere, ..
        } = event
        {
            adopted = handled_elsewhere;
        }
    }
    assert!(adopted);
}

#[tokio::test]
async fn test_runs_in_memory_when_store_is_full() {
    let h = harness_with(StoreOptions {
        quota_bytes: 16,
        session_retention: 1,
    });

    let snapshot = h.engine.start("a label that does not fit", 1).await.unwrap();
    assert_eq!(snapshot.status, TimerStatus::Running);
    assert_eq!(h.store.get_raw(keys::ACTIVE_TIMER).await.unwrap(), None);

    h.clock.advance_secs(MINUTE);
    let snapshot = h.engine.complete().await;
    assert_eq!(snapshot.status, TimerStatus::BreakPending);
    assert_eq!(snapshot.cycle.daily_count, 1);
    assert_eq!(h.alerter.alarms(), 1);
}

#[tokio::test]
async fn test_engine_waits_for_late_break_handoff() {
    let h = harness();
    h.engine.start("focus", 1).await.unwrap();
    h.clock.advance_secs(61);

    // Another observer owns the record now but has not written the hand-off.
    let claimed = h.engine.completion().claim_expired_focus().await.unwrap();
    assert!(claimed.is_some());

    let engine = h.engine.clone();
    let ticking = tokio::spawn(async move { engine.tick().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pending = PendingBreak {
        is_long_break: false,
        duration_minutes: 5,
    };
    h.store.set(keys::START_BREAK_TIMER, &pending).await.unwrap();

    assert!(!ticking.await.unwrap());
    assert_eq!(
        h.engine.snapshot().await.phase,
        TimerPhase::BreakPending(pending)
    );
    assert_eq!(h.alerter.alarms(), 0);
    assert!(h.store.load_history().await.is_empty());
}

#[tokio::test]
async fn test_engine_goes_idle_when_handoff_never_arrives() {
    let h = harness();
    h.engine.start("focus", 1).await.unwrap();
    h.clock.advance_secs(61);
    h.engine
        .completion()
        .claim_expired_focus()
        .await
        .unwrap()
        .unwrap();

    let keep_ticking = tokio::time::timeout(Duration::from_secs(5), h.engine.tick())
        .await
        .unwrap();
    assert!(!keep_ticking);
    assert_eq!(h.engine.snapshot().await.status, TimerStatus::Idle);
    assert_eq!(h.alerter.alarms(), 0);
}

struct FaultyClock {
    inner: ManualClock,
    broken: Arc<AtomicBool>,
}

impl Clock for FaultyClock {
    fn now_ms(&self) -> i64 {
        if self.broken.load(Ordering::SeqCst) {
            panic!("clock source lost");
        }
        self.inner.now_ms()
    }

    fn today(&self) -> NaiveDate {
        self.inner.today()
    }
}

#[tokio::test]
async fn test_ticker_panic_reaches_the_host() {
    let broken = Arc::new(AtomicBool::new(false));
    let clock = FaultyClock {
        inner: ManualClock::at(Utc.with_ymd_and_hms(2026, 4, 14, 9, 0, 0).unwrap()),
        broken: broken.clone(),
    };
    let engine = TimerController::new(
        Store::in_memory(StoreOptions::default()).unwrap(),
        Arc::new(clock),
        NotifierBridge::disconnected(),
        Arc::new(RecordingAlerter::new()),
        &TimerSettings {
            tick_interval_ms: 10,
            ..TimerSettings::default()
        },
    );
    engine.start("focus", 25).await.unwrap();
    broken.store(true, Ordering::SeqCst);

    let failure = tokio::time::timeout(Duration::from_secs(2), engine.ticker_failed())
        .await
        .unwrap();
    assert!(format!("{failure:#}").contains("timer ticker failed"));

    broken.store(false, Ordering::SeqCst);
    assert_eq!(engine.reset().await.status, TimerStatus::Idle);
}
