use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

/// Wall-clock source shared by the engine, the floating indicator and the
/// notifier worker. Every countdown is derived from absolute epoch
/// milliseconds, so this is the only place time enters the system.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    /// Calendar day used for the daily Pomodoro counters.
    fn today(&self) -> NaiveDate;

    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Hand-driven clock. Days are computed in UTC so results don't depend on the
/// machine's zone.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn at(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime.timestamp_millis())
    }

    pub fn set_ms(&self, value: i64) {
        self.now_ms.store(value, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: i64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1000);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn today(&self) -> NaiveDate {
        self.now_utc().date_naive()
    }
}
