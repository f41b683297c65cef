pub mod cycle;
pub mod session;
pub mod timer;

pub use cycle::{PomodoroCycleData, POMODOROS_PER_CYCLE};
pub use session::FocusSession;
pub use timer::{BreakKind, BreakTimerState, Countdown, PendingBreak, TimerState};
