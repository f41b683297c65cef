//! Persisted keys. Each holds one JSON document.

pub const ACTIVE_TIMER: &str = "active-timer";
pub const ACTIVE_BREAK_TIMER: &str = "active-break-timer";
pub const POMODORO_DATA: &str = "pomodoro-data";
pub const DEEPWORK_SESSIONS: &str = "deepwork-sessions";
pub const TODOS: &str = "todos";
pub const EXPENSES: &str = "expenses";
/// One-shot "start break now" hand-off between observers.
pub const START_BREAK_TIMER: &str = "start-break-timer";

/// Keys holding in-flight timer state. Clearing these never loses history.
pub const TIMER_KEYS: [&str; 3] = [ACTIVE_TIMER, ACTIVE_BREAK_TIMER, START_BREAK_TIMER];
