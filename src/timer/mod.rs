pub mod completion;
pub mod controller;
pub mod state;

pub use completion::{Completion, FocusOutcome};
pub use controller::TimerController;
pub use state::{TimerEvent, TimerPhase, TimerSnapshot, TimerStatus};
