pub mod commands;
pub mod controller;
pub mod events;
pub mod state;

pub use commands::{parse_command, TimerCommand};
pub use controller::TimerController;
pub use events::{TimerEvent, TimerSnapshot};
pub use state::{Phase, PhaseDurations, TimerState};
