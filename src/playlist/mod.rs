pub mod defaults;
pub mod model;
pub mod scheduler;

pub use defaults::{default_playlist, proportional_kind};
pub use model::{NoiseKind, Playlist, Segment};
pub use scheduler::{PlaybackCursor, PlaylistScheduler, SchedulerOptions};
