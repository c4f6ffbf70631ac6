pub mod backend;
pub mod controller;
pub mod noise;
pub mod render;
pub mod transient;

pub use backend::{AudioBackend, ExternalBackend, PlayerProcess};
pub use controller::{AudioConfig, AudioProcessController, RenderedSegment, StreamStatus};
pub use noise::NoiseKind;
pub use render::{render_to_file, RenderJob};
