//! Session layer — the recording engine, the data model, and the manager
//! that wires capture, analysis and persistence together.

pub mod manager;
pub mod models;
pub mod recorder;

pub use manager::SessionManager;
pub use models::{AudioFileEntry, EventSegment, SleepSession};
pub use recorder::{FinalizedEvent, Recorder};
