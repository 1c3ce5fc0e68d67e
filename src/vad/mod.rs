//! Voice-activity scoring and event segmentation.
//!
//! # Pipeline
//!
//! ```text
//! 512-sample frame → VadScorer (probability) → EMA smoothing
//!                 → EventSegmenter (hysteresis) → EventClassifier → WAV
//! ```
//!
//! The scorer and classifier are trait objects so the built-in energy
//! heuristics can be swapped for a model-backed implementation without
//! touching the segmentation logic.

pub mod classifier;
pub mod scorer;
pub mod segmenter;

pub use classifier::{EventClassifier, SpectralRatioClassifier};
pub use scorer::{EnergyScorer, VadScorer};
pub use segmenter::{EventSegmenter, EventState, ExitReason, SegmenterConfig, Transition};
