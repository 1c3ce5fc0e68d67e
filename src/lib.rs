//! Somnoscope — continuous sleep-audio capture with voice-activity event
//! segmentation.
//!
//! # Architecture
//!
//! ```text
//! Microphone (cpal) → downmix → resample (16 kHz) → 512-sample frames
//!        → VAD score → EMA → hysteresis segmenter → classify → WAV
//!
//! Minute buffer (all audio) ──60 s timer──→ continuous WAV segments
//!
//! Ledger (layered JSON stores) ←── session, artifacts, event manifests
//! Lifecycle guard ←── health checks, grant renewal, pause/resume
//! ```
//!
//! The [`session::SessionManager`] ties everything together; `main`
//! constructs one, runs startup recovery, and hands periodic duty to the
//! [`lifecycle::LifecycleGuard`].

pub mod audio;
pub mod config;
pub mod lifecycle;
pub mod session;
pub mod store;
pub mod vad;

pub use config::AppConfig;
pub use session::SessionManager;
