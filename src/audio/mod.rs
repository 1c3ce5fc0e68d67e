//! Audio front end — microphone capture → downmix → resample → frame queue.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → downmix_to_mono
//!           → Resampler (16 kHz) → FrameQueue (512) → vad::* → wav::*
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::mpsc;
//! use somnoscope::audio::{AudioCapture, AudioChunk};
//!
//! let (tx, rx) = mpsc::channel::<AudioChunk>();
//! let capture = AudioCapture::new(None).unwrap();
//! let _handle = capture.start(tx).unwrap(); // drops handle → stops stream
//!
//! while let Ok(chunk) = rx.recv() {
//!     println!("received {} samples @ {}Hz", chunk.samples.len(), chunk.sample_rate);
//! }
//! ```

pub mod buffer;
pub mod capture;
pub mod resample;
pub mod wav;

pub use buffer::{FrameQueue, MinuteBuffer};
pub use capture::{AudioCapture, AudioChunk, CaptureError, StreamHandle};
pub use resample::{downmix_to_mono, resample_linear, Resampler};
pub use wav::{encode_wav, float_to_pcm16, validate_wav_file, WavRejection, WAV_SAMPLE_RATE};
