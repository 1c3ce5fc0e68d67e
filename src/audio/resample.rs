//! Audio resampling and channel mixing utilities.
//!
//! The analysis pipeline requires **16 kHz mono `f32`** audio.  This module
//! provides the two conversion steps:
//!
//! 1. [`downmix_to_mono`] — downmix any number of interleaved channels to mono.
//! 2. [`Resampler`] — streaming conversion from any source rate to the target
//!    rate, using a windowed-sinc kernel from the `rubato` crate.
//!
//! When the sinc resampler cannot be constructed for a given rate pair the
//! [`Resampler`] silently degrades to linear interpolation, which always
//! produces output.  Either path yields approximately
//! `input_len * target / source` samples.

use log::warn;
use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

/// Fixed input block size for the sinc resampler.  Incoming chunks are
/// buffered until a full block is available.
const SINC_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec` with no
///   averaging (fast path — avoids an extra allocation when already mono).
/// * If `channels == 0` an empty vector is returned.
///
/// # Example
///
/// ```rust
/// use somnoscope::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.0).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample `samples` from `source_rate` Hz to `target_rate` Hz using linear
/// interpolation.
///
/// * If `source_rate == target_rate` the input is cloned and returned
///   unchanged (no-op fast path — no interpolation performed).
/// * If `samples` is empty, or either rate is zero, an empty vector is
///   returned.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            // Linear interpolation between adjacent samples
            samples[idx] * (1.0 - frac as f32) + samples[idx + 1] * frac as f32
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Resampler
// ---------------------------------------------------------------------------

enum Kernel {
    /// No conversion needed; input passes through untouched.
    Identity,
    /// Windowed-sinc resampler with an input accumulation buffer.
    Sinc {
        inner: Box<SincFixedIn<f32>>,
        pending: Vec<f32>,
    },
    /// Stateless linear interpolation fallback.
    Linear,
}

/// Streaming mono resampler from a fixed source rate to a fixed target rate.
///
/// Feed arbitrary-length chunks with [`Resampler::process`]; call
/// [`Resampler::flush`] at end of stream to drain any buffered tail.
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    kernel: Kernel,
}

impl Resampler {
    /// Build a resampler for the given rate pair.
    ///
    /// Prefers the sinc kernel; falls back to linear interpolation when
    /// `rubato` rejects the configuration.
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let kernel = if source_rate == target_rate || source_rate == 0 || target_rate == 0 {
            Kernel::Identity
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let ratio = target_rate as f64 / source_rate as f64;
            match SincFixedIn::<f32>::new(ratio, 2.0, params, SINC_CHUNK, 1) {
                Ok(inner) => Kernel::Sinc {
                    inner: Box::new(inner),
                    pending: Vec::with_capacity(SINC_CHUNK * 2),
                },
                Err(e) => {
                    warn!("sinc resampler unavailable ({e}); using linear interpolation");
                    Kernel::Linear
                }
            }
        };

        Self {
            source_rate,
            target_rate,
            kernel,
        }
    }

    /// Source sample rate in Hz.
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Convert one chunk of mono samples.  Output length may differ from
    /// `input_len * ratio` for a single call because the sinc kernel buffers
    /// partial blocks; over a stream the lengths balance out.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }

        match &mut self.kernel {
            Kernel::Identity => samples.to_vec(),
            Kernel::Linear => resample_linear(samples, self.source_rate, self.target_rate),
            Kernel::Sinc { inner, pending } => {
                pending.extend_from_slice(samples);
                let mut out = Vec::new();
                while pending.len() >= SINC_CHUNK {
                    let block: Vec<f32> = pending.drain(..SINC_CHUNK).collect();
                    match inner.process(std::slice::from_ref(&block), None) {
                        Ok(mut frames) => {
                            if let Some(ch) = frames.pop() {
                                out.extend_from_slice(&ch);
                            }
                        }
                        Err(e) => {
                            // The kernel rejected a block; degrade for the
                            // rest of the stream rather than dropping audio.
                            warn!("sinc resampler failed mid-stream ({e}); switching to linear");
                            out.extend(resample_linear(
                                &block,
                                self.source_rate,
                                self.target_rate,
                            ));
                            let leftover = std::mem::take(pending);
                            out.extend(resample_linear(
                                &leftover,
                                self.source_rate,
                                self.target_rate,
                            ));
                            self.kernel = Kernel::Linear;
                            return out;
                        }
                    }
                }
                out
            }
        }
    }

    /// Drain any samples still buffered inside the sinc kernel.  The tail is
    /// converted with linear interpolation since it is shorter than one
    /// block.
    pub fn flush(&mut self) -> Vec<f32> {
        match &mut self.kernel {
            Kernel::Sinc { pending, .. } => {
                let tail = std::mem::take(pending);
                resample_linear(&tail, self.source_rate, self.target_rate)
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
