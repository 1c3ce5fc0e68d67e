//! The in-memory recording engine.
//!
//! [`Recorder`] owns everything between a raw [`AudioChunk`] and a finished
//! WAV: downmix, resample, frame slicing, voice-activity scoring, event
//! segmentation and classification, plus the minute buffer that captures
//! the continuous stream independent of voice activity.  It performs no I/O
//! and holds no locks; the [`super::SessionManager`] wires it to capture,
//! timers and the ledger.
//!
//! The stream clock is derived purely from processed sample counts, so the
//! engine behaves identically under test and under live capture.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::audio::{encode_wav, AudioChunk, FrameQueue, MinuteBuffer, Resampler};
use crate::config::AppConfig;
use crate::vad::{
    EventClassifier, EventSegmenter, EventState, ExitReason, SegmenterConfig, Transition,
    VadScorer,
};

/// Seconds of audio the minute buffer can hold before evicting, twice the
/// drain interval so one missed timer tick loses nothing.
const MINUTE_BUFFER_FACTOR: u64 = 2;

// ---------------------------------------------------------------------------
// FinalizedEvent
// ---------------------------------------------------------------------------

/// A closed voice-activity event, classified and encoded.
#[derive(Debug)]
pub struct FinalizedEvent {
    /// Classifier label (e.g. `"snoring"`).
    pub label: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f32,
    /// Complete in-memory WAV.  May be empty when encoding failed; callers
    /// discard by byte size.
    pub wav_bytes: Vec<u8>,
    pub duration_secs: f32,
    /// Stream time at which the event opened.
    pub started_at_stream: Duration,
    pub reason: ExitReason,
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

pub struct Recorder {
    target_rate: u32,
    resampler: Option<Resampler>,
    frames: FrameQueue,
    minute: MinuteBuffer,
    segmenter: EventSegmenter,
    scorer: Box<dyn VadScorer>,
    classifier: Box<dyn EventClassifier>,
    /// Samples observed by the segmenter; drives the stream clock.
    observed_samples: u64,
    /// Resampled seconds not yet handed to the session counter.
    unclaimed_secs: f64,
    /// Wall-clock heartbeat for stall detection.
    last_chunk_at: Option<Instant>,
}

impl Recorder {
    pub fn new(
        config: &AppConfig,
        scorer: Box<dyn VadScorer>,
        classifier: Box<dyn EventClassifier>,
    ) -> Self {
        let target_rate = config.audio.target_sample_rate;
        let minute_capacity =
            (target_rate as u64 * config.persistence.segment_interval_secs * MINUTE_BUFFER_FACTOR)
                .max(1) as usize;
        Self {
            target_rate,
            resampler: None,
            frames: FrameQueue::new(config.audio.frame_len),
            minute: MinuteBuffer::new(minute_capacity),
            segmenter: EventSegmenter::new(SegmenterConfig::from(&config.vad)),
            scorer,
            classifier,
            observed_samples: 0,
            unclaimed_secs: 0.0,
            last_chunk_at: None,
        }
    }

    /// Stream time, derived from samples the segmenter has observed.
    pub fn stream_clock(&self) -> Duration {
        Duration::from_secs_f64(self.observed_samples as f64 / self.target_rate as f64)
    }

    /// Wall-clock age of the most recent chunk, `None` before the first.
    pub fn last_chunk_age(&self) -> Option<Duration> {
        self.last_chunk_at.map(|t| t.elapsed())
    }

    /// Whether an event is currently open.
    pub fn in_event(&self) -> bool {
        self.segmenter.state() == EventState::InEvent
    }

    /// Resampled seconds processed since the last call, for the session's
    /// recording-duration counter.
    pub fn take_processed_secs(&mut self) -> f64 {
        std::mem::take(&mut self.unclaimed_secs)
    }

    /// Feed one capture chunk through the pipeline.  Returns every event
    /// finalized while consuming it (usually zero or one).
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> Vec<FinalizedEvent> {
        self.last_chunk_at = Some(Instant::now());

        let mono = crate::audio::downmix_to_mono(&chunk.samples, chunk.channels);
        if mono.is_empty() {
            return Vec::new();
        }

        // Rebuild the resampler when the device rate changes (route change,
        // capture recovery onto a different device).
        let rebuild = self
            .resampler
            .as_ref()
            .map(|r| r.source_rate() != chunk.sample_rate)
            .unwrap_or(true);
        if rebuild {
            debug!(
                "resampler configured for {} Hz → {} Hz",
                chunk.sample_rate, self.target_rate
            );
            self.resampler = Some(Resampler::new(chunk.sample_rate, self.target_rate));
        }
        let resampled = match self.resampler.as_mut() {
            Some(r) => r.process(&mono),
            None => mono,
        };
        if resampled.is_empty() {
            return Vec::new();
        }

        self.unclaimed_secs += resampled.len() as f64 / self.target_rate as f64;
        self.minute.push_slice(&resampled);
        self.frames.push(&resampled);

        self.consume_frames()
    }

    fn consume_frames(&mut self) -> Vec<FinalizedEvent> {
        let mut finalized = Vec::new();
        while let Some(frame) = self.frames.next_frame() {
            self.observed_samples += frame.len() as u64;
            let now = self.stream_clock();
            let raw = self.scorer.score(&frame);
            match self.segmenter.observe(raw, &frame, now) {
                Transition::None => {}
                Transition::Entered { at } => {
                    info!("event opened at {:.1}s (p={:.2})", at.as_secs_f32(), self.segmenter.smoothed());
                }
                Transition::Finalized {
                    samples,
                    started_at,
                    reason,
                } => finalized.push(self.build_event(samples, started_at, reason)),
            }
        }
        finalized
    }

    fn build_event(
        &self,
        samples: Vec<f32>,
        started_at: Duration,
        reason: ExitReason,
    ) -> FinalizedEvent {
        let duration_secs = samples.len() as f32 / self.target_rate as f32;
        let (label, confidence) = self.classifier.classify(&samples);
        info!(
            "event closed ({reason}): {label} conf={confidence:.2} {duration_secs:.1}s"
        );
        let wav_bytes = encode_wav(&samples, self.target_rate);
        FinalizedEvent {
            label,
            confidence,
            wav_bytes,
            duration_secs,
            started_at_stream: started_at,
            reason,
        }
    }

    /// Drain the minute buffer into a WAV.  Returns `None` when the encoded
    /// artifact would be smaller than `min_bytes` (the audio is discarded
    /// either way, matching the drain timer's fixed cadence).
    pub fn drain_minute_wav(&mut self, min_bytes: u64) -> Option<(Vec<u8>, f32)> {
        let samples = self.minute.drain();
        if samples.is_empty() {
            return None;
        }
        let duration = samples.len() as f32 / self.target_rate as f32;
        let bytes = encode_wav(&samples, self.target_rate);
        if (bytes.len() as u64) < min_bytes {
            debug!("minute segment under {min_bytes} bytes; discarded");
            return None;
        }
        Some((bytes, duration))
    }

    /// Encode a copy of the open event's buffer without closing the event.
    /// Used as the crash-recovery fallback when the minute buffer has
    /// nothing but an event is in flight.
    pub fn event_snapshot_wav(&self) -> Option<(Vec<u8>, f32)> {
        if !self.in_event() {
            return None;
        }
        let samples = self.segmenter.snapshot();
        if samples.is_empty() {
            return None;
        }
        let duration = samples.len() as f32 / self.target_rate as f32;
        Some((encode_wav(&samples, self.target_rate), duration))
    }

    /// End-of-session flush.  The sub-frame queue tail and the resampler's
    /// unconverted remainder are folded into the open event (they already
    /// sit in the minute buffer, except the resampler remainder, which is
    /// appended there too), then the event is force-closed and returned.
    pub fn force_finalize(&mut self) -> Option<FinalizedEvent> {
        let mut tail = self.frames.take_all();
        if let Some(r) = self.resampler.as_mut() {
            let rest = r.flush();
            if !rest.is_empty() {
                self.unclaimed_secs += rest.len() as f64 / self.target_rate as f64;
                self.minute.push_slice(&rest);
                tail.extend(rest);
            }
        }
        if !tail.is_empty() {
            self.segmenter.absorb(&tail);
        }

        let (samples, started_at) = self.segmenter.force_take()?;
        Some(self.build_event(samples, started_at, ExitReason::Forced))
    }

    /// Minute-buffer fill level in seconds, for status logging.
    pub fn minute_buffered_secs(&self) -> f32 {
        self.minute.duration_secs(self.target_rate)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::SpectralRatioClassifier;

    /// Scorer returning a fixed probability, for deterministic pipelines.
    struct FixedScorer(f32);

    impl VadScorer for FixedScorer {
        fn score(&mut self, _frame: &[f32]) -> f32 {
            self.0
        }
    }

    fn test_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        // Disable smoothing so FixedScorer drives the segmenter directly.
        cfg.vad.smoothing_alpha = 1.0;
        cfg
    }

    fn recorder_with_score(p: f32) -> Recorder {
        Recorder::new(
            &test_config(),
            Box::new(FixedScorer(p)),
            Box::new(SpectralRatioClassifier::new()),
        )
    }

    fn chunk_16k(samples: Vec<f32>) -> AudioChunk {
        AudioChunk {
            samples,
            sample_rate: 16_000,
            channels: 1,
        }
    }

    #[test]
    fn five_minutes_of_silence_yields_drains_but_no_events() {
        let mut rec = recorder_with_score(0.0);
        let min_bytes = 1024u64;

        let mut drains = 0usize;
        let mut events = 0usize;
        for _minute in 0..5 {
            // One minute of near-silent audio in 1 s chunks.
            for _ in 0..60 {
                let finalized = rec.process_chunk(&chunk_16k(vec![0.001_f32; 16_000]));
                events += finalized.len();
            }
            if rec.drain_minute_wav(min_bytes).is_some() {
                drains += 1;
            }
        }

        assert_eq!(events, 0, "silence must never produce events");
        assert_eq!(drains, 5, "every minute must produce a continuous segment");
        assert!(!rec.in_event());
    }

    #[test]
    fn loud_audio_opens_event() {
        let mut rec = recorder_with_score(0.9);
        let finalized = rec.process_chunk(&chunk_16k(vec![0.5_f32; 16_000]));
        assert!(finalized.is_empty());
        assert!(rec.in_event());
    }

    /// Scorer that returns `first` for the first `n` frames, then `rest`.
    struct FlipScorer {
        first: f32,
        rest: f32,
        n: usize,
        seen: usize,
    }

    impl VadScorer for FlipScorer {
        fn score(&mut self, _frame: &[f32]) -> f32 {
            self.seen += 1;
            if self.seen <= self.n {
                self.first
            } else {
                self.rest
            }
        }
    }

    #[test]
    fn flip_scorer_closes_event() {
        let mut rec = Recorder::new(
            &test_config(),
            Box::new(FlipScorer {
                first: 0.9,
                rest: 0.0,
                n: 31, // ~1 s of 512-sample frames
                seen: 0,
            }),
            Box::new(SpectralRatioClassifier::new()),
        );

        // 2 s of audio: 1 s loud, 1 s silent per the scorer.
        let finalized = rec.process_chunk(&chunk_16k(vec![0.5_f32; 32_000]));
        assert_eq!(finalized.len(), 1);
        let ev = &finalized[0];
        assert_eq!(ev.reason, ExitReason::Silence);
        assert!(!ev.wav_bytes.is_empty());
        assert!(ev.duration_secs > 0.9, "event should span the loud second");
        assert!(!rec.in_event());
    }

    #[test]
    fn forced_flush_returns_every_buffered_sample() {
        let mut rec = recorder_with_score(0.9);
        // 10 000 samples is 19 full frames + 272 queued.
        let _ = rec.process_chunk(&chunk_16k(vec![0.4_f32; 10_000]));
        assert!(rec.in_event());

        let ev = rec.force_finalize().expect("open event");
        assert_eq!(ev.reason, ExitReason::Forced);
        // 19 scored frames plus the 272-sample unscored tail all land in
        // the forced event.
        assert_eq!(ev.wav_bytes.len(), 44 + 10_000 * 2);

        // The minute buffer still holds the full chunk, queue tail included.
        let (wav, _) = rec.drain_minute_wav(0).expect("minute audio");
        assert_eq!(wav.len(), 44 + 10_000 * 2);
    }

    #[test]
    fn minute_drain_discards_undersized_segments() {
        let mut rec = recorder_with_score(0.0);
        let _ = rec.process_chunk(&chunk_16k(vec![0.0_f32; 100]));

        // 100 samples encode to 244 bytes, under the 1024 minimum.
        assert!(rec.drain_minute_wav(1024).is_none());
        // The audio was discarded, not retained for the next drain.
        assert!(rec.drain_minute_wav(0).is_none());
    }

    #[test]
    fn event_snapshot_does_not_close_event() {
        let mut rec = recorder_with_score(0.9);
        let _ = rec.process_chunk(&chunk_16k(vec![0.4_f32; 16_000]));
        assert!(rec.in_event());

        let (wav, secs) = rec.event_snapshot_wav().expect("snapshot");
        assert!(!wav.is_empty());
        assert!(secs > 0.0);
        assert!(rec.in_event(), "snapshot must not close the event");
    }

    #[test]
    fn stream_clock_advances_with_observed_frames() {
        let mut rec = recorder_with_score(0.0);
        let _ = rec.process_chunk(&chunk_16k(vec![0.0_f32; 16_000]));
        // 31 full frames of 512 samples observed out of 16 000.
        let expected = Duration::from_secs_f64(31.0 * 512.0 / 16_000.0);
        assert_eq!(rec.stream_clock(), expected);
    }

    #[test]
    fn processed_secs_accumulates_and_drains() {
        let mut rec = recorder_with_score(0.0);
        let _ = rec.process_chunk(&chunk_16k(vec![0.0_f32; 16_000]));
        let secs = rec.take_processed_secs();
        assert!((secs - 1.0).abs() < 1e-6);
        assert_eq!(rec.take_processed_secs(), 0.0);
    }

    #[test]
    fn multichannel_input_is_downmixed_before_analysis() {
        let mut rec = recorder_with_score(0.0);
        let stereo = AudioChunk {
            samples: vec![0.2_f32; 32_000], // 1 s of stereo @ 16 kHz
            sample_rate: 16_000,
            channels: 2,
        };
        let _ = rec.process_chunk(&stereo);
        assert!((rec.take_processed_secs() - 1.0).abs() < 1e-6);
    }
}
