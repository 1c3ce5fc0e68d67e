//! Hysteresis event segmentation.
//!
//! Consumes one smoothed voice-activity observation per frame and decides
//! when an audio event opens and closes.  The segmenter is a pure state
//! machine driven by a caller-supplied stream clock (a `Duration` derived
//! from the number of samples processed), so its behaviour is fully
//! deterministic and testable without hardware or wall time.
//!
//! ## Algorithm
//!
//! Raw per-frame probabilities are smoothed with an EMA.  An event opens
//! when the smoothed value reaches `enter`; while open, every frame is
//! appended to the event buffer.  The event closes when `min_silence` has
//! passed since the last frame at or above `exit`, or when the event
//! reaches `max_event` length.  The band between `exit` and `enter` is
//! sticky in both directions: it neither opens a closed event nor counts as
//! silence inside an open one.

use std::time::Duration;

use crate::config::VadConfig;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tuning parameters for the segmenter.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// EMA factor applied to raw probabilities (1.0 disables smoothing).
    pub smoothing_alpha: f32,
    /// Smoothed probability that opens an event.
    pub enter: f32,
    /// Smoothed probability below which silence accumulates.
    pub exit: f32,
    /// Continuous sub-`exit` time required to close an event.
    pub min_silence: Duration,
    /// Hard cap on event length.
    pub max_event: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from(&VadConfig::default())
    }
}

impl From<&VadConfig> for SegmenterConfig {
    fn from(cfg: &VadConfig) -> Self {
        Self {
            smoothing_alpha: cfg.smoothing_alpha,
            enter: cfg.enter_threshold,
            exit: cfg.exit_threshold,
            min_silence: Duration::from_secs_f32(cfg.min_silence_secs),
            max_event: Duration::from_secs_f32(cfg.max_event_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// State / transitions
// ---------------------------------------------------------------------------

/// Segmentation state, exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// No event open.
    Silent,
    /// An event is being collected.
    InEvent,
}

/// Why an open event was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Smoothed probability stayed below `exit` for `min_silence`.
    Silence,
    /// Event hit the `max_event` cap.
    MaxDuration,
    /// Session ended or a higher layer demanded a flush.
    Forced,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silence => write!(f, "silence"),
            Self::MaxDuration => write!(f, "max-duration"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Outcome of observing one frame.
#[derive(Debug)]
pub enum Transition {
    /// No state change.
    None,
    /// An event opened at the given stream time.
    Entered { at: Duration },
    /// An event closed; `samples` is the full event buffer.
    Finalized {
        samples: Vec<f32>,
        started_at: Duration,
        reason: ExitReason,
    },
}

// ---------------------------------------------------------------------------
// EventSegmenter
// ---------------------------------------------------------------------------

/// Per-frame hysteresis segmenter.  See the module docs for the algorithm.
pub struct EventSegmenter {
    config: SegmenterConfig,
    smoothed: f32,
    state: EventState,
    /// Stream time at which the open event began.
    started_at: Duration,
    /// Stream time of the last frame whose smoothed value was at or above
    /// `exit`; silence is measured from here.
    last_voice_at: Duration,
    buffer: Vec<f32>,
}

impl EventSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            smoothed: 0.0,
            state: EventState::Silent,
            started_at: Duration::ZERO,
            last_voice_at: Duration::ZERO,
            buffer: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> EventState {
        self.state
    }

    /// Current smoothed probability.
    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    /// Number of samples buffered for the open event.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Copy of the open event's buffer without closing the event.  Used for
    /// crash-recovery snapshots.
    pub fn snapshot(&self) -> Vec<f32> {
        self.buffer.clone()
    }

    /// Observe one frame.
    ///
    /// `raw` is the scorer's probability for `frame`; `now` is the stream
    /// clock *after* this frame (samples processed / sample rate).
    pub fn observe(&mut self, raw: f32, frame: &[f32], now: Duration) -> Transition {
        let a = self.config.smoothing_alpha;
        self.smoothed = a * raw + (1.0 - a) * self.smoothed;

        match self.state {
            EventState::Silent => {
                if self.smoothed >= self.config.enter {
                    self.state = EventState::InEvent;
                    self.started_at = now;
                    self.last_voice_at = now;
                    self.buffer.extend_from_slice(frame);
                    Transition::Entered { at: now }
                } else {
                    Transition::None
                }
            }
            EventState::InEvent => {
                self.buffer.extend_from_slice(frame);

                if now.saturating_sub(self.started_at) >= self.config.max_event {
                    return self.finalize(ExitReason::MaxDuration);
                }

                if self.smoothed >= self.config.exit {
                    self.last_voice_at = now;
                } else if now.saturating_sub(self.last_voice_at) >= self.config.min_silence {
                    return self.finalize(ExitReason::Silence);
                }

                Transition::None
            }
        }
    }

    /// Append unscored samples to the open event's buffer (a sub-frame tail
    /// or resampler remainder at flush time).  No-op while silent.
    pub fn absorb(&mut self, samples: &[f32]) {
        if self.state == EventState::InEvent {
            self.buffer.extend_from_slice(samples);
        }
    }

    /// Close the open event immediately, returning its buffer.  `None` when
    /// no event is open.
    pub fn force_take(&mut self) -> Option<(Vec<f32>, Duration)> {
        if self.state != EventState::InEvent {
            return None;
        }
        let started_at = self.started_at;
        match self.finalize(ExitReason::Forced) {
            Transition::Finalized { samples, .. } => Some((samples, started_at)),
            _ => None,
        }
    }

    /// Reset to the silent state, discarding any buffered event audio and
    /// the EMA history.
    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.state = EventState::Silent;
        self.buffer.clear();
    }

    fn finalize(&mut self, reason: ExitReason) -> Transition {
        let samples = std::mem::take(&mut self.buffer);
        let started_at = self.started_at;
        self.state = EventState::Silent;
        Transition::Finalized {
            samples,
            started_at,
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 512;
    const RATE: u32 = 16_000;

    /// Config with smoothing disabled so raw scores drive the machine
    /// directly.
    fn raw_config() -> SegmenterConfig {
        SegmenterConfig {
            smoothing_alpha: 1.0,
            ..SegmenterConfig::default()
        }
    }

    fn clock(frame_index: usize) -> Duration {
        Duration::from_secs_f64((frame_index + 1) as f64 * FRAME as f64 / RATE as f64)
    }

    /// Drive `seg` with a constant score for `n` frames starting at
    /// `start_frame`, returning the first non-`None` transition.
    fn drive(
        seg: &mut EventSegmenter,
        score: f32,
        start_frame: usize,
        n: usize,
    ) -> (Option<Transition>, usize) {
        let frame = vec![0.1_f32; FRAME];
        for i in start_frame..start_frame + n {
            match seg.observe(score, &frame, clock(i)) {
                Transition::None => {}
                t => return (Some(t), i + 1),
            }
        }
        (None, start_frame + n)
    }

    // ---- Hysteresis --------------------------------------------------------

    #[test]
    fn score_between_thresholds_never_opens() {
        let mut seg = EventSegmenter::new(raw_config());
        // 0.32 and 0.34 sit inside the hysteresis band.
        let (t, next) = drive(&mut seg, 0.32, 0, 100);
        assert!(t.is_none());
        let (t, _) = drive(&mut seg, 0.34, next, 100);
        assert!(t.is_none());
        assert_eq!(seg.state(), EventState::Silent);
        assert_eq!(seg.buffered_samples(), 0);
    }

    #[test]
    fn score_exactly_at_enter_threshold_opens() {
        let mut seg = EventSegmenter::new(raw_config());
        let frame = vec![0.1_f32; FRAME];
        // The enter gate is inclusive: 0.35 opens an event.
        assert!(matches!(
            seg.observe(0.35, &frame, clock(0)),
            Transition::Entered { .. }
        ));
        assert_eq!(seg.buffered_samples(), FRAME);
    }

    #[test]
    fn in_band_score_keeps_event_open() {
        let mut seg = EventSegmenter::new(raw_config());
        let (t, next) = drive(&mut seg, 0.5, 0, 1);
        assert!(matches!(t, Some(Transition::Entered { .. })));

        // 0.32 is below enter but above exit; the open event must persist.
        let (t, _) = drive(&mut seg, 0.32, next, 200);
        assert!(t.is_none());
        assert_eq!(seg.state(), EventState::InEvent);
    }

    #[test]
    fn closes_after_min_silence_below_exit() {
        let mut seg = EventSegmenter::new(raw_config());
        let (_, next) = drive(&mut seg, 0.5, 0, 10);

        // 0.2 s of silence elapses 7 frames after the last voiced frame.
        let (t, _) = drive(&mut seg, 0.1, next, 20);
        match t {
            Some(Transition::Finalized { reason, samples, .. }) => {
                assert_eq!(reason, ExitReason::Silence);
                assert!(!samples.is_empty());
            }
            other => panic!("expected silence finalize, got {other:?}"),
        }
        assert_eq!(seg.state(), EventState::Silent);
    }

    #[test]
    fn silence_is_timed_from_last_voiced_frame() {
        let mut seg = EventSegmenter::new(raw_config());
        let frame = vec![0.1_f32; FRAME];
        // Enter on frame 0; the last voiced frame is also frame 0.
        assert!(matches!(
            seg.observe(0.5, &frame, clock(0)),
            Transition::Entered { .. }
        ));

        // 200 ms from clock(0) elapses at frame 7 (7 * 32 ms = 224 ms);
        // frames 1-6 stay open.
        for i in 1..7 {
            assert!(matches!(
                seg.observe(0.1, &frame, clock(i)),
                Transition::None
            ));
        }
        assert!(matches!(
            seg.observe(0.1, &frame, clock(7)),
            Transition::Finalized {
                reason: ExitReason::Silence,
                ..
            }
        ));
    }

    #[test]
    fn brief_dip_below_exit_does_not_close() {
        let mut seg = EventSegmenter::new(raw_config());
        let (_, next) = drive(&mut seg, 0.5, 0, 10);

        // 3 frames ≈ 96 ms below exit, shorter than the 200 ms requirement.
        let (t, next) = drive(&mut seg, 0.1, next, 3);
        assert!(t.is_none());

        // Recover above exit; the silence clock must reset.
        let (t, next) = drive(&mut seg, 0.5, next, 5);
        assert!(t.is_none());
        let (t, _) = drive(&mut seg, 0.1, next, 3);
        assert!(t.is_none());
        assert_eq!(seg.state(), EventState::InEvent);
    }

    // ---- Max duration ------------------------------------------------------

    #[test]
    fn sustained_activity_splits_at_cap_and_reopens() {
        let mut seg = EventSegmenter::new(raw_config());
        // 60 s at 32 ms/frame is 1875 frames; drive well past that.
        let (t, next) = drive(&mut seg, 0.9, 0, 1);
        assert!(matches!(t, Some(Transition::Entered { .. })));

        let (t, next) = drive(&mut seg, 0.9, next, 2_000);
        let first_len = match t {
            Some(Transition::Finalized { reason, samples, .. }) => {
                assert_eq!(reason, ExitReason::MaxDuration);
                samples.len()
            }
            other => panic!("expected max-duration finalize, got {other:?}"),
        };
        // Roughly 60 s of samples.
        assert!(first_len.abs_diff(60 * RATE as usize) <= FRAME * 2);

        // Activity continues, so a new event opens immediately.
        let (t, _) = drive(&mut seg, 0.9, next, 2);
        assert!(matches!(t, Some(Transition::Entered { .. })));
    }

    // ---- Smoothing ---------------------------------------------------------

    #[test]
    fn ema_delays_entry() {
        let cfg = SegmenterConfig {
            smoothing_alpha: 0.2,
            ..SegmenterConfig::default()
        };
        let mut seg = EventSegmenter::new(cfg);
        let frame = vec![0.1_f32; FRAME];

        // First frame of raw 1.0 only brings the EMA to 0.2, below enter.
        assert!(matches!(
            seg.observe(1.0, &frame, clock(0)),
            Transition::None
        ));
        assert!((seg.smoothed() - 0.2).abs() < 1e-6);

        // Second frame brings the EMA to 0.36, crossing the 0.35 gate.
        assert!(matches!(
            seg.observe(1.0, &frame, clock(1)),
            Transition::Entered { .. }
        ));
    }

    // ---- Forced flush ------------------------------------------------------

    /// Feed `n` frames of constant `score`, asserting no event closes.
    fn fill_event(seg: &mut EventSegmenter, score: f32, n: usize) {
        let frame = vec![0.1_f32; FRAME];
        for i in 0..n {
            assert!(!matches!(
                seg.observe(score, &frame, clock(i)),
                Transition::Finalized { .. }
            ));
        }
    }

    #[test]
    fn force_take_returns_all_buffered_samples() {
        let mut seg = EventSegmenter::new(raw_config());
        fill_event(&mut seg, 0.5, 12);
        assert_eq!(seg.buffered_samples(), 12 * FRAME);

        let (samples, _started) = seg.force_take().expect("open event");
        assert_eq!(samples.len(), 12 * FRAME);
        assert_eq!(seg.state(), EventState::Silent);
        assert!(seg.force_take().is_none());
    }

    #[test]
    fn absorb_folds_tail_into_open_event() {
        let mut seg = EventSegmenter::new(raw_config());
        fill_event(&mut seg, 0.5, 2);

        seg.absorb(&[0.2_f32; 100]);
        let (samples, _) = seg.force_take().expect("open event");
        assert_eq!(samples.len(), 2 * FRAME + 100);

        // Absorb while silent is a no-op.
        seg.absorb(&[0.2_f32; 100]);
        assert_eq!(seg.buffered_samples(), 0);
    }

    #[test]
    fn snapshot_does_not_close_event() {
        let mut seg = EventSegmenter::new(raw_config());
        fill_event(&mut seg, 0.5, 4);

        let snap = seg.snapshot();
        assert_eq!(snap.len(), 4 * FRAME);
        assert_eq!(seg.state(), EventState::InEvent);
        assert_eq!(seg.buffered_samples(), 4 * FRAME);
    }

    #[test]
    fn reset_discards_state() {
        let mut seg = EventSegmenter::new(raw_config());
        let (_, _) = drive(&mut seg, 0.5, 0, 4);
        seg.reset();
        assert_eq!(seg.state(), EventState::Silent);
        assert_eq!(seg.buffered_samples(), 0);
        assert_eq!(seg.smoothed(), 0.0);
    }
}
