//! Per-frame voice-activity scoring.
//!
//! [`VadScorer`] is the seam where a model-backed detector (Silero or
//! similar) would plug in.  The built-in [`EnergyScorer`] maps frame RMS to
//! a pseudo-probability, which is plenty for sleep audio where the
//! interesting events (snoring, talking) are well above the noise floor.

// ---------------------------------------------------------------------------
// VadScorer
// ---------------------------------------------------------------------------

/// Scores one analysis frame with a voice-activity probability in `[0, 1]`.
///
/// Implementations may keep internal state across frames (hence `&mut`),
/// and must be `Send` so the scorer can live on the processing thread.
pub trait VadScorer: Send {
    /// Probability that `frame` contains voice-like activity.
    fn score(&mut self, frame: &[f32]) -> f32;

    /// Reset any internal state between sessions.  Default: no-op.
    fn reset(&mut self) {}
}

// ---------------------------------------------------------------------------
// EnergyScorer
// ---------------------------------------------------------------------------

/// RMS-energy scorer.
///
/// Maps the frame's RMS level in dBFS onto `[0, 1]` linearly between a
/// floor (silence) and a ceiling (clearly audible activity).  With the
/// default window of -50..-20 dBFS a quiet bedroom scores near 0 and a
/// snore within arm's reach of the phone scores near 1.
pub struct EnergyScorer {
    floor_db: f32,
    ceil_db: f32,
}

impl EnergyScorer {
    pub fn new() -> Self {
        Self {
            floor_db: -50.0,
            ceil_db: -20.0,
        }
    }

    /// Custom dBFS window (useful for tests and noisy environments).
    pub fn with_window(floor_db: f32, ceil_db: f32) -> Self {
        assert!(floor_db < ceil_db, "floor must be below ceiling");
        Self { floor_db, ceil_db }
    }

    fn rms_db(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return f32::NEG_INFINITY;
        }
        let mean_sq = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        if mean_sq <= 0.0 {
            return f32::NEG_INFINITY;
        }
        10.0 * mean_sq.log10()
    }
}

impl Default for EnergyScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl VadScorer for EnergyScorer {
    fn score(&mut self, frame: &[f32]) -> f32 {
        let db = Self::rms_db(frame);
        if !db.is_finite() {
            return 0.0;
        }
        ((db - self.floor_db) / (self.ceil_db - self.floor_db)).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_scores_zero() {
        let mut scorer = EnergyScorer::new();
        assert_eq!(scorer.score(&vec![0.0_f32; 512]), 0.0);
        assert_eq!(scorer.score(&[]), 0.0);
    }

    #[test]
    fn loud_frame_scores_one() {
        let mut scorer = EnergyScorer::new();
        let frame = vec![0.8_f32; 512];
        assert_eq!(scorer.score(&frame), 1.0);
    }

    #[test]
    fn quiet_frame_scores_between() {
        let mut scorer = EnergyScorer::new();
        // RMS 0.01 ≈ -40 dBFS, inside the -50..-20 window.
        let frame = vec![0.01_f32; 512];
        let p = scorer.score(&frame);
        assert!(p > 0.0 && p < 1.0, "expected mid-range score, got {p}");
    }

    #[test]
    fn score_is_monotone_in_level() {
        let mut scorer = EnergyScorer::new();
        let quiet = scorer.score(&vec![0.005_f32; 512]);
        let mid = scorer.score(&vec![0.02_f32; 512]);
        let loud = scorer.score(&vec![0.1_f32; 512]);
        assert!(quiet < mid && mid < loud);
    }

    #[test]
    #[should_panic(expected = "floor must be below ceiling")]
    fn inverted_window_panics() {
        EnergyScorer::with_window(-10.0, -40.0);
    }
}
