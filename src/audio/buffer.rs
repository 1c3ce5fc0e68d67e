//! Sample buffering for the analysis pipeline.
//!
//! Two buffer shapes are needed:
//!
//! * [`FrameQueue`] — accumulates resampled mono audio and yields
//!   fixed-length analysis frames (any tail shorter than one frame stays
//!   queued until more audio arrives or the stream is force-drained).
//! * [`MinuteBuffer`] — collects *all* audio between periodic drains,
//!   independent of voice activity.  Bounded so a stuck drain timer cannot
//!   grow memory without limit; on overflow the oldest samples are dropped.

use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// FrameQueue
// ---------------------------------------------------------------------------

/// Accumulates mono samples and slices them into exact fixed-length frames.
///
/// # Example
///
/// ```rust
/// use somnoscope::audio::FrameQueue;
///
/// let mut q = FrameQueue::new(512);
/// q.push(&[0.0; 700]);
/// assert!(q.next_frame().is_some()); // one full frame of 512
/// assert!(q.next_frame().is_none()); // 188 samples remain queued
/// assert_eq!(q.pending(), 188);
/// ```
pub struct FrameQueue {
    frame_len: usize,
    queue: Vec<f32>,
}

impl FrameQueue {
    /// Create a queue producing frames of `frame_len` samples.
    ///
    /// # Panics
    ///
    /// Panics if `frame_len == 0`.
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "FrameQueue frame_len must be > 0");
        Self {
            frame_len,
            queue: Vec::with_capacity(frame_len * 4),
        }
    }

    /// Append samples to the queue.
    pub fn push(&mut self, samples: &[f32]) {
        self.queue.extend_from_slice(samples);
    }

    /// Pop the next full frame, or `None` when fewer than `frame_len`
    /// samples are queued.
    pub fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.queue.len() < self.frame_len {
            return None;
        }
        let frame: Vec<f32> = self.queue.drain(..self.frame_len).collect();
        Some(frame)
    }

    /// Number of samples queued below one full frame boundary plus any
    /// complete frames not yet popped.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Remove and return everything queued, including the partial tail.
    pub fn take_all(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.queue)
    }

    /// Frame length in samples.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

// ---------------------------------------------------------------------------
// MinuteBuffer
// ---------------------------------------------------------------------------

/// Bounded accumulator for the continuous-segment stream.
///
/// Every sample that reaches the pipeline is appended here regardless of
/// voice activity; a periodic timer drains it into a WAV segment.  When the
/// bound is exceeded the oldest samples are discarded so the most recent
/// audio survives.
pub struct MinuteBuffer {
    buf: VecDeque<f32>,
    capacity: usize,
}

impl MinuteBuffer {
    /// Create a buffer holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MinuteBuffer capacity must be > 0");
        Self {
            buf: VecDeque::with_capacity(capacity.min(1 << 20)),
            capacity,
        }
    }

    /// Append samples, evicting from the front on overflow.
    pub fn push_slice(&mut self, samples: &[f32]) {
        for &s in samples {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
            }
            self.buf.push_back(s);
        }
    }

    /// Drain all stored samples in chronological order and reset the buffer.
    pub fn drain(&mut self) -> Vec<f32> {
        self.buf.drain(..).collect()
    }

    /// Number of samples currently stored.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum number of samples the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered duration in seconds, assuming `sample_rate` Hz mono.
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.buf.len() as f32 / sample_rate as f32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
