//! Data model for sleep-tracking sessions and their artifacts.
//!
//! Everything here is plain serde data, persisted as JSON by the store
//! layer.  [`AudioFileEntry`] deliberately stores only a data-dir-relative
//! path; the absolute location is resolved at read time via
//! [`crate::config::StoragePaths::resolve`] so records survive a change of
//! data root between installs.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SleepSession
// ---------------------------------------------------------------------------

/// One tracking session, from "start tracking" to "stop tracking".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Set when the session ends cleanly; `None` while active or after a
    /// crash.
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds of audio actually processed, accumulated across pauses and
    /// capture recoveries.
    pub recording_secs: f64,
}

impl SleepSession {
    pub fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            recording_secs: 0.0,
        }
    }

    /// A session without a clean end that started longer ago than
    /// `max_age_hours` is stale and must not be resumed on restart.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age_hours: i64) -> bool {
        self.ended_at.is_none() && now - self.started_at > ChronoDuration::hours(max_age_hours)
    }

    /// Short id used in file names, first 8 hex chars of the UUID.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

// ---------------------------------------------------------------------------
// AudioFileEntry
// ---------------------------------------------------------------------------

/// Ledger record for one WAV artifact on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFileEntry {
    /// Bare file name, e.g. `sleep_audio_local_1a2b3c4d_003.wav`.
    pub file_name: String,
    /// Path relative to the data dir, e.g. `recordings/…wav`.  Never
    /// absolute.
    pub relative_path: String,
    pub session_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub duration_secs: f32,
    pub bytes: u64,
    /// Whether a sync layer has confirmed upload.  Uploaded entries are
    /// eligible for local pruning.
    #[serde(default)]
    pub is_uploaded: bool,
}

impl AudioFileEntry {
    /// True when the stored path is absolute (a record written by an older
    /// build) and needs migration to a relative path.
    pub fn needs_path_migration(&self) -> bool {
        std::path::Path::new(&self.relative_path).is_absolute()
    }
}

// ---------------------------------------------------------------------------
// EventSegment
// ---------------------------------------------------------------------------

/// One finalized voice-activity event inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSegment {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Classifier label, e.g. `"snoring"` or `"talking"`.
    pub label: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f32,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f32,
    /// File name of the WAV artifact holding this event's audio.
    pub file_name: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
