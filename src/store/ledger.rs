//! Session ledger: the persistent record of sessions, audio artifacts and
//! events, written through the layered store after every mutation.
//!
//! ## Recovery contract
//!
//! [`Ledger::recover`] runs on startup and must be idempotent: it loads the
//! active session (discarding it when stale), migrates legacy absolute
//! artifact paths to data-dir-relative ones, validates every ledger entry
//! against the file on disk, drops entries whose file is missing or
//! undecodable, and persists the cleaned state.  Running it twice in a row
//! yields the same ledger.

use chrono::{DateTime, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::audio::{validate_wav_file, WavRejection};
use crate::config::{PersistenceConfig, StoragePaths};
use crate::session::{AudioFileEntry, EventSegment, SleepSession};

use super::backing::{LayeredStore, StoreError};

const KEY_SESSION: &str = "active_session";
const KEY_AUDIO: &str = "audio_ledger";

fn events_key(session_id: &Uuid) -> String {
    format!("session_{}_events", session_id.simple())
}

// ---------------------------------------------------------------------------
// RecoveryReport
// ---------------------------------------------------------------------------

/// What [`Ledger::recover`] found and fixed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// An unfinished session was found and resumed.
    pub session_resumed: bool,
    /// An unfinished session was found but discarded as stale.
    pub session_discarded_stale: bool,
    /// Ledger entries whose artifact passed validation.
    pub files_recovered: usize,
    /// Ledger entries dropped because the artifact is gone from disk.
    pub files_missing: usize,
    /// Ledger entries dropped because the artifact exists but is unusable
    /// (tiny, bad header, undecodable) or its path could not be migrated.
    pub files_broken: usize,
    /// Entries whose absolute path was rewritten relative.
    pub paths_migrated: usize,
    /// Events loaded for the resumed session.
    pub events_recovered: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    paths: StoragePaths,
    store: LayeredStore,
    cfg: PersistenceConfig,
    session: Option<SleepSession>,
    audio_files: Vec<AudioFileEntry>,
    /// Events of the active (or resumed) session.
    events: Vec<EventSegment>,
}

impl Ledger {
    pub fn new(paths: StoragePaths, store: LayeredStore, cfg: PersistenceConfig) -> Self {
        Self {
            paths,
            store,
            cfg,
            session: None,
            audio_files: Vec::new(),
            events: Vec::new(),
        }
    }

    // ---------- Session lifecycle ----------

    /// Start a new session and persist it.  Any previous in-memory session
    /// state is replaced; the audio-file ledger is kept.
    pub fn begin_session(&mut self) -> Result<SleepSession, StoreError> {
        let session = SleepSession::begin();
        info!("session {} started", session.short_id());
        self.session = Some(session.clone());
        self.events.clear();
        self.persist_session()?;
        Ok(session)
    }

    pub fn session(&self) -> Option<&SleepSession> {
        self.session.as_ref()
    }

    /// Add processed-audio seconds to the active session's counter.  Not
    /// persisted on its own; the heartbeat backup picks it up.
    pub fn add_recording_secs(&mut self, secs: f64) {
        if let Some(s) = self.session.as_mut() {
            s.recording_secs += secs;
        }
    }

    /// End the active session cleanly.  The session record is stamped and
    /// the active-session key is cleared; the audio-file ledger and the
    /// per-session event manifest are retained for later upload.
    pub fn end_session(&mut self) -> Result<(), StoreError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.ended_at = Some(Utc::now());
        info!(
            "session {} ended after {:.1}s of audio, {} events",
            session.short_id(),
            session.recording_secs,
            self.events.len()
        );
        self.persist_events_for(&session.id)?;
        self.persist_audio_files()?;
        self.store.remove(KEY_SESSION);
        Ok(())
    }

    // ---------- Artifact / event records ----------

    /// Record one WAV artifact and persist the audio ledger.
    pub fn record_audio_file(&mut self, entry: AudioFileEntry) -> Result<(), StoreError> {
        self.audio_files.push(entry);
        self.persist_audio_files()
    }

    /// Record one finalized event and persist the session's event manifest.
    pub fn record_event(&mut self, event: EventSegment) -> Result<(), StoreError> {
        let session_id = event.session_id;
        self.events.push(event);
        self.persist_events_for(&session_id)
    }

    pub fn audio_files(&self) -> &[AudioFileEntry] {
        &self.audio_files
    }

    pub fn events(&self) -> &[EventSegment] {
        &self.events
    }

    /// Resolve an entry's artifact to an absolute path under the current
    /// data root.
    pub fn resolve_entry(&self, entry: &AudioFileEntry) -> std::path::PathBuf {
        self.paths.resolve(&entry.relative_path)
    }

    /// Mark artifacts as uploaded by file name.  Returns how many matched.
    pub fn mark_uploaded(&mut self, file_names: &[String]) -> Result<usize, StoreError> {
        let mut matched = 0usize;
        for entry in &mut self.audio_files {
            if file_names.contains(&entry.file_name) && !entry.is_uploaded {
                entry.is_uploaded = true;
                matched += 1;
            }
        }
        if matched > 0 {
            self.persist_audio_files()?;
        }
        Ok(matched)
    }

    // ---------- Persistence ----------

    /// Heartbeat backup: write every piece of live state through all layers.
    pub fn persist_all(&self) -> Result<(), StoreError> {
        self.persist_session()?;
        self.persist_audio_files()?;
        if let Some(s) = &self.session {
            self.persist_events_for(&s.id)?;
        }
        Ok(())
    }

    fn persist_session(&self) -> Result<(), StoreError> {
        if let Some(s) = &self.session {
            let bytes = serde_json::to_vec_pretty(s).map_err(into_io)?;
            self.store.put(KEY_SESSION, &bytes)?;
        }
        Ok(())
    }

    fn persist_audio_files(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.audio_files).map_err(into_io)?;
        self.store.put(KEY_AUDIO, &bytes)
    }

    fn persist_events_for(&self, session_id: &Uuid) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.events).map_err(into_io)?;
        self.store.put(&events_key(session_id), &bytes)
    }

    // ---------- Recovery ----------

    /// Startup recovery.  See the module docs for the contract.
    pub fn recover(&mut self, now: DateTime<Utc>) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        // 1. Active session, discarded when stale.
        if let Some((bytes, source)) = self.store.get(KEY_SESSION) {
            match serde_json::from_slice::<SleepSession>(&bytes) {
                Ok(session) => {
                    if session.is_stale(now, self.cfg.stale_session_hours) {
                        warn!(
                            "discarding stale session {} (started {})",
                            session.short_id(),
                            session.started_at
                        );
                        self.store.remove(KEY_SESSION);
                        report.session_discarded_stale = true;
                    } else {
                        info!("resuming session {} from {source} store", session.short_id());
                        self.session = Some(session);
                        report.session_resumed = true;
                    }
                }
                Err(e) => {
                    warn!("active session record corrupted ({e}); dropping");
                    self.store.remove(KEY_SESSION);
                }
            }
        }

        // 2. Audio ledger: migrate legacy paths, validate artifacts.
        if let Some((bytes, source)) = self.store.get(KEY_AUDIO) {
            match serde_json::from_slice::<Vec<AudioFileEntry>>(&bytes) {
                Ok(entries) => {
                    info!("audio ledger loaded from {source} store ({} entries)", entries.len());
                    self.audio_files = self.validate_entries(entries, &mut report);
                }
                Err(e) => {
                    warn!("audio ledger corrupted ({e}); starting empty");
                    self.audio_files = Vec::new();
                }
            }
        }

        // 3. Events of the resumed session.
        if let Some(id) = self.session.as_ref().map(|s| s.id) {
            if let Some((bytes, _)) = self.store.get(&events_key(&id)) {
                match serde_json::from_slice::<Vec<EventSegment>>(&bytes) {
                    Ok(events) => {
                        report.events_recovered = events.len();
                        self.events = events;
                    }
                    Err(e) => warn!("event manifest corrupted ({e}); starting empty"),
                }
            }
        }

        // 4. Write the cleaned state back so a second recovery is a no-op.
        self.persist_all()?;
        Ok(report)
    }

    fn validate_entries(
        &self,
        entries: Vec<AudioFileEntry>,
        report: &mut RecoveryReport,
    ) -> Vec<AudioFileEntry> {
        let mut kept = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if entry.needs_path_migration() {
                match StoragePaths::file_name_of(&entry.relative_path) {
                    Some(name) => {
                        entry.relative_path = StoragePaths::relative_recording(&name);
                        entry.file_name = name;
                        report.paths_migrated += 1;
                    }
                    None => {
                        warn!("unmigratable path {:?}; entry dropped", entry.relative_path);
                        report.files_broken += 1;
                        continue;
                    }
                }
            }

            let abs = self.paths.resolve(&entry.relative_path);
            match validate_wav_file(&abs, self.cfg.min_artifact_bytes) {
                Ok(duration) => {
                    entry.duration_secs = duration;
                    report.files_recovered += 1;
                    kept.push(entry);
                }
                Err(WavRejection::Missing) => {
                    warn!("dropping ledger entry {}: file is gone", entry.file_name);
                    report.files_missing += 1;
                }
                Err(reason) => {
                    warn!("dropping ledger entry {}: {reason}", entry.file_name);
                    report.files_broken += 1;
                }
            }
        }
        kept
    }

    // ---------- Maintenance ----------

    /// Delete WAV files in the recordings dir smaller than the artifact
    /// minimum.  Returns how many were removed.
    pub fn cleanup_undersized_files(&self) -> usize {
        let mut removed = 0usize;
        let entries = match std::fs::read_dir(&self.paths.recordings_dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_wav = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if !is_wav {
                continue;
            }
            let small = entry
                .metadata()
                .map(|m| m.len() < self.cfg.min_artifact_bytes)
                .unwrap_or(false);
            if small && std::fs::remove_file(&path).is_ok() {
                info!("removed undersized artifact {:?}", path.file_name());
                removed += 1;
            }
        }
        removed
    }

    /// Delete artifacts already confirmed uploaded and drop their ledger
    /// entries.  Returns how many were pruned.
    pub fn prune_uploaded(&mut self) -> Result<usize, StoreError> {
        let (uploaded, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.audio_files)
            .into_iter()
            .partition(|e| e.is_uploaded);

        let pruned = uploaded.len();
        for entry in uploaded {
            let abs = self.paths.resolve(&entry.relative_path);
            if let Err(e) = std::fs::remove_file(&abs) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not prune {}: {e}", entry.file_name);
                }
            }
        }
        self.audio_files = kept;
        if pruned > 0 {
            self.persist_audio_files()?;
        }
        Ok(pruned)
    }

    /// Delete artifacts that were never uploaded and drop their ledger
    /// entries, keeping the uploaded history.  Runs when a fresh session
    /// starts so recordings from an abandoned night do not accumulate.
    /// Returns how many were removed.
    pub fn clear_unuploaded(&mut self) -> Result<usize, StoreError> {
        let (local, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.audio_files)
            .into_iter()
            .partition(|e| !e.is_uploaded);

        let removed = local.len();
        for entry in local {
            let abs = self.paths.resolve(&entry.relative_path);
            if let Err(e) = std::fs::remove_file(&abs) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove {}: {e}", entry.file_name);
                }
            }
        }
        self.audio_files = kept;
        if removed > 0 {
            self.persist_audio_files()?;
        }
        Ok(removed)
    }

    /// Re-check every ledger entry against disk without mutating anything.
    /// Returns `(valid, broken)` counts.
    pub fn integrity_report(&self) -> (usize, usize) {
        let mut valid = 0usize;
        let mut broken = 0usize;
        for entry in &self.audio_files {
            let abs = self.paths.resolve(&entry.relative_path);
            match validate_wav_file(&abs, self.cfg.min_artifact_bytes) {
                Ok(_) => valid += 1,
                Err(_) => broken += 1,
            }
        }
        (valid, broken)
    }
}

fn into_io(e: serde_json::Error) -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
