//! Session orchestration.
//!
//! [`SessionManager`] wires the capture stream to the [`Recorder`] and the
//! [`Ledger`]: a dedicated capture thread owns the cpal stream (the stream
//! handle is not `Send` on every platform), a processing thread consumes
//! [`AudioChunk`]s, and the lifecycle guard calls back in for periodic
//! flushes, health checks and recovery.
//!
//! The manager is constructed and owned by the caller; nothing here is a
//! global.  All pure session logic (`begin_session`, `process_chunk`,
//! `flush_minute_segment`, `finalize_session`) works without hardware,
//! which is how the tests drive it.
//!
//! Locking is sequential by design: the recorder lock is always released
//! before the ledger lock is taken, so the two can never deadlock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use uuid::Uuid;

use crate::audio::{validate_wav_file, AudioCapture, AudioChunk};
use crate::config::{AppConfig, StoragePaths};
use crate::store::{LayeredStore, Ledger, RecoveryReport};
use crate::vad::{EnergyScorer, EventClassifier, SpectralRatioClassifier, VadScorer};

use super::models::{AudioFileEntry, EventSegment};
use super::recorder::{FinalizedEvent, Recorder};

// ---------------------------------------------------------------------------
// Capture worker
// ---------------------------------------------------------------------------

/// Owns the cpal stream on its own thread (the stream handle must stay on
/// the thread that created it on some platforms).
struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl CaptureWorker {
    fn spawn(
        device: Option<String>,
        chunk_tx: mpsc::Sender<AudioChunk>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();

        let join = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let capture = match AudioCapture::new(device.as_deref()) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let rate = capture.sample_rate();
                let _handle = match capture.start(chunk_tx) {
                    Ok(h) => h,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(rate));
                // Block until told to stop; dropping `_handle` ends the
                // stream.
                let _ = stop_rx.recv();
            })
            .context("failed to spawn capture thread")?;

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                info!("capture running at {rate} Hz");
                Ok(Self { stop_tx, join })
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(anyhow!("capture thread exited before reporting readiness"))
            }
        }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.join.join().is_err() {
            warn!("capture thread panicked during shutdown");
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    config: AppConfig,
    paths: StoragePaths,
    recorder: Arc<Mutex<Recorder>>,
    ledger: Arc<Mutex<Ledger>>,
    capture: Mutex<Option<CaptureWorker>>,
    /// Master sender kept alive so capture recovery can reattach; dropped
    /// at stop so the processing thread drains and exits.
    chunk_tx: Mutex<Option<mpsc::Sender<AudioChunk>>>,
    processor: Mutex<Option<JoinHandle<()>>>,
    capture_started_at: Mutex<Option<Instant>>,
    minute_index: AtomicU32,
    paused: AtomicBool,
    tracking: AtomicBool,
}

impl SessionManager {
    /// Build a manager with the default heuristic scorer and classifier.
    pub fn new(config: AppConfig, paths: StoragePaths) -> Result<Self> {
        Self::with_analyzers(
            config,
            paths,
            Box::new(EnergyScorer::new()),
            Box::new(SpectralRatioClassifier::new()),
        )
    }

    /// Build a manager with injected scorer/classifier implementations.
    pub fn with_analyzers(
        config: AppConfig,
        paths: StoragePaths,
        scorer: Box<dyn VadScorer>,
        classifier: Box<dyn EventClassifier>,
    ) -> Result<Self> {
        paths.ensure_dirs().context("creating storage directories")?;
        let store = LayeredStore::standard(&paths);
        let ledger = Ledger::new(paths.clone(), store, config.persistence.clone());
        let recorder = Recorder::new(&config, scorer, classifier);

        Ok(Self {
            config,
            paths,
            recorder: Arc::new(Mutex::new(recorder)),
            ledger: Arc::new(Mutex::new(ledger)),
            capture: Mutex::new(None),
            chunk_tx: Mutex::new(None),
            processor: Mutex::new(None),
            capture_started_at: Mutex::new(None),
            minute_index: AtomicU32::new(0),
            paused: AtomicBool::new(false),
            tracking: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    // ---------- Startup recovery ----------

    /// Run ledger recovery and artifact cleanup.  Call once before
    /// `start_tracking`.
    pub fn recover_state(&self) -> Result<RecoveryReport> {
        let mut ledger = self.lock_ledger();
        let report = ledger.recover(Utc::now())?;
        let removed = ledger.cleanup_undersized_files();
        if removed > 0 {
            info!("cleanup removed {removed} undersized artifacts");
        }
        info!(
            "recovery: resumed={} stale={} files={} missing={} broken={} migrated={} events={}",
            report.session_resumed,
            report.session_discarded_stale,
            report.files_recovered,
            report.files_missing,
            report.files_broken,
            report.paths_migrated,
            report.events_recovered,
        );
        Ok(report)
    }

    // ---------- Session control ----------

    /// Begin (or resume) the session record without touching hardware.
    ///
    /// A fresh session starts clean: unuploaded artifacts left behind by
    /// earlier sessions are deleted and minute-segment numbering restarts
    /// at zero.  A resumed session keeps everything and continues
    /// numbering after its existing segments.
    pub fn begin_session(&self) -> Result<Uuid> {
        let mut ledger = self.lock_ledger();
        let id = match ledger.session() {
            Some(resumed) => {
                let short = resumed.short_id();
                let id = resumed.id;
                info!("continuing recovered session {short}");
                let prefix = format!("sleep_audio_local_{short}_");
                let next = ledger
                    .audio_files()
                    .iter()
                    .filter(|f| f.file_name.starts_with(&prefix))
                    .count() as u32;
                self.minute_index.store(next, Ordering::SeqCst);
                id
            }
            None => {
                let dropped = ledger.clear_unuploaded()?;
                if dropped > 0 {
                    info!("dropped {dropped} unuploaded files from earlier sessions");
                }
                self.minute_index.store(0, Ordering::SeqCst);
                ledger.begin_session()?.id
            }
        };
        self.tracking.store(true, Ordering::SeqCst);
        Ok(id)
    }

    /// Start full tracking: session record, capture stream, processing
    /// thread.
    pub fn start_tracking(&self) -> Result<()> {
        if self.is_tracking() {
            return Err(anyhow!("tracking already active"));
        }
        self.begin_session()?;

        let (tx, rx) = mpsc::channel::<AudioChunk>();
        self.spawn_processor(rx)?;
        *self.chunk_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());
        self.attach_capture(tx)?;
        Ok(())
    }

    fn spawn_processor(&self, rx: mpsc::Receiver<AudioChunk>) -> Result<()> {
        let recorder = Arc::clone(&self.recorder);
        let ledger = Arc::clone(&self.ledger);
        let paths = self.paths.clone();
        let min_bytes = self.config.persistence.min_artifact_bytes;

        let handle = std::thread::Builder::new()
            .name("pipeline".into())
            .spawn(move || {
                while let Ok(chunk) = rx.recv() {
                    let events = {
                        let mut rec = recorder.lock().unwrap_or_else(|e| e.into_inner());
                        rec.process_chunk(&chunk)
                    };
                    for event in events {
                        let mut led = ledger.lock().unwrap_or_else(|e| e.into_inner());
                        if let Err(e) = persist_event(&mut led, &paths, min_bytes, event) {
                            error!("failed to persist event: {e}");
                        }
                    }
                }
                info!("processing thread drained and stopped");
            })
            .context("failed to spawn processing thread")?;

        *self.processor.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn attach_capture(&self, tx: mpsc::Sender<AudioChunk>) -> Result<()> {
        let worker = CaptureWorker::spawn(self.config.audio.input_device.clone(), tx)?;
        *self.capture.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
        *self
            .capture_started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        Ok(())
    }

    fn detach_capture(&self) {
        let worker = self
            .capture
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(w) = worker {
            w.stop();
        }
        *self
            .capture_started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Stop tracking: detach the stream, drain in-flight chunks, flush all
    /// buffers, close the session record.
    pub fn stop_tracking(&self) -> Result<()> {
        if !self.is_tracking() {
            return Ok(());
        }
        self.detach_capture();

        // Dropping the master sender lets the processing thread drain the
        // queue and exit; joining it guarantees every chunk was processed
        // before finalization.
        *self.chunk_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let processor = self
            .processor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(p) = processor {
            if p.join().is_err() {
                warn!("processing thread panicked; continuing shutdown");
            }
        }

        self.finalize_session()
    }

    /// Drain the recorder into the ledger: force-close any open event,
    /// write out the minute buffer, credit the processed time.
    fn flush_buffers(&self) -> Result<()> {
        let (forced, minute, secs) = {
            let mut rec = self.lock_recorder();
            let forced = rec.force_finalize();
            let minute = rec.drain_minute_wav(self.config.persistence.min_artifact_bytes);
            let secs = rec.take_processed_secs();
            (forced, minute, secs)
        };

        let mut ledger = self.lock_ledger();
        ledger.add_recording_secs(secs);
        if let Some(event) = forced {
            if let Err(e) = persist_event(
                &mut ledger,
                &self.paths,
                self.config.persistence.min_artifact_bytes,
                event,
            ) {
                error!("failed to persist forced event: {e}");
            }
        }
        if let Some((bytes, duration)) = minute {
            let index = self.minute_index.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = persist_minute_segment(
                &mut ledger,
                &self.paths,
                self.config.persistence.min_artifact_bytes,
                bytes,
                duration,
                index,
            ) {
                error!("failed to persist minute segment: {e}");
            }
        }
        Ok(())
    }

    /// Hardware-free tail of `stop_tracking`: force-close any open event,
    /// flush the minute buffer and end the session record.
    pub fn finalize_session(&self) -> Result<()> {
        self.flush_buffers()?;
        self.lock_ledger().end_session()?;
        self.tracking.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Backgrounding flush: the OS may kill the process without further
    /// notice, so close the open event, write the minute segment and push
    /// a full backup now.  The session record stays open; tracking
    /// continues if the process survives.
    pub fn background_checkpoint(&self) -> Result<()> {
        if !self.is_tracking() {
            return Ok(());
        }
        self.flush_buffers()?;
        self.lock_ledger().persist_all()?;
        Ok(())
    }

    // ---------- Periodic work (driven by the lifecycle guard) ----------

    /// Test/bench entry point mirroring what the processing thread does for
    /// one chunk.
    pub fn process_chunk(&self, chunk: &AudioChunk) -> Result<()> {
        let events = {
            let mut rec = self.lock_recorder();
            rec.process_chunk(chunk)
        };
        for event in events {
            let mut ledger = self.lock_ledger();
            persist_event(
                &mut ledger,
                &self.paths,
                self.config.persistence.min_artifact_bytes,
                event,
            )?;
        }
        Ok(())
    }

    /// Drain the minute buffer to disk.  When the buffer came up empty but
    /// an event is in flight, a snapshot of the open event's audio is
    /// written instead so a crash between flushes cannot lose it.
    pub fn flush_minute_segment(&self) -> Result<()> {
        if !self.is_tracking() {
            return Ok(());
        }
        let min_bytes = self.config.persistence.min_artifact_bytes;
        let (segment, secs) = {
            let mut rec = self.lock_recorder();
            let segment = rec
                .drain_minute_wav(min_bytes)
                .or_else(|| rec.event_snapshot_wav());
            (segment, rec.take_processed_secs())
        };

        let mut ledger = self.lock_ledger();
        ledger.add_recording_secs(secs);
        let Some((bytes, duration)) = segment else {
            return Ok(());
        };
        let index = self.minute_index.fetch_add(1, Ordering::SeqCst);
        persist_minute_segment(&mut ledger, &self.paths, min_bytes, bytes, duration, index)?;
        Ok(())
    }

    /// Heartbeat backup: push all live state through every store layer and
    /// log a status line.
    pub fn heartbeat_backup(&self) -> Result<()> {
        let buffered = self.lock_recorder().minute_buffered_secs();
        let ledger = self.lock_ledger();
        ledger.persist_all()?;
        if let Some(s) = ledger.session() {
            info!(
                "session {}: {:.0}s recorded, {} files, {} events, {buffered:.1}s buffered",
                s.short_id(),
                s.recording_secs,
                ledger.audio_files().len(),
                ledger.events().len(),
            );
        }
        Ok(())
    }

    // ---------- Pause / resume ----------

    /// Release the input device for a competing audio consumer.  Session
    /// state and buffers are kept.
    pub fn pause_capture(&self) -> Result<()> {
        if !self.is_tracking() || self.is_paused() {
            return Ok(());
        }
        self.detach_capture();
        self.paused.store(true, Ordering::SeqCst);
        info!("capture paused; session continues");
        Ok(())
    }

    /// Re-acquire the input device after a pause.
    pub fn resume_capture(&self) -> Result<()> {
        if !self.is_tracking() || !self.is_paused() {
            return Ok(());
        }
        let tx = self
            .chunk_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| anyhow!("no chunk channel; tracking not started"))?;
        self.attach_capture(tx)?;
        self.paused.store(false, Ordering::SeqCst);
        info!("capture resumed");
        Ok(())
    }

    // ---------- Health / recovery ----------

    /// True when chunks are flowing (or capture is intentionally idle).
    pub fn is_capture_healthy(&self) -> bool {
        if !self.is_tracking() || self.is_paused() {
            return true;
        }
        let stall = Duration::from_secs(self.config.lifecycle.stall_threshold_secs);
        if let Some(age) = self.lock_recorder().last_chunk_age() {
            return age < stall;
        }
        // No chunk ever arrived: allow a startup grace period.
        match *self
            .capture_started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
        {
            Some(started) => started.elapsed() < stall,
            None => true,
        }
    }

    /// Tear down and rebuild the capture stream without touching session
    /// state.  The recorder keeps its buffers, clock and open event.
    pub fn recover_capture(&self) -> Result<()> {
        warn!("capture stalled; rebuilding stream");
        self.detach_capture();
        let tx = self
            .chunk_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| anyhow!("no chunk channel; tracking not started"))?;
        self.attach_capture(tx)?;
        Ok(())
    }

    // ---------- Accessors for tests and status surfaces ----------

    pub fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.lock_ledger()
    }

    fn lock_recorder(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Artifact writers
// ---------------------------------------------------------------------------

/// Write `bytes` into the recordings dir, validate the result, and return a
/// ledger entry.  An artifact that fails validation is deleted and reported
/// as an error.
fn write_artifact(
    paths: &StoragePaths,
    min_bytes: u64,
    file_name: &str,
    bytes: &[u8],
    session_id: Uuid,
) -> Result<AudioFileEntry> {
    let relative = StoragePaths::relative_recording(file_name);
    let abs = paths.resolve(&relative);
    std::fs::write(&abs, bytes).with_context(|| format!("writing {file_name}"))?;

    match validate_wav_file(&abs, min_bytes) {
        Ok(duration) => Ok(AudioFileEntry {
            file_name: file_name.to_string(),
            relative_path: relative,
            session_id,
            recorded_at: Utc::now(),
            duration_secs: duration,
            bytes: bytes.len() as u64,
            is_uploaded: false,
        }),
        Err(reason) => {
            let _ = std::fs::remove_file(&abs);
            Err(anyhow!("artifact {file_name} failed validation: {reason}"))
        }
    }
}

fn persist_event(
    ledger: &mut Ledger,
    paths: &StoragePaths,
    min_bytes: u64,
    event: FinalizedEvent,
) -> Result<()> {
    if (event.wav_bytes.len() as u64) < min_bytes {
        info!(
            "event {} under {min_bytes} bytes; discarded",
            event.label
        );
        return Ok(());
    }
    let Some(session_id) = ledger.session().map(|s| s.id) else {
        warn!("event finalized outside a session; discarded");
        return Ok(());
    };

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_name = format!("event_{}_{stamp}.wav", event.label);
    let entry = write_artifact(paths, min_bytes, &file_name, &event.wav_bytes, session_id)?;
    let duration = entry.duration_secs;
    ledger.record_audio_file(entry)?;
    ledger.record_event(EventSegment {
        id: Uuid::new_v4(),
        session_id,
        label: event.label,
        confidence: event.confidence,
        started_at: Utc::now()
            - chrono::Duration::milliseconds((duration * 1000.0) as i64),
        duration_secs: duration,
        file_name,
    })?;
    Ok(())
}

fn persist_minute_segment(
    ledger: &mut Ledger,
    paths: &StoragePaths,
    min_bytes: u64,
    bytes: Vec<u8>,
    _duration: f32,
    index: u32,
) -> Result<()> {
    let Some(session) = ledger.session() else {
        warn!("minute segment outside a session; discarded");
        return Ok(());
    };
    let session_id = session.id;
    let file_name = format!(
        "sleep_audio_local_{}_{index:03}.wav",
        session.short_id()
    );
    let entry = write_artifact(paths, min_bytes, &file_name, &bytes, session_id)?;
    ledger.record_audio_file(entry)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
