//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::StoragePaths;

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for audio capture and resampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate every input stream is normalised to, in Hz.
    pub target_sample_rate: u32,
    /// Number of mono samples per analysis frame.
    pub frame_len: usize,
    /// Audio input device name. `None` means the system default.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            frame_len: 512,
            input_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VadConfig
// ---------------------------------------------------------------------------

/// Settings for voice-activity scoring and event segmentation.
///
/// The two thresholds form a hysteresis band: the smoothed probability must
/// rise above `enter_threshold` to open an event and fall below
/// `exit_threshold` (and stay there for `min_silence_secs`) to close it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Exponential smoothing factor applied to raw frame probabilities.
    pub smoothing_alpha: f32,
    /// Smoothed probability above which an event opens.
    pub enter_threshold: f32,
    /// Smoothed probability below which silence accumulation begins.
    pub exit_threshold: f32,
    /// Continuous sub-threshold time required to close an event, in seconds.
    pub min_silence_secs: f32,
    /// Hard cap on a single event's length, in seconds.
    pub max_event_secs: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.2,
            enter_threshold: 0.35,
            exit_threshold: 0.30,
            min_silence_secs: 0.2,
            max_event_secs: 60.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PersistenceConfig
// ---------------------------------------------------------------------------

/// Settings for the ledger, backups and audio-file validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Interval between continuous-segment flushes, in seconds.
    pub segment_interval_secs: u64,
    /// Interval between ledger heartbeat backups, in seconds.
    pub backup_interval_secs: u64,
    /// Audio artifacts smaller than this many bytes are treated as noise
    /// and discarded rather than written or recovered.
    pub min_artifact_bytes: u64,
    /// Sessions older than this many hours are considered stale on restart
    /// and are not resumed.
    pub stale_session_hours: i64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            segment_interval_secs: 60,
            backup_interval_secs: 30,
            min_artifact_bytes: 1024,
            stale_session_hours: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleConfig
// ---------------------------------------------------------------------------

/// Settings for the lifecycle guard and execution-grant supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Interval between pipeline health checks, in seconds.
    pub health_interval_secs: u64,
    /// Interval between execution-grant renewals, in seconds. Must be
    /// shorter than the platform's grant budget (roughly 30 s).
    pub grant_renew_secs: u64,
    /// Capture is considered stalled when no chunk has arrived for this
    /// many seconds.
    pub stall_threshold_secs: u64,
    /// Consecutive failed recovery attempts before the guard gives up
    /// and stops the session cleanly.
    pub max_recovery_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 10,
            grant_renew_secs: 25,
            stall_threshold_secs: 30,
            max_recovery_attempts: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use somnoscope::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Audio capture / resampling settings.
    pub audio: AudioConfig,
    /// Voice-activity and segmentation settings.
    pub vad: VadConfig,
    /// Ledger / backup / validation settings.
    pub persistence: PersistenceConfig,
    /// Lifecycle guard settings.
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&StoragePaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&StoragePaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
