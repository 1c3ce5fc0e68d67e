//! Cross-platform storage paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\somnoscope\
//!   macOS:   ~/Library/Application Support/somnoscope/
//!   Linux:   ~/.config/somnoscope/
//!
//! Data dir (recordings, ledger state, snapshots):
//!   Windows: %LOCALAPPDATA%\somnoscope\
//!   macOS:   ~/Library/Application Support/somnoscope/
//!   Linux:   ~/.local/share/somnoscope/
//!
//! Audio-file records never store absolute paths: the data root can change
//! between installs, so the ledger keeps paths relative to the data dir and
//! resolves them here at read time.

use std::path::{Path, PathBuf};

/// Holds all resolved storage directory/file paths.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Root data directory; relative ledger paths resolve against this.
    pub data_dir: PathBuf,
    /// Directory for WAV segments and per-session event manifests.
    pub recordings_dir: PathBuf,
    /// Directory for primary key-value state files.
    pub state_dir: PathBuf,
    /// Directory for timestamped state snapshots.
    pub snapshots_dir: PathBuf,
}

impl StoragePaths {
    const APP_NAME: &'static str = "somnoscope";
    /// Subdirectory (relative to the data root) that holds recordings.
    pub const RECORDINGS_SUBDIR: &'static str = "recordings";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path (should be extremely rare in practice).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self::rooted_at(config_dir, data_dir)
    }

    /// Build a [`StoragePaths`] with explicit roots (useful for tests).
    pub fn rooted_at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let settings_file = config_dir.join("settings.toml");
        let recordings_dir = data_dir.join(Self::RECORDINGS_SUBDIR);
        let state_dir = data_dir.join("state");
        let snapshots_dir = state_dir.join("snapshots");

        Self {
            config_dir,
            settings_file,
            data_dir,
            recordings_dir,
            state_dir,
            snapshots_dir,
        }
    }

    /// Create every directory this struct points at.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.recordings_dir)?;
        std::fs::create_dir_all(&self.snapshots_dir)?;
        Ok(())
    }

    /// Resolve a ledger-relative path against the current data root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.data_dir.join(relative)
    }

    /// The ledger-relative path for a file name inside the recordings dir.
    pub fn relative_recording(file_name: &str) -> String {
        format!("{}/{}", Self::RECORDINGS_SUBDIR, file_name)
    }

    /// Extract the final component of a (possibly absolute, possibly foreign)
    /// stored path.  Used when migrating legacy absolute-path records.
    pub fn file_name_of(stored: &str) -> Option<String> {
        Path::new(stored)
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
    }
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = StoragePaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.recordings_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
    }

    #[test]
    fn resolve_joins_relative_against_data_root() {
        let paths = StoragePaths::rooted_at("/tmp/cfg".into(), "/tmp/data".into());
        let abs = paths.resolve("recordings/a.wav");
        assert_eq!(abs, PathBuf::from("/tmp/data/recordings/a.wav"));
    }

    #[test]
    fn relative_recording_uses_subdir() {
        assert_eq!(
            StoragePaths::relative_recording("x.wav"),
            "recordings/x.wav"
        );
    }

    #[test]
    fn file_name_of_strips_foreign_prefix() {
        let stored = "/var/mobile/Containers/old-root/recordings/seg.wav";
        assert_eq!(StoragePaths::file_name_of(stored).as_deref(), Some("seg.wav"));
        assert_eq!(StoragePaths::file_name_of("plain.wav").as_deref(), Some("plain.wav"));
    }
}
