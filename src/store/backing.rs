//! Layered key-value persistence.
//!
//! State that must survive a crash is written through every layer of a
//! [`LayeredStore`] and read back from the first layer that still holds a
//! copy.  Three concrete layers exist:
//!
//! * [`PrimaryStore`] — `state/<key>.json`, the authoritative copy.
//! * [`SnapshotStore`] — `state/snapshots/<key>.<yyyymmdd>.json`, a daily
//!   rolling snapshot that survives a corrupted primary.
//! * [`MirrorStore`] — `<key>.mirror.json` next to the recordings, so even
//!   a wiped state directory leaves one copy sitting with the audio it
//!   describes.
//!
//! Writes are best effort: a layer failure is logged and the write
//! continues to the remaining layers.  A write only errors when *every*
//! layer failed.

use std::path::PathBuf;

use log::{debug, warn};
use thiserror::Error;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("all {0} store layers failed to accept the write")]
    AllLayersFailed(usize),
}

// ---------------------------------------------------------------------------
// BackingStore
// ---------------------------------------------------------------------------

/// One storage layer in the write-through stack.
pub trait BackingStore: Send {
    /// Persist `value` under `key`, overwriting any previous copy.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Fetch the stored value, `Ok(None)` when this layer has no copy.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete the stored value; missing keys are not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Layer name for logging.
    fn name(&self) -> &'static str;
}

fn write_atomic(path: &PathBuf, value: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, value)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional(path: &PathBuf) -> Result<Option<Vec<u8>>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &PathBuf) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// PrimaryStore
// ---------------------------------------------------------------------------

/// Authoritative JSON files under the state directory.
pub struct PrimaryStore {
    dir: PathBuf,
}

impl PrimaryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BackingStore for PrimaryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.path_for(key), value)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.path_for(key))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        remove_optional(&self.path_for(key))
    }

    fn name(&self) -> &'static str {
        "primary"
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// Daily rolling snapshots.  `put` writes `<key>.<yyyymmdd>.json` and prunes
/// snapshots older than the newest [`SnapshotStore::KEEP`]; `get` returns the
/// newest snapshot for the key.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Number of daily snapshots retained per key.
    const KEEP: usize = 3;

    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn snapshots_for(&self, key: &str) -> Vec<PathBuf> {
        let prefix = format!("{key}.");
        let mut found: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        // Date stamp sorts lexicographically; newest last.
        found.sort();
        found
    }
}

impl BackingStore for SnapshotStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let stamp = chrono::Utc::now().format("%Y%m%d");
        let path = self.dir.join(format!("{key}.{stamp}.json"));
        write_atomic(&path, value)?;

        let snapshots = self.snapshots_for(key);
        if snapshots.len() > Self::KEEP {
            for old in &snapshots[..snapshots.len() - Self::KEEP] {
                if let Err(e) = std::fs::remove_file(old) {
                    debug!("could not prune snapshot {old:?}: {e}");
                }
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.snapshots_for(key).last() {
            Some(newest) => read_optional(newest),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        for path in self.snapshots_for(key) {
            remove_optional(&path)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "snapshot"
    }
}

// ---------------------------------------------------------------------------
// MirrorStore
// ---------------------------------------------------------------------------

/// Flat-file mirror kept beside the recordings.
pub struct MirrorStore {
    dir: PathBuf,
}

impl MirrorStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mirror.json"))
    }
}

impl BackingStore for MirrorStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.path_for(key), value)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.path_for(key))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        remove_optional(&self.path_for(key))
    }

    fn name(&self) -> &'static str {
        "mirror"
    }
}

// ---------------------------------------------------------------------------
// LayeredStore
// ---------------------------------------------------------------------------

/// Write-through stack of [`BackingStore`] layers, ordered by read priority.
pub struct LayeredStore {
    layers: Vec<Box<dyn BackingStore>>,
}

impl LayeredStore {
    pub fn new(layers: Vec<Box<dyn BackingStore>>) -> Self {
        Self { layers }
    }

    /// The standard three-layer stack rooted at the given directories.
    pub fn standard(paths: &crate::config::StoragePaths) -> Self {
        Self::new(vec![
            Box::new(PrimaryStore::new(paths.state_dir.clone())),
            Box::new(SnapshotStore::new(paths.snapshots_dir.clone())),
            Box::new(MirrorStore::new(paths.recordings_dir.clone())),
        ])
    }

    /// Write `value` to every layer.  Individual layer failures are logged;
    /// the call errors only when no layer accepted the write.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut ok = 0usize;
        for layer in &self.layers {
            match layer.put(key, value) {
                Ok(()) => ok += 1,
                Err(e) => warn!("{} store rejected {key}: {e}", layer.name()),
            }
        }
        if ok == 0 {
            return Err(StoreError::AllLayersFailed(self.layers.len()));
        }
        Ok(())
    }

    /// Read `key` from the highest-priority layer that holds a copy, also
    /// returning the layer name for logging.
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, &'static str)> {
        for layer in &self.layers {
            match layer.get(key) {
                Ok(Some(bytes)) => return Some((bytes, layer.name())),
                Ok(None) => {}
                Err(e) => warn!("{} store read failed for {key}: {e}", layer.name()),
            }
        }
        None
    }

    /// Remove `key` from every layer, best effort.
    pub fn remove(&self, key: &str) {
        for layer in &self.layers {
            if let Err(e) = layer.remove(key) {
                warn!("{} store could not remove {key}: {e}", layer.name());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
