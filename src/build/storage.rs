use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::build::files_delta::canonical_path;

/// Trait for pluggable timestamp stores
/// Implementations remember the last compiled stamp of each source file
pub trait TimestampStorage: Send + Sync {
    /// Record that `file` was compiled while its modification stamp was `stamp`
    fn save_stamp(&self, file: &Path, stamp: u64) -> Result<()>;

    /// Forget the compiled stamp so the file is considered out of date
    fn mark_dirty(&self, file: &Path) -> Result<()>;

    /// Drop every record of `file`
    fn remove(&self, file: &Path) -> Result<()>;
}

/// Stored state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampState {
    /// Compiled with this modification stamp (milliseconds since the epoch)
    Compiled(u64),
    Dirty,
}

/// Timestamp store kept in memory, keyed by canonical path
#[derive(Debug, Default)]
pub struct InMemoryTimestampStorage {
    stamps: Mutex<BTreeMap<String, StampState>>,
}

impl InMemoryTimestampStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self, file: &Path) -> Option<StampState> {
        self.stamps.lock().get(&canonical_path(file)).copied()
    }

    pub fn len(&self) -> usize {
        self.stamps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> BTreeMap<String, StampState> {
        self.stamps.lock().clone()
    }
}

impl TimestampStorage for InMemoryTimestampStorage {
    fn save_stamp(&self, file: &Path, stamp: u64) -> Result<()> {
        self.stamps
            .lock()
            .insert(canonical_path(file), StampState::Compiled(stamp));
        Ok(())
    }

    fn mark_dirty(&self, file: &Path) -> Result<()> {
        self.stamps
            .lock()
            .insert(canonical_path(file), StampState::Dirty);
        Ok(())
    }

    fn remove(&self, file: &Path) -> Result<()> {
        self.stamps.lock().remove(&canonical_path(file));
        Ok(())
    }
}

/// Timestamp store persisted as a JSON file.
/// Changes stay in memory until [`JsonTimestampStorage::save`] is called.
#[derive(Debug)]
pub struct JsonTimestampStorage {
    path: PathBuf,
    inner: InMemoryTimestampStorage,
}

impl JsonTimestampStorage {
    /// Open the store at `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stamps = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read timestamp storage {:?}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse timestamp storage {:?}", path))?
        } else {
            BTreeMap::new()
        };

        tracing::debug!("Loaded {} stamps from {:?}", stamps.len(), path);
        Ok(Self {
            path,
            inner: InMemoryTimestampStorage {
                stamps: Mutex::new(stamps),
            },
        })
    }

    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.inner.snapshot())
            .context("Failed to serialize timestamp storage")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write timestamp storage {:?}", self.path))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stamp(&self, file: &Path) -> Option<StampState> {
        self.inner.stamp(file)
    }
}

impl TimestampStorage for JsonTimestampStorage {
    fn save_stamp(&self, file: &Path, stamp: u64) -> Result<()> {
        self.inner.save_stamp(file, stamp)
    }

    fn mark_dirty(&self, file: &Path) -> Result<()> {
        self.inner.mark_dirty(file)
    }

    fn remove(&self, file: &Path) -> Result<()> {
        self.inner.remove(file)
    }
}

/// Source of file modification stamps
pub trait FileStamps: Send + Sync {
    /// Modification time in milliseconds since the epoch, 0 if unknown
    fn last_modified(&self, file: &Path) -> u64;
}

/// Reads modification times from the file system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileStamps;

impl FileStamps for SystemFileStamps {
    fn last_modified(&self, file: &Path) -> u64 {
        std::fs::metadata(file)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_storage_tracks_states() {
        let storage = InMemoryTimestampStorage::new();
        let file = Path::new("/src/a/../Main.java");

        storage.save_stamp(file, 42).unwrap();
        assert_eq!(
            storage.stamp(Path::new("/src/Main.java")),
            Some(StampState::Compiled(42))
        );

        storage.mark_dirty(file).unwrap();
        assert_eq!(storage.stamp(file), Some(StampState::Dirty));

        storage.remove(file).unwrap();
        assert_eq!(storage.stamp(file), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_json_storage_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamps.json");

        let storage = JsonTimestampStorage::load(&path).unwrap();
        storage.save_stamp(Path::new("/p/A.java"), 7).unwrap();
        storage.mark_dirty(Path::new("/p/B.java")).unwrap();
        storage.save().unwrap();

        let reloaded = JsonTimestampStorage::load(&path).unwrap();
        assert_eq!(
            reloaded.stamp(Path::new("/p/A.java")),
            Some(StampState::Compiled(7))
        );
        assert_eq!(
            reloaded.stamp(Path::new("/p/B.java")),
            Some(StampState::Dirty)
        );
    }

    #[test]
    fn test_json_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamps.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let err = JsonTimestampStorage::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_system_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Source.java");
        assert_eq!(SystemFileStamps.last_modified(&file), 0);

        std::fs::write(&file, "class Source {}").unwrap();
        assert!(SystemFileStamps.last_modified(&file) > 0);
    }
}
