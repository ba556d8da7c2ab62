//! Named dataset persistence
//!
//! Every dataset has a primary copy and a secondary snapshot. Saves write the
//! snapshot first so a crash mid-save leaves at least one readable copy.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use warden_core::Category;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {0}: {1}")]
    Io(String, std::io::Error),

    #[error("Serialize {0} error: {1}")]
    Serialize(String, serde_json::Error),

    #[error("Both copies of {0} are unreadable")]
    Corrupted(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
}

/// Which copy of a dataset to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Replica {
    Primary,
    Snapshot,
}

/// Raw byte storage for named datasets
pub trait DatasetStore: Send + Sync {
    /// `Ok(None)` when the copy does not exist
    fn load_raw(&self, name: &str, replica: Replica) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrite both copies
    fn save_raw(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Shared store handle
pub type SharedStore = Arc<dyn DatasetStore>;

/// Load a dataset, falling back to the snapshot
///
/// A dataset with no copy at all is created from its default value.
pub fn load<T>(store: &dyn DatasetStore, name: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut existed = false;

    for replica in [Replica::Primary, Replica::Snapshot] {
        match store.load_raw(name, replica) {
            Ok(Some(bytes)) => {
                existed = true;
                match serde_json::from_slice(&bytes) {
                    Ok(value) => return Ok(value),
                    Err(e) => warn!("Load {} ({:?}) error: {}", name, replica, e),
                }
            }
            Ok(None) => {}
            Err(e) => {
                existed = true;
                warn!("Load {} ({:?}) error: {}", name, replica, e);
            }
        }
    }

    if existed {
        return Err(StoreError::Corrupted(name.to_string()));
    }

    info!("Creating dataset {}", name);
    let value = T::default();
    save(store, name, &value)?;
    Ok(value)
}

pub fn save<T: Serialize + ?Sized>(store: &dyn DatasetStore, name: &str, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialize(name.to_string(), e))?;
    store.save_raw(name, &bytes)
}

/// Files under a data directory: `<name>` and `.<name>`
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str, replica: Replica) -> PathBuf {
        match replica {
            Replica::Primary => self.dir.join(name),
            Replica::Snapshot => self.dir.join(format!(".{}", name)),
        }
    }
}

impl DatasetStore for FileStore {
    fn load_raw(&self, name: &str, replica: Replica) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(name, replica);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(path.display().to_string(), e)),
        }
    }

    fn save_raw(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        for replica in [Replica::Snapshot, Replica::Primary] {
            let path = self.path(name, replica);
            std::fs::write(&path, bytes).map_err(|e| StoreError::Io(path.display().to_string(), e))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and offline tooling
#[derive(Default)]
pub struct MemoryStore {
    copies: Mutex<HashMap<(String, Replica), Vec<u8>>>,
}

impl MemoryStore {
    /// Overwrite a single copy
    pub fn put(&self, name: &str, replica: Replica, bytes: &[u8]) {
        self.copies
            .lock()
            .insert((name.to_string(), replica), bytes.to_vec());
    }

    pub fn get(&self, name: &str, replica: Replica) -> Option<Vec<u8>> {
        self.copies.lock().get(&(name.to_string(), replica)).cloned()
    }
}

impl DatasetStore for MemoryStore {
    fn load_raw(&self, name: &str, replica: Replica) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(name, replica))
    }

    fn save_raw(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut copies = self.copies.lock();
        copies.insert((name.to_string(), Replica::Snapshot), bytes.to_vec());
        copies.insert((name.to_string(), Replica::Primary), bytes.to_vec());
        Ok(())
    }
}

/// Every dataset the agent persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    AdminIds,
    BadIds,
    DeletedIds,
    ExceptIds,
    LeftGroupIds,
    TrustIds,
    UserIds,
    WatchIds,
    WhiteIds,
    Words(Category),
}

impl Dataset {
    /// Datasets other than word lists
    pub const FIXED: [Dataset; 9] = [
        Dataset::AdminIds,
        Dataset::BadIds,
        Dataset::DeletedIds,
        Dataset::ExceptIds,
        Dataset::LeftGroupIds,
        Dataset::TrustIds,
        Dataset::UserIds,
        Dataset::WatchIds,
        Dataset::WhiteIds,
    ];

    /// Fixed datasets followed by the word lists of `categories`
    pub fn all(categories: &[Category]) -> Vec<Dataset> {
        Self::FIXED
            .into_iter()
            .chain(categories.iter().copied().map(Dataset::Words))
            .collect()
    }

    pub fn name(&self) -> String {
        match self {
            Dataset::AdminIds => "admin_ids".to_string(),
            Dataset::BadIds => "bad_ids".to_string(),
            Dataset::DeletedIds => "deleted_ids".to_string(),
            Dataset::ExceptIds => "except_ids".to_string(),
            Dataset::LeftGroupIds => "left_group_ids".to_string(),
            Dataset::TrustIds => "trust_ids".to_string(),
            Dataset::UserIds => "user_ids".to_string(),
            Dataset::WatchIds => "watch_ids".to_string(),
            Dataset::WhiteIds => "white_ids".to_string(),
            Dataset::Words(category) => category.dataset_name(),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Dataset {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(dataset) = Self::FIXED.into_iter().find(|d| d.name() == s) {
            return Ok(dataset);
        }

        Category::from_dataset(s)
            .map(Dataset::Words)
            .map_err(|_| StoreError::UnknownDataset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_missing_dataset_created() {
        let store = MemoryStore::default();
        let value: HashSet<i64> = load(&store, "left_group_ids").unwrap();
        assert!(value.is_empty());
        assert_eq!(store.get("left_group_ids", Replica::Primary), Some(b"[]".to_vec()));
    }

    #[test]
    fn test_snapshot_fallback() {
        let store = MemoryStore::default();
        store.put("left_group_ids", Replica::Primary, b"{garbage");
        store.put("left_group_ids", Replica::Snapshot, b"[-100]");

        let value: HashSet<i64> = load(&store, "left_group_ids").unwrap();
        assert!(value.contains(&-100));
    }

    #[test]
    fn test_both_copies_corrupt_is_fatal() {
        let store = MemoryStore::default();
        store.put("user_ids", Replica::Primary, b"{garbage");
        store.put("user_ids", Replica::Snapshot, b"also garbage");

        let result: Result<HashMap<i64, i64>, _> = load(&store, "user_ids");
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let value: HashSet<i64> = [-1, -2].into_iter().collect();
        save(&store, "left_group_ids", &value).unwrap();
        assert!(dir.path().join("left_group_ids").exists());
        assert!(dir.path().join(".left_group_ids").exists());

        std::fs::write(dir.path().join("left_group_ids"), b"truncated").unwrap();
        let loaded: HashSet<i64> = load(&store, "left_group_ids").unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_dataset_names() {
        assert_eq!("white_ids".parse::<Dataset>().unwrap(), Dataset::WhiteIds);
        assert_eq!("ban_words".parse::<Dataset>().unwrap(), Dataset::Words(Category::Ban));
        assert!("porn_words".parse::<Dataset>().is_err());
        assert_eq!(Dataset::all(&[Category::Ad]).len(), 10);
    }
}
