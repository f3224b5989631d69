use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{normalize_level_id, MetadataRecord};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "io error: {}", err),
            CacheError::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json(err)
    }
}

/// Details for every community level parsed so far, keyed by normalized ID.
///
/// Entries are replaced whole and only removed through [`CacheStore::remove`]
/// or [`CacheStore::clear`], which belong to the host (e.g. after a rescan).
#[derive(Default)]
pub struct CacheStore {
    records: RwLock<HashMap<String, Arc<MetadataRecord>>>,
    save_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, level_id: &str) -> Option<Arc<MetadataRecord>> {
        self.records
            .read()
            .get(normalize_level_id(level_id))
            .cloned()
    }

    pub fn contains(&self, level_id: &str) -> bool {
        self.records
            .read()
            .contains_key(normalize_level_id(level_id))
    }

    pub fn put(&self, record: MetadataRecord) -> Arc<MetadataRecord> {
        let record = Arc::new(record);
        let key = record.normalized_id().to_string();
        self.records.write().insert(key, Arc::clone(&record));
        record
    }

    pub fn remove(&self, level_id: &str) -> Option<Arc<MetadataRecord>> {
        self.records.write().remove(normalize_level_id(level_id))
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<MetadataRecord>> {
        self.records.read().values().cloned().collect()
    }

    /// Merges a persisted cache file into the store and returns how many
    /// records were read. A missing or unreadable file counts as empty.
    pub async fn load_from_file(&self, path: &Path) -> usize {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No details cache at {:?}; starting empty", path);
                return 0;
            }
            Err(err) => {
                warn!("Failed to read details cache {:?}: {}", path, err);
                return 0;
            }
        };

        let records: Vec<MetadataRecord> = match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(err) => {
                warn!("Ignoring malformed details cache {:?}: {}", path, err);
                return 0;
            }
        };

        let count = records.len();
        {
            let mut guard = self.records.write();
            for record in records {
                let key = record.normalized_id().to_string();
                guard.insert(key, Arc::new(record));
            }
        }
        info!("Loaded {} cached beatmap details from {:?}", count, path);
        count
    }

    /// Writes the current snapshot to `path` and returns the record count.
    ///
    /// The file is written next to the target and renamed into place. Only one
    /// save runs at a time; a second caller waits for the first to finish.
    pub fn save_to_file(&self, path: &Path) -> Result<usize, CacheError> {
        let _guard = self.save_lock.lock();
        let snapshot = self.snapshot();
        let records: Vec<&MetadataRecord> = snapshot.iter().map(|record| record.as_ref()).collect();
        let contents = serde_json::to_vec(&records)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = temp_path_for(path);
        fs::write(&tmp_path, contents)?;
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(records.len())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
