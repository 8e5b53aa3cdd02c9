//! Durable checkpoint storage.
//!
//! One record per fingerprint, written after every confirmed offset
//! advance and deleted on completion or cancellation. Records are the
//! sole input to crash recovery at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors from a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage quota exceeded")]
    QuotaExceeded,
}

/// Durable projection of a transfer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub fingerprint: String,
    pub remote_url: String,
    pub offset: u64,
    pub size: u64,
    pub chunk_size: u64,
    pub updated_at: DateTime<Utc>,
}

/// Key/value store of in-flight transfer state, keyed by fingerprint.
///
/// Writes must be atomic per key. No two sessions share a key, so
/// implementations need no cross-key transactions.
pub trait PersistenceStore: Send + Sync {
    fn put(&self, record: &PersistedRecord) -> Result<(), StoreError>;
    fn get(&self, fingerprint: &str) -> Result<Option<PersistedRecord>, StoreError>;
    fn delete(&self, fingerprint: &str) -> Result<(), StoreError>;
    fn list_all(&self) -> Result<Vec<PersistedRecord>, StoreError>;
}

/// Volatile store. Uploads checkpointed here do not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PersistedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn put(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap()
            .insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    fn get(&self, fingerprint: &str) -> Result<Option<PersistedRecord>, StoreError> {
        Ok(self.records.read().unwrap().get(fingerprint).cloned())
    }

    fn delete(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.records.write().unwrap().remove(fingerprint);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }
}

/// JSON-file-backed store.
///
/// Records are cached in memory and the whole map is rewritten through a
/// temp file + rename on every change, so a crash mid-write never leaves
/// a torn file behind.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<String, PersistedRecord>>,
}

impl JsonFileStore {
    /// Creates a store at `path`, loading existing records from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn persist(&self) -> Result<(), StoreError> {
        let map = self.records.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(map_io)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(map_io)?;
        std::fs::rename(&tmp, &self.path).map_err(map_io)?;
        debug!("persisted {} record(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

fn map_io(err: std::io::Error) -> StoreError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => StoreError::QuotaExceeded,
        _ => StoreError::Io(err),
    }
}

fn load_records(path: &Path) -> Result<HashMap<String, PersistedRecord>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let records: HashMap<String, PersistedRecord> = serde_json::from_str(&data)?;
    debug!("loaded {} record(s) from {:?}", records.len(), path);
    Ok(records)
}

impl PersistenceStore for JsonFileStore {
    fn put(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        {
            let mut map = self.records.write().unwrap();
            map.insert(record.fingerprint.clone(), record.clone());
        }
        self.persist()
    }

    fn get(&self, fingerprint: &str) -> Result<Option<PersistedRecord>, StoreError> {
        Ok(self.records.read().unwrap().get(fingerprint).cloned())
    }

    fn delete(&self, fingerprint: &str) -> Result<(), StoreError> {
        {
            let mut map = self.records.write().unwrap();
            if map.remove(fingerprint).is_none() {
                return Ok(());
            }
        }
        self.persist()
    }

    fn list_all(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }
}

/// Wraps a backend and degrades to memory-only when it reports a quota
/// condition. The transfer keeps running; it just will not survive a
/// restart. A storage failure never aborts an otherwise-healthy upload.
pub struct DegradingStore {
    inner: Box<dyn PersistenceStore>,
    fallback: MemoryStore,
    degraded: AtomicBool,
    reported: AtomicBool,
}

impl DegradingStore {
    pub fn new(inner: Box<dyn PersistenceStore>) -> Self {
        Self {
            inner,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(false),
            reported: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Returns `true` exactly once after the store has degraded, so the
    /// caller can emit a single warning event.
    pub fn take_degrade_notice(&self) -> bool {
        self.is_degraded() && !self.reported.swap(true, Ordering::Relaxed)
    }
}

impl PersistenceStore for DegradingStore {
    fn put(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        if self.is_degraded() {
            return self.fallback.put(record);
        }
        match self.inner.put(record) {
            Ok(()) => Ok(()),
            Err(StoreError::QuotaExceeded) => {
                warn!(
                    fingerprint = %record.fingerprint,
                    "storage quota exceeded; degrading to memory-only checkpoints"
                );
                self.degraded.store(true, Ordering::Relaxed);
                self.fallback.put(record)
            }
            Err(err) => Err(err),
        }
    }

    fn get(&self, fingerprint: &str) -> Result<Option<PersistedRecord>, StoreError> {
        if let Some(record) = self.fallback.get(fingerprint)? {
            return Ok(Some(record));
        }
        self.inner.get(fingerprint)
    }

    fn delete(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.fallback.delete(fingerprint)?;
        self.inner.delete(fingerprint)
    }

    fn list_all(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        let mut by_key: HashMap<String, PersistedRecord> = self
            .inner
            .list_all()?
            .into_iter()
            .map(|r| (r.fingerprint.clone(), r))
            .collect();
        for record in self.fallback.list_all()? {
            by_key.insert(record.fingerprint.clone(), record);
        }
        Ok(by_key.into_values().collect())
    }
}
