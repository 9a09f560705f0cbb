//! Whole-record persistence for the active profile.
//!
//! Three records, each a single JSON value stored under a fixed key:
//!
//! | Key | Value |
//! |-----|-------|
//! | `resq-user` | the user profile |
//! | `resq-contacts` | the contact list |
//! | `resq-sos-events` | the alert history, most recent first |
//!
//! Writes go through [`Persister`]: one background task applies saves in the
//! order they were enqueued, so a later snapshot can never be overwritten by an
//! earlier one. Callers do not wait for a save; [`Persister::flush`] does.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Keys of the persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    User,
    Contacts,
    SosEvents,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [StoreKey::User, StoreKey::Contacts, StoreKey::SosEvents];

    pub const fn as_str(self) -> &'static str {
        match self {
            StoreKey::User => "resq-user",
            StoreKey::Contacts => "resq-contacts",
            StoreKey::SosEvents => "resq-sos-events",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record {key} is corrupt: {reason}")]
    Corrupt { key: StoreKey, reason: String },

    #[error("persistence writer has stopped")]
    WriterStopped,
}

/// Key-value storage of whole JSON records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a record; `None` when it was never written or has been removed.
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError>;

    /// Replace a record.
    async fn set(&self, key: StoreKey, value: Value) -> Result<(), StoreError>;

    /// Delete a record. Removing an absent record is not an error.
    async fn remove(&self, key: StoreKey) -> Result<(), StoreError>;
}

/// Read and decode a record.
pub async fn load<T: DeserializeOwned>(
    store: &dyn RecordStore,
    key: StoreKey,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Thread-safe in-memory store. Data is lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<StoreKey, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        Ok(self.records.get(&key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        self.records.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.records.remove(&key);
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

/// One `<key>.json` file per record in a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the data directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        let bytes = match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    async fn set(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&value).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })?;

        // Write-then-rename so a crash never leaves a half-written record
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Ordered writer
// ============================================================================

enum WriteOp {
    Set(StoreKey, Value),
    Remove(StoreKey),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background persistence writer.
#[derive(Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl Persister {
    /// Start the writer task over `store`.
    pub fn start(store: Arc<dyn RecordStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Set(key, value) => {
                        if let Err(e) = store.set(key, value).await {
                            warn!(key = %key, error = %e, "Failed to save record");
                        } else {
                            debug!(key = %key, "Saved record");
                        }
                    }
                    WriteOp::Remove(key) => {
                        if let Err(e) = store.remove(key).await {
                            warn!(key = %key, error = %e, "Failed to remove record");
                        }
                    }
                    WriteOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Persistence writer stopped");
        });

        info!("Started persistence writer");
        Self { tx }
    }

    /// Enqueue a whole-record save.
    pub fn save(&self, key: StoreKey, value: Value) {
        if self.tx.send(WriteOp::Set(key, value)).is_err() {
            warn!(key = %key, "Save dropped: writer stopped");
        }
    }

    /// Enqueue a record removal.
    pub fn remove(&self, key: StoreKey) {
        if self.tx.send(WriteOp::Remove(key)).is_err() {
            warn!(key = %key, "Remove dropped: writer stopped");
        }
    }

    /// Wait until everything enqueued so far has been applied.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteOp::Flush(done_tx))
            .map_err(|_| StoreError::WriterStopped)?;
        done_rx.await.map_err(|_| StoreError::WriterStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.get(StoreKey::User).await.unwrap().is_none());

        store.set(StoreKey::User, json!({"name": "Asha"})).await.unwrap();
        assert_eq!(
            store.get(StoreKey::User).await.unwrap(),
            Some(json!({"name": "Asha"}))
        );

        store.remove(StoreKey::User).await.unwrap();
        store.remove(StoreKey::User).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .set(StoreKey::Contacts, json!([{"id": 1}]))
            .await
            .unwrap();
        assert!(dir.path().join("resq-contacts.json").exists());

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get(StoreKey::Contacts).await.unwrap(),
            Some(json!([{"id": 1}]))
        );

        reopened.remove(StoreKey::Contacts).await.unwrap();
        assert!(reopened.get(StoreKey::Contacts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("resq-user.json"), b"{not json")
            .await
            .unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        let err = store.get(StoreKey::User).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Corrupt {
                key: StoreKey::User,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn load_decodes_typed_record() {
        let store = MemoryStore::new();
        store.set(StoreKey::SosEvents, json!([1, 2, 3])).await.unwrap();

        let events: Option<Vec<u32>> = load(&store, StoreKey::SosEvents).await.unwrap();
        assert_eq!(events, Some(vec![1, 2, 3]));

        let wrong: Result<Option<String>, _> = load(&store, StoreKey::SosEvents).await;
        assert!(matches!(wrong, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn persister_applies_writes_in_order() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::start(store.clone());

        for n in 0..50 {
            persister.save(StoreKey::SosEvents, json!(n));
        }
        persister.remove(StoreKey::User);
        tokio_test::assert_ok!(persister.flush().await);

        assert_eq!(
            store.get(StoreKey::SosEvents).await.unwrap(),
            Some(json!(49))
        );
        assert!(store.get(StoreKey::User).await.unwrap().is_none());
    }

    #[test]
    fn keys_match_storage_names() {
        let names: Vec<_> = StoreKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["resq-user", "resq-contacts", "resq-sos-events"]);
    }
}
