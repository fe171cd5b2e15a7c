//! Poll Record Store
//!
//! Durable per-chat poll records. The state manager only needs `get` and
//! `upsert`; both implementations here replace a record atomically.

use super::record::{ChatId, PollRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Errors raised by a poll record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Storage contract consumed by the poll state manager
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Fetch the record for a chat. Absence is not an error.
    async fn get(&self, chat_id: ChatId) -> Result<Option<PollRecord>, StoreError>;

    /// Replace the record for `record.chat_id` as a whole
    async fn upsert(&self, record: &PollRecord) -> Result<(), StoreError>;
}

/// Volatile store, used for tests and runs without a configured path
#[derive(Debug, Default)]
pub struct InMemoryPollStore {
    records: RwLock<HashMap<ChatId, PollRecord>>,
}

impl InMemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chats with a record
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl PollStore for InMemoryPollStore {
    async fn get(&self, chat_id: ChatId) -> Result<Option<PollRecord>, StoreError> {
        Ok(self.records.read().get(&chat_id).cloned())
    }

    async fn upsert(&self, record: &PollRecord) -> Result<(), StoreError> {
        self.records.write().insert(record.chat_id, record.clone());
        Ok(())
    }
}

/// On-disk layout of the JSON store
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    records: Vec<PollRecord>,
}

/// JSON file store.
///
/// Keeps every record in memory and rewrites the file on each upsert
/// (write to a temp file, then rename over the target). The in-memory copy
/// is only updated after the rename succeeded, so a failed write leaves the
/// previous record visible.
///
/// Each upsert runs on its own task, so a caller that stops waiting cannot
/// interrupt the rename and the in-memory commit halfway. A write whose
/// caller has already gone is discarded before the rename.
#[derive(Debug, Clone)]
pub struct JsonFilePollStore {
    inner: Arc<FileState>,
}

#[derive(Debug)]
struct FileState {
    path: PathBuf,
    records: Mutex<BTreeMap<ChatId, PollRecord>>,
    write_seq: AtomicU64,
}

impl JsonFilePollStore {
    /// Open the store at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => {
                let file: StoreFile = serde_json::from_str(&raw)?;
                file.records
                    .into_iter()
                    .map(|record| (record.chat_id, record))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), chats = records.len(), "Opened poll store");

        Ok(Self {
            inner: Arc::new(FileState {
                path,
                records: Mutex::new(records),
                write_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl FileState {
    /// Write, rename and commit `record` as one unit.
    ///
    /// `caller` is the channel the result goes back on; once it is closed
    /// nothing past the temp file is touched.
    async fn commit(
        &self,
        record: PollRecord,
        caller: &oneshot::Sender<Result<(), StoreError>>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;

        let mut next = records.clone();
        next.insert(record.chat_id, record);

        let tmp_path = self.temp_path();
        if let Err(e) = self.write_file(&tmp_path, &next).await {
            remove_temp(&tmp_path).await;
            return Err(e);
        }

        if caller.is_closed() {
            remove_temp(&tmp_path).await;
            tracing::debug!(path = %self.path.display(), "Discarding abandoned poll store write");
            return Err(StoreError::Backend("write abandoned by caller".to_string()));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            remove_temp(&tmp_path).await;
            return Err(e.into());
        }

        *records = next;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        self.path.with_extension(format!("json.{}.tmp", seq))
    }

    async fn write_file(
        &self,
        tmp_path: &Path,
        records: &BTreeMap<ChatId, PollRecord>,
    ) -> Result<(), StoreError> {
        let file = StoreFile {
            records: records.values().cloned().collect(),
        };
        let mut content = serde_json::to_vec_pretty(&file)?;
        content.push(b'\n');

        tokio::fs::write(tmp_path, &content).await?;
        Ok(())
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp store file");
        }
    }
}

#[async_trait]
impl PollStore for JsonFilePollStore {
    async fn get(&self, chat_id: ChatId) -> Result<Option<PollRecord>, StoreError> {
        Ok(self.inner.records.lock().await.get(&chat_id).cloned())
    }

    async fn upsert(&self, record: &PollRecord) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        let state = self.inner.clone();
        let record = record.clone();

        tokio::spawn(async move {
            let result = state.commit(record, &tx).await;
            let _ = tx.send(result);
        });

        rx.await
            .map_err(|_| StoreError::Backend("poll store writer stopped".to_string()))?
    }
}
