//! Durable key-value storage
//!
//! [`FileKvStore`] keeps every key in one JSON object file and rewrites it
//! atomically on each commit, so a multi-key [`KeyValueStore::commit`]
//! either lands completely or not at all. [`MemoryKvStore`] is the
//! non-durable variant for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::fs_util::write_atomic;

/// A single mutation inside a [`KeyValueStore::commit`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: String },
    Remove { key: String },
}

impl StoreOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        StoreOp::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        StoreOp::Remove { key: key.into() }
    }
}

fn apply_ops(entries: &mut BTreeMap<String, String>, ops: Vec<StoreOp>) {
    for op in ops {
        match op {
            StoreOp::Set { key, value } => {
                entries.insert(key, value);
            }
            StoreOp::Remove { key } => {
                entries.remove(&key);
            }
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.commit(vec![StoreOp::set(key, value)]).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.commit(vec![StoreOp::remove(key)]).await
    }

    /// Apply every op or none of them.
    async fn commit(&self, ops: Vec<StoreOp>) -> Result<()>;
}

/// JSON-file backed store
pub struct FileKvStore {
    path: PathBuf,
    // Async mutex: held across the file write so commits never interleave.
    entries: tokio::sync::Mutex<BTreeMap<String, String>>,
}

impl FileKvStore {
    /// Open the store at `path`, creating it lazily on first commit.
    ///
    /// An unreadable JSON document is moved aside and the store starts
    /// empty; the update cycle then behaves like a first launch.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let load_path = path.clone();
        let entries = smol::unblock(move || Self::load(&load_path)).await?;

        log::info!(
            "[FileKvStore] Opened {} with {} keys",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read store file: {:?}", path));
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let aside = path.with_extension(format!(
                    "corrupt-{}",
                    chrono::Utc::now().timestamp_millis()
                ));
                log::error!(
                    "[FileKvStore] Store file {:?} is corrupted ({}), moving it to {:?}",
                    path,
                    e,
                    aside
                );
                std::fs::rename(path, &aside)
                    .with_context(|| format!("Failed to move corrupted store: {:?}", path))?;
                Ok(BTreeMap::new())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut entries = self.entries.lock().await;

        let mut next = entries.clone();
        apply_ops(&mut next, ops);

        let content =
            serde_json::to_vec_pretty(&next).context("Failed to serialize store contents")?;
        let path = self.path.clone();
        smol::unblock(move || write_atomic(&path, &content)).await?;

        *entries = next;
        Ok(())
    }
}

/// In-memory store. Loses everything when dropped.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Synchronous read, handy for assertions.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.peek(key))
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<()> {
        apply_ops(&mut self.lock(), ops);
        Ok(())
    }
}
