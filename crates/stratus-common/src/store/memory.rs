//! In-memory document store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DocumentStore, Versioned};
use crate::{Error, Result};

type Interleave<T> = Box<dyn FnOnce(&mut T) + Send>;

struct Entry<T> {
    version: u64,
    document: T,
}

/// Store backed by a process-local map
///
/// Etags are per-key version counters. Cloning shares the underlying map.
pub struct MemoryStore<T> {
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
    interleave: Arc<Mutex<Option<Interleave<T>>>>,
    writes: Arc<AtomicU64>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            interleave: Arc::clone(&self.interleave),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            interleave: Arc::new(Mutex::new(None)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a document unconditionally
    pub fn insert(&self, key: impl Into<String>, document: T) {
        let mut entries = self.entries.lock();
        let key = key.into();
        let version = entries.get(&key).map(|e| e.version + 1).unwrap_or(1);
        entries.insert(key, Entry { version, document });
    }

    /// Current document for a key, if any
    pub fn snapshot(&self, key: &str) -> Option<T> {
        self.entries.lock().get(key).map(|e| e.document.clone())
    }

    /// Number of successful conditional writes
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate another writer: the next `replace` first applies `change`
    /// to the stored document and bumps its version, so that write conflicts.
    pub fn interleave_once<F>(&self, change: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        *self.interleave.lock() = Some(Box::new(change));
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> DocumentStore<T> for MemoryStore<T> {
    async fn get(&self, key: &str) -> Result<Versioned<T>> {
        let entries = self.entries.lock();
        let entry = entries.get(key).ok_or_else(|| Error::Store {
            key: key.to_string(),
            message: "document not found".to_string(),
            not_found: true,
        })?;
        Ok(Versioned {
            etag: entry.version.to_string(),
            document: entry.document.clone(),
        })
    }

    async fn replace(&self, key: &str, document: T, etag: &str) -> Result<Versioned<T>> {
        let interleave = self.interleave.lock().take();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key).ok_or_else(|| Error::Store {
            key: key.to_string(),
            message: "document not found".to_string(),
            not_found: true,
        })?;

        if let Some(change) = interleave {
            change(&mut entry.document);
            entry.version += 1;
        }

        if entry.version.to_string() != etag {
            return Err(Error::conflict(key));
        }

        entry.version += 1;
        entry.document = document;
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(Versioned {
            etag: entry.version.to_string(),
            document: entry.document.clone(),
        })
    }
}
