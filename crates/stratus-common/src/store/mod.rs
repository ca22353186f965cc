//! Document store with optimistic concurrency
//!
//! A store hands out documents with an opaque etag and accepts a replacement
//! only if the etag still matches. [`patch_with_lease`] builds the
//! read-mutate-write loop on top of that and is the only way the
//! orchestrator writes its documents.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::retry::RetryConfig;
use crate::{Error, Result};

/// A document together with the etag it was read at
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    /// Opaque version tag
    pub etag: String,
    /// The document
    pub document: T,
}

/// Documents that carry a lease owner
pub trait Leased {
    /// Current lease holder, if any
    fn lease_owner(&self) -> Option<&str>;
}

/// Durable per-key document storage with compare-and-swap writes
#[async_trait]
pub trait DocumentStore<T: Clone + Send + Sync + 'static>: Send + Sync {
    /// Read a document; missing keys return a not-found store error
    async fn get(&self, key: &str) -> Result<Versioned<T>>;

    /// Replace a document if its etag still matches
    ///
    /// Returns [`Error::Conflict`] when another writer got there first.
    async fn replace(&self, key: &str, document: T, etag: &str) -> Result<Versioned<T>>;
}

/// Read, mutate and write a document under the caller's lease
///
/// The mutation runs against a fresh copy on every attempt and is retried
/// while the write conflicts. A document leased by someone else is never
/// written. The returned document is the new source of truth.
pub async fn patch_with_lease<T, S, F>(
    store: &S,
    key: &str,
    owner: &str,
    retry: &RetryConfig,
    mut mutate: F,
) -> Result<T>
where
    T: Leased + Clone + Send + Sync + 'static,
    S: DocumentStore<T> + ?Sized,
    F: FnMut(&mut T) -> Result<()> + Send,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match patch_once(store, key, owner, &mut mutate).await {
            Err(e) if e.is_conflict() && (retry.max_attempts == 0 || attempt < retry.max_attempts) => {
                warn!(key = %key, attempt = attempt, "document changed underneath us, re-reading");
                tokio::time::sleep(retry.initial_delay).await;
            }
            result => return result,
        }
    }
}

async fn patch_once<T, S, F>(store: &S, key: &str, owner: &str, mutate: &mut F) -> Result<T>
where
    T: Leased + Clone + Send + Sync + 'static,
    S: DocumentStore<T> + ?Sized,
    F: FnMut(&mut T) -> Result<()> + Send,
{
    let current = store.get(key).await?;

    if let Some(holder) = current.document.lease_owner() {
        if holder != owner {
            return Err(Error::LeaseLost {
                key: key.to_string(),
                holder: holder.to_string(),
            });
        }
    }

    let mut next = current.document.clone();
    mutate(&mut next)?;

    let written = store.replace(key, next, &current.etag).await?;
    debug!(key = %key, etag = %written.etag, "patched document");
    Ok(written.document)
}
