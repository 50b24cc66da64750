//! Durable item store.
//!
//! The orchestrator treats the store as an external collaborator with a small
//! contract ([`Store`]): atomic snapshot load and save of the active item set,
//! an exclusive cross-process lock with a bounded wait, and an append-only
//! archive for retired items.
//!
//! [`FileStore`] is the on-disk implementation used by the CLI:
//!
//! ```text
//! .phasekeep/
//! ├── items.json      # active items, replaced atomically on every save
//! ├── archive.jsonl   # retired items, one JSON object per line
//! └── items.lock      # advisory lock file (fs2)
//! ```

mod file;
mod id;
mod item;

pub use file::{ARCHIVE_FILE, FileStore, ITEMS_FILE, LOCK_FILE};
pub use id::{IdAllocator, MAX_ID_ATTEMPTS};
pub use item::{Item, NativeStatus};

use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Timed out after {waited_ms}ms waiting for the store lock")]
    LockTimeout { waited_ms: u64 },

    #[error("Store is not initialized at {path} (run `phasekeep init`)")]
    NotInitialized { path: PathBuf },

    #[error("Store data in {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Item {id} not found")]
    ItemNotFound { id: String },

    #[error("Could not allocate a free ID with prefix '{prefix}' after {attempts} attempts")]
    IdExhausted { prefix: String, attempts: u32 },

    #[error("Invalid ID or prefix '{id}'")]
    InvalidId { id: String },

    #[error("Store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Contract the coordinator relies on. Every call blocks the calling thread.
pub trait Store: Send + Sync + 'static {
    /// Load the active item set in stored order.
    fn load_active(&self) -> Result<Vec<Item>, StoreError>;

    /// Replace the active item set. All-or-nothing.
    fn save_active(&self, items: &[Item]) -> Result<(), StoreError>;

    /// Run `f` while holding the exclusive store lock.
    ///
    /// Fails with [`StoreError::LockTimeout`] when the lock cannot be taken
    /// within the store's bounded wait; `f` is not run in that case.
    fn with_lock<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StoreError>;

    /// Durably append a retired item to the archive.
    fn append_to_archive(&self, item: &Item) -> Result<(), StoreError>;

    /// IDs of every archived item.
    fn archived_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Every ID in the active set and the archive.
    fn all_known_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut ids = self.archived_ids()?;
        ids.extend(self.load_active()?.into_iter().map(|i| i.id));
        Ok(ids)
    }

    /// Files backing the store, for staging alongside state changes.
    fn backing_files(&self) -> Vec<PathBuf>;
}

/// Find an item by ID in a loaded collection.
pub fn find_item_mut<'a>(items: &'a mut [Item], id: &str) -> Result<&'a mut Item, StoreError> {
    items
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| StoreError::ItemNotFound { id: id.to_string() })
}
