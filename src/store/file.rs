//! File-backed [`Store`] implementation.

use super::{Item, Store, StoreError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const ITEMS_FILE: &str = "items.json";
pub const ARCHIVE_FILE: &str = "archive.jsonl";
pub const LOCK_FILE: &str = "items.lock";

const SCHEMA_VERSION: u32 = 1;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    schema_version: u32,
    items: Vec<Item>,
}

/// Store rooted at a `.phasekeep/` directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set the bounded wait for lock acquisition.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn items_path(&self) -> PathBuf {
        self.root.join(ITEMS_FILE)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(ARCHIVE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Create the store directory and an empty item file.
    ///
    /// Returns `false` when the store already existed.
    pub fn init(&self) -> Result<bool, StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        if self.items_path().exists() {
            return Ok(false);
        }
        self.save_active(&[])?;
        Ok(true)
    }

    /// Load every archived item in append order.
    pub fn load_archive(&self) -> Result<Vec<Item>, StoreError> {
        self.ensure_initialized()?;
        let path = self.archive_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).map_err(|source| io_error(&path, source))?;
        let mut items = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| io_error(&path, source))?;
            if line.trim().is_empty() {
                continue;
            }
            let item: Item = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: format!("line {}: {}", number + 1, e),
            })?;
            items.push(item);
        }
        Ok(items)
    }

    fn ensure_initialized(&self) -> Result<(), StoreError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(StoreError::NotInitialized {
                path: self.root.clone(),
            })
        }
    }

    fn acquire_lock(&self) -> Result<File, StoreError> {
        self.ensure_initialized()?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::LockTimeout {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(source) => return Err(io_error(&path, source)),
            }
        }
    }
}

impl Store for FileStore {
    fn load_active(&self) -> Result<Vec<Item>, StoreError> {
        self.ensure_initialized()?;
        let path = self.items_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupt {
                path,
                message: format!(
                    "unsupported schema version {} (expected {})",
                    snapshot.schema_version, SCHEMA_VERSION
                ),
            });
        }
        Ok(snapshot.items)
    }

    fn save_active(&self, items: &[Item]) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        let path = self.items_path();
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION,
            items: items.to_vec(),
        };
        let content = serde_json::to_string_pretty(&snapshot).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: format!("failed to serialize items: {}", e),
        })?;
        atomic_write(&path, content.as_bytes())
    }

    fn with_lock<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StoreError>,
    {
        let lock = self.acquire_lock()?;
        let result = f();
        if let Err(e) = FileExt::unlock(&lock) {
            tracing::warn!(error = %e, "Failed to release store lock explicitly");
        }
        result
    }

    fn append_to_archive(&self, item: &Item) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        let path = self.archive_path();
        let mut line = serde_json::to_string(item).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: format!("failed to serialize item {}: {}", item.id, e),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|source| io_error(&path, source))
    }

    fn archived_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.load_archive()?.into_iter().map(|i| i.id).collect())
    }

    fn backing_files(&self) -> Vec<PathBuf> {
        vec![self.items_path(), self.archive_path()]
    }
}

/// Write to a sibling temp file, fsync, then rename over the target.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|source| io_error(&tmp, source))?;
    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|source| io_error(&tmp, source))?;
    fs::rename(&tmp, path).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
