//! `phasekeep init`: create the `.phasekeep/` directory in a project.
//!
//! ```text
//! .phasekeep/
//! ├── items.json       # active items (empty set on init)
//! ├── phasekeep.toml   # configuration with defaults written out
//! └── .gitignore       # keeps the lock file and temp files out of git
//! ```
//!
//! `archive.jsonl` and `items.lock` are created on first use.

use crate::config::{CONFIG_FILE, PhasekeepToml};
use crate::store::{FileStore, LOCK_FILE};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the phasekeep store directory.
pub const STORE_DIR: &str = ".phasekeep";

const GITIGNORE_FILE: &str = ".gitignore";

/// Result of initializing a phasekeep project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .phasekeep directory
    pub store_dir: PathBuf,
    /// Whether the item store was newly created (false if it already existed)
    pub created: bool,
    /// Whether a default phasekeep.toml was written
    pub wrote_config: bool,
}

/// Initialize a phasekeep project in the given directory.
///
/// Safe to run repeatedly: existing files are left untouched and only
/// missing pieces are created.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let store_dir = get_store_dir(project_dir);

    let created = FileStore::new(&store_dir)
        .init()
        .with_context(|| format!("Failed to initialize store in {}", store_dir.display()))?;

    let gitignore = store_dir.join(GITIGNORE_FILE);
    if !gitignore.exists() {
        std::fs::write(&gitignore, format!("{}\n*.tmp\n", LOCK_FILE))
            .with_context(|| format!("Failed to create {}", gitignore.display()))?;
    }

    let config_path = store_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        PhasekeepToml::default().save(&config_path)?;
    }

    Ok(InitResult {
        store_dir,
        created,
        wrote_config,
    })
}

/// Check if a project already has an item store.
pub fn is_initialized(project_dir: &Path) -> bool {
    FileStore::new(get_store_dir(project_dir))
        .items_path()
        .exists()
}

/// Get the path to the store directory for a project.
pub fn get_store_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STORE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_store_directory() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.store_dir, dir.path().join(".phasekeep"));
        assert!(result.store_dir.join("items.json").is_file());
        assert!(result.store_dir.join("phasekeep.toml").is_file());

        let store = FileStore::new(&result.store_dir);
        assert!(store.load_active().unwrap().is_empty());
    }

    #[test]
    fn test_init_project_ignores_lock_and_temp_files() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".phasekeep/.gitignore")).unwrap();
        assert!(content.lines().any(|l| l == "items.lock"));
        assert!(content.lines().any(|l| l == "*.tmp"));
    }

    #[test]
    fn test_init_project_twice_keeps_existing_files() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let config_path = dir.path().join(".phasekeep/phasekeep.toml");
        std::fs::write(&config_path, "[project]\nprefix = \"OPS\"\n").unwrap();

        let result = init_project(dir.path()).unwrap();
        assert!(!result.created);
        assert!(!result.wrote_config);
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("OPS"));
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
    }
}
