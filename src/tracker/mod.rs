//! Version-control sequencing for phase artifacts and store files.
//!
//! The coordinator only ever stages explicit paths, stages the store's own
//! backing files, and commits. It never resolves conflicts or touches
//! branches.

mod git;

pub use git::GitTracker;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub trait VersionControl: Send + Sync + 'static {
    /// Stage the given paths. Paths that no longer exist are staged as deletions.
    fn stage(&self, paths: &[PathBuf]) -> Result<()>;

    /// Reset the given paths in the index to HEAD, dropping staged changes.
    fn unstage(&self, paths: &[PathBuf]) -> Result<()>;

    /// Stage only the store's backing files.
    fn stage_self(&self) -> Result<()>;

    /// Commit the index. Returns `None` when there was nothing to commit.
    fn commit(&self, message: &str) -> Result<Option<String>>;

    /// Current HEAD revision, `None` for an unborn branch.
    fn head_revision(&self) -> Option<String>;
}

/// Tracker used outside a git repository: every operation is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl VersionControl for NoopTracker {
    fn stage(&self, _paths: &[PathBuf]) -> Result<()> {
        Ok(())
    }

    fn unstage(&self, _paths: &[PathBuf]) -> Result<()> {
        Ok(())
    }

    fn stage_self(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _message: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn head_revision(&self) -> Option<String> {
        None
    }
}

/// Open a [`GitTracker`] when `project_dir` is inside a git repository,
/// otherwise fall back to [`NoopTracker`].
pub fn open_tracker(project_dir: &Path, store_files: Vec<PathBuf>) -> Box<dyn VersionControl> {
    match GitTracker::new(project_dir, store_files) {
        Ok(tracker) => Box::new(tracker),
        Err(e) => {
            tracing::debug!(error = %e, "No git repository, commits disabled");
            Box::new(NoopTracker)
        }
    }
}

impl<T: VersionControl + ?Sized> VersionControl for Box<T> {
    fn stage(&self, paths: &[PathBuf]) -> Result<()> {
        (**self).stage(paths)
    }

    fn unstage(&self, paths: &[PathBuf]) -> Result<()> {
        (**self).unstage(paths)
    }

    fn stage_self(&self) -> Result<()> {
        (**self).stage_self()
    }

    fn commit(&self, message: &str) -> Result<Option<String>> {
        (**self).commit(message)
    }

    fn head_revision(&self) -> Option<String> {
        (**self).head_revision()
    }
}
