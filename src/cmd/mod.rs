//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                                       |
//! |-----------|--------------------------------------------------------|
//! | `project` | `Init`                                                 |
//! | `items`   | `Add`, `Status`, `Archive`, `Block`, `Unblock`, `Merge` |
//! | `phase`   | `Next`, `Promote`, `Start`, `Complete`, `Flush`        |
//! | `config`  | `Config`                                               |

pub mod config;
pub mod items;
pub mod phase;
pub mod project;

pub use config::cmd_config;
pub use items::{AddArgs, cmd_add, cmd_archive, cmd_block, cmd_merge, cmd_status, cmd_unblock};
pub use phase::{cmd_complete, cmd_flush, cmd_next, cmd_promote, cmd_start, phase_outcome};
pub use project::cmd_init;

use anyhow::{Context, Result};
use phasekeep::config::Config;
use phasekeep::coordinator::{self, CoordinatorHandle};
use phasekeep::errors::{CoordinatorError, ErrorCategory};
use phasekeep::init::is_initialized;
use phasekeep::store::Store;
use phasekeep::tracker::open_tracker;
use std::path::Path;
use tokio::task::JoinHandle;

use super::Cli;

/// A coordinator over the project's store for the length of one command.
pub struct Session {
    pub config: Config,
    pub handle: CoordinatorHandle,
    task: JoinHandle<()>,
}

impl Session {
    pub fn open(cli: &Cli, project_dir: &Path) -> Result<Self> {
        let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;
        if !is_initialized(&config.project_dir) {
            anyhow::bail!(
                "No phasekeep store in {}. Run 'phasekeep init' first.",
                config.project_dir.display()
            );
        }
        for warning in config.validate() {
            tracing::warn!("{}", warning);
        }

        let store = config.store();
        let vcs = open_tracker(&config.project_dir, store.backing_files());
        let (handle, task) = coordinator::spawn(store, vcs, config.coordinator_settings());
        Ok(Self {
            config,
            handle,
            task,
        })
    }

    /// Commit whatever the command batched and stop the coordinator.
    pub async fn close(self) -> Result<()> {
        let Session { handle, task, .. } = self;
        match handle.flush_batch().await {
            Ok(Some(revision)) => tracing::debug!(commit = %revision, "Committed changes"),
            Ok(None) => {}
            Err(CoordinatorError::Halted) => {}
            Err(e) => return Err(e.into()),
        }
        drop(handle);
        task.await.context("Coordinator task failed")?;
        Ok(())
    }
}

/// Skip errors are reported and treated as success; everything else fails
/// the command.
pub fn skip_or_fail<T>(result: Result<T, CoordinatorError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.category() == ErrorCategory::Skip => {
            println!("{} {}", console::style("Skipped:").yellow(), e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
