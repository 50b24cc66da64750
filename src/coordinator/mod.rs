//! Single-writer coordinator for the work-item store.
//!
//! Every state change goes through one tokio task that owns the store and the
//! version-control handle. Callers talk to it through a cloneable
//! [`CoordinatorHandle`]; each request carries a oneshot reply channel. Store
//! calls run on the blocking pool so the loop never blocks on file locks.
//!
//! Non-destructive changes are staged and batched until [`CoordinatorHandle::flush_batch`];
//! completion of a destructive phase is committed immediately after any
//! pending batch.
//!
//! After a fatal error the loop stops and drops its receiver, so every later
//! request fails with [`CoordinatorError::Halted`].

mod actor;
mod batch;
mod commands;
mod merge;
mod retry;


pub use batch::BatchEntry;
pub use commands::{CommitDisposition, PhaseCompletion, PhaseOutcome, PhaseReport};
pub use retry::RetryPolicy;

use crate::errors::CoordinatorError;
use crate::item::{ItemStatus, ItemUpdate, NewItem, WorkItem};
use crate::pipeline::{PipelineSet, Progress};
use crate::store::Store;
use crate::tracker::VersionControl;
use actor::Actor;
use commands::{Command, Reply};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const DEFAULT_ID_PREFIX: &str = "WRK";
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Static configuration for a coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Prefix for IDs allocated to follow-up items
    pub id_prefix: String,
    pub pipelines: PipelineSet,
    pub retry: RetryPolicy,
    /// Bound of the command queue; senders wait when it is full
    pub queue_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            pipelines: PipelineSet::default(),
            retry: RetryPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl CoordinatorSettings {
    pub fn with_id_prefix(mut self, prefix: &str) -> Self {
        self.id_prefix = prefix.to_string();
        self
    }

    pub fn with_pipelines(mut self, pipelines: PipelineSet) -> Self {
        self.pipelines = pipelines;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Start the coordinator loop on the current tokio runtime.
///
/// The loop ends when every handle has been dropped or after a fatal error.
pub fn spawn<S, V>(
    store: S,
    vcs: V,
    settings: CoordinatorSettings,
) -> (CoordinatorHandle, JoinHandle<()>)
where
    S: Store,
    V: VersionControl,
{
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    let vcs: Arc<dyn VersionControl> = Arc::new(vcs);
    let actor = Actor::new(Arc::new(store), vcs, settings);
    let task = tokio::spawn(actor.run(rx));
    (CoordinatorHandle { tx }, task)
}

/// Cloneable client of the coordinator loop.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CoordinatorError::Halted)?;
        rx.await.map_err(|_| CoordinatorError::Halted)?
    }

    /// All active items, read without taking the store lock.
    pub async fn get_snapshot(&self) -> Result<Vec<WorkItem>, CoordinatorError> {
        self.request(|reply| Command::GetSnapshot { reply }).await
    }

    /// Apply `updates` in order; nothing is saved if any of them fails.
    pub async fn update_item(
        &self,
        id: &str,
        updates: Vec<ItemUpdate>,
    ) -> Result<WorkItem, CoordinatorError> {
        let id = id.to_string();
        self.request(|reply| Command::UpdateItem { id, updates, reply })
            .await
    }

    /// Move a `New` item into its first pre-phase or a `Ready` item into its
    /// first main phase.
    pub async fn promote(&self, id: &str) -> Result<Progress, CoordinatorError> {
        let id = id.to_string();
        self.request(|reply| Command::Promote { id, reply }).await
    }

    /// Remember the revision a phase started from. With no revision given,
    /// the current HEAD is used. Returns what was recorded.
    pub async fn record_phase_start(
        &self,
        id: &str,
        revision: Option<String>,
    ) -> Result<Option<String>, CoordinatorError> {
        let id = id.to_string();
        self.request(|reply| Command::RecordPhaseStart {
            id,
            revision,
            reply,
        })
        .await
    }

    pub async fn complete_phase(
        &self,
        completion: PhaseCompletion,
    ) -> Result<PhaseReport, CoordinatorError> {
        self.request(|reply| Command::CompletePhase { completion, reply })
            .await
    }

    /// Commit every batched change. Returns the new revision, or `None` when
    /// there was nothing to commit or the commit failed.
    pub async fn flush_batch(&self) -> Result<Option<String>, CoordinatorError> {
        self.request(|reply| Command::FlushBatch { reply }).await
    }

    /// Move a `Done` item from the active set to the archive.
    pub async fn archive_item(&self, id: &str) -> Result<(), CoordinatorError> {
        let id = id.to_string();
        self.request(|reply| Command::ArchiveItem { id, reply }).await
    }

    /// Create new items with freshly allocated IDs, returned in input order.
    pub async fn ingest_follow_ups(
        &self,
        follow_ups: Vec<NewItem>,
    ) -> Result<Vec<String>, CoordinatorError> {
        self.request(|reply| Command::IngestFollowUps { follow_ups, reply })
            .await
    }

    pub async fn merge_item(&self, source: &str, target: &str) -> Result<(), CoordinatorError> {
        let (source, target) = (source.to_string(), target.to_string());
        self.request(|reply| Command::MergeItem {
            source,
            target,
            reply,
        })
        .await
    }

    /// Restore a blocked item to the status it was blocked from.
    pub async fn unblock_item(
        &self,
        id: &str,
        context: Option<String>,
    ) -> Result<ItemStatus, CoordinatorError> {
        let id = id.to_string();
        self.request(|reply| Command::UnblockItem { id, context, reply })
            .await
    }
}
