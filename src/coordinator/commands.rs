//! Command vocabulary accepted by the coordinator loop.

use crate::errors::CoordinatorError;
use crate::item::{BlockType, ItemStatus, ItemUpdate, NewItem, WorkItem};
use crate::pipeline::Progress;
use std::path::PathBuf;
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

/// How a phase run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase finished; move the item along its pipeline
    PhaseComplete,
    /// The phase needs a human before it can continue
    Blocked {
        reason: String,
        blocked_type: BlockType,
    },
    /// The phase could not finish; the item is blocked with the failure reason
    Failed { reason: String },
}

impl PhaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseOutcome::PhaseComplete => "complete",
            PhaseOutcome::Blocked { .. } => "blocked",
            PhaseOutcome::Failed { .. } => "failed",
        }
    }
}

/// Result of one phase run, as reported by whoever executed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCompletion {
    pub item_id: String,
    pub phase: String,
    /// Whether the phase ran as an exclusive phase. Destructive completions
    /// are committed on their own; the rest join the batch.
    pub destructive: bool,
    pub outcome: PhaseOutcome,
    /// Files the phase produced; staged before the store is touched
    pub artifacts: Vec<PathBuf>,
}

impl PhaseCompletion {
    pub fn complete(item_id: &str, phase: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            phase: phase.to_string(),
            destructive: false,
            outcome: PhaseOutcome::PhaseComplete,
            artifacts: Vec::new(),
        }
    }

    pub fn with_destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    pub fn with_outcome(mut self, outcome: PhaseOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// How the version-control side of a phase completion was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitDisposition {
    /// Destructive phase committed on its own
    Committed(String),
    /// Added to the batch for the next flush
    Batched,
    /// Nothing to commit, or the commit failed and the change was batched for retry
    Deferred,
}

/// Reply to a phase completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub status: ItemStatus,
    /// Pipeline movement, for a completed phase
    pub progress: Option<Progress>,
    pub destructive: bool,
    pub commit: CommitDisposition,
}

pub(crate) enum Command {
    GetSnapshot {
        reply: Reply<Vec<WorkItem>>,
    },
    UpdateItem {
        id: String,
        updates: Vec<ItemUpdate>,
        reply: Reply<WorkItem>,
    },
    Promote {
        id: String,
        reply: Reply<Progress>,
    },
    RecordPhaseStart {
        id: String,
        revision: Option<String>,
        reply: Reply<Option<String>>,
    },
    CompletePhase {
        completion: PhaseCompletion,
        reply: Reply<PhaseReport>,
    },
    FlushBatch {
        reply: Reply<Option<String>>,
    },
    ArchiveItem {
        id: String,
        reply: Reply<()>,
    },
    IngestFollowUps {
        follow_ups: Vec<NewItem>,
        reply: Reply<Vec<String>>,
    },
    MergeItem {
        source: String,
        target: String,
        reply: Reply<()>,
    },
    UnblockItem {
        id: String,
        context: Option<String>,
        reply: Reply<ItemStatus>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetSnapshot { .. } => "get_snapshot",
            Command::UpdateItem { .. } => "update_item",
            Command::Promote { .. } => "promote",
            Command::RecordPhaseStart { .. } => "record_phase_start",
            Command::CompletePhase { .. } => "complete_phase",
            Command::FlushBatch { .. } => "flush_batch",
            Command::ArchiveItem { .. } => "archive_item",
            Command::IngestFollowUps { .. } => "ingest_follow_ups",
            Command::MergeItem { .. } => "merge_item",
            Command::UnblockItem { .. } => "unblock_item",
        }
    }
}
