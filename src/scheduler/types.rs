//! Inputs and outputs of a scheduling tick.

use crate::item::{ItemStatus, PhasePool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Concurrency ceilings for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Maximum items doing work at once (running plus newly dispatched)
    pub max_wip: usize,
    /// Maximum destructive phases running at once
    pub max_exclusive: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_wip: 3,
            max_exclusive: 1,
        }
    }
}

impl ExecutionLimits {
    pub fn with_max_wip(mut self, max: usize) -> Self {
        self.max_wip = max;
        self
    }

    pub fn with_max_exclusive(mut self, max: usize) -> Self {
        self.max_exclusive = max;
        self
    }
}

/// A phase currently executing for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTask {
    pub phase: String,
    pub pool: PhasePool,
    pub destructive: bool,
}

/// In-flight work keyed by item ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningTasks {
    tasks: BTreeMap<String, RunningTask>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item_id: &str, task: RunningTask) {
        self.tasks.insert(item_id.to_string(), task);
    }

    pub fn remove(&mut self, item_id: &str) -> Option<RunningTask> {
        self.tasks.remove(item_id)
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.tasks.contains_key(item_id)
    }

    pub fn get(&self, item_id: &str) -> Option<&RunningTask> {
        self.tasks.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn destructive_count(&self) -> usize {
        self.tasks.values().filter(|t| t.destructive).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunningTask)> {
        self.tasks.iter().map(|(id, task)| (id.as_str(), task))
    }
}

/// Something the caller should do this tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SchedulerAction {
    /// Advance the domain sub-state (`New` or `Ready`)
    Promote { item_id: String, from: ItemStatus },
    /// Dispatch the item's current phase for execution
    RunPhase {
        item_id: String,
        phase: String,
        pool: PhasePool,
        destructive: bool,
    },
    /// A human asked for the item to be re-assessed
    Triage { item_id: String },
    /// Fold `source` into `target`
    Merge { source: String, target: String },
    /// Retire a finished item
    Archive { item_id: String },
    /// A blocked item has received its answer
    Unblock { item_id: String, context: String },
}

impl SchedulerAction {
    /// Item the action is about (the source, for merges).
    pub fn item_id(&self) -> &str {
        match self {
            SchedulerAction::Promote { item_id, .. }
            | SchedulerAction::RunPhase { item_id, .. }
            | SchedulerAction::Triage { item_id }
            | SchedulerAction::Archive { item_id }
            | SchedulerAction::Unblock { item_id, .. } => item_id,
            SchedulerAction::Merge { source, .. } => source,
        }
    }

    /// Whether the action takes a WIP slot.
    pub fn uses_capacity(&self) -> bool {
        matches!(
            self,
            SchedulerAction::Promote { .. } | SchedulerAction::RunPhase { .. }
        )
    }

    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchedulerAction::RunPhase {
                destructive: true,
                ..
            }
        )
    }
}

impl std::fmt::Display for SchedulerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerAction::Promote { item_id, from } => {
                write!(f, "promote {} (from {})", item_id, from)
            }
            SchedulerAction::RunPhase {
                item_id,
                phase,
                pool,
                destructive,
            } => {
                write!(f, "run {} phase '{}' for {}", pool, phase, item_id)?;
                if *destructive {
                    write!(f, " [destructive]")?;
                }
                Ok(())
            }
            SchedulerAction::Triage { item_id } => write!(f, "triage {}", item_id),
            SchedulerAction::Merge { source, target } => {
                write!(f, "merge {} into {}", source, target)
            }
            SchedulerAction::Archive { item_id } => write!(f, "archive {}", item_id),
            SchedulerAction::Unblock { item_id, .. } => write!(f, "unblock {}", item_id),
        }
    }
}

/// Why an item got no action this tick. Re-evaluated every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Dependencies present in the set and not yet done
    UnmetDependencies { waiting_on: Vec<String> },
    AlreadyRunning,
    WipLimit,
    ExclusiveLimit,
    /// Scoping or in progress, but the current phase is unknown to its pipeline
    NoRunnablePhase,
    /// Carries a merge signal whose target is not in the active set
    MergeTargetMissing { target: String },
}

impl SkipReason {
    fn label(&self) -> &'static str {
        match self {
            SkipReason::UnmetDependencies { .. } => "waiting on dependencies",
            SkipReason::AlreadyRunning => "already running",
            SkipReason::WipLimit => "at WIP limit",
            SkipReason::ExclusiveLimit => "waiting for exclusive slot",
            SkipReason::NoRunnablePhase => "no runnable phase",
            SkipReason::MergeTargetMissing { .. } => "merge target missing",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnmetDependencies { waiting_on } => {
                write!(f, "waiting on {}", waiting_on.join(", "))
            }
            SkipReason::MergeTargetMissing { target } => {
                write!(f, "merge target {} not found", target)
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Result of one scheduling tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickPlan {
    pub actions: Vec<SchedulerAction>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl TickPlan {
    pub fn is_idle(&self) -> bool {
        self.actions.is_empty()
    }

    /// One-line count of skips per reason, e.g. `2 waiting on dependencies, 1 at WIP limit`.
    pub fn skip_summary(&self) -> String {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for (_, reason) in &self.skipped {
            *counts.entry(reason.label()).or_default() += 1;
        }
        counts
            .iter()
            .map(|(label, n)| format!("{} {}", n, label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
