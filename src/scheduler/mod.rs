//! Pure action selection over a snapshot of items.
//!
//! [`plan_tick`] performs no I/O and is deterministic: the same items,
//! running work, limits and pipelines always produce the same plan.
//!
//! Per tick:
//! 1. Signal actions (archive, unblock, merge, triage) are emitted without
//!    consuming capacity. Items receiving a merge or triage signal get no
//!    other action.
//! 2. Remaining items are bucketed by status and sorted: `Ready` by impact
//!    then age, `InProgress` and `Scoping` furthest-along first then age,
//!    `New` by age. Ties fall back to ID.
//! 3. Buckets are visited in the order `Ready`, `InProgress`, `Scoping`,
//!    `New`; each candidate needs its dependencies met, a free WIP slot and,
//!    for destructive phases, a free exclusive slot.

mod types;

pub use types::{
    ExecutionLimits, RunningTask, RunningTasks, SchedulerAction, SkipReason, TickPlan,
};

use crate::item::{ItemStatus, PhasePool, WorkItem};
use crate::pipeline::PipelineSet;
use std::cmp::Reverse;
use std::collections::HashMap;

/// Actions for this tick. See [`plan_tick`] for the skipped list.
pub fn select_actions(
    items: &[WorkItem],
    running: &RunningTasks,
    limits: &ExecutionLimits,
    pipelines: &PipelineSet,
) -> Vec<SchedulerAction> {
    plan_tick(items, running, limits, pipelines).actions
}

/// Compute the next actions and the reason every other candidate was passed over.
pub fn plan_tick(
    items: &[WorkItem],
    running: &RunningTasks,
    limits: &ExecutionLimits,
    pipelines: &PipelineSet,
) -> TickPlan {
    let statuses: HashMap<&str, ItemStatus> =
        items.iter().map(|item| (item.id(), item.status())).collect();

    let mut ordered: Vec<&WorkItem> = items.iter().collect();
    ordered.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.id().cmp(b.id())));

    let mut plan = TickPlan::default();
    let mut ready = Vec::new();
    let mut in_progress = Vec::new();
    let mut scoping = Vec::new();
    let mut new = Vec::new();

    for item in ordered {
        let status = item.status();
        if running.contains(item.id()) {
            plan.skipped
                .push((item.id().to_string(), SkipReason::AlreadyRunning));
            continue;
        }
        match status {
            ItemStatus::Done => {
                plan.actions.push(SchedulerAction::Archive {
                    item_id: item.id().to_string(),
                });
                continue;
            }
            ItemStatus::Blocked => {
                if let Some(context) = item.unblock_context() {
                    plan.actions.push(SchedulerAction::Unblock {
                        item_id: item.id().to_string(),
                        context: context.to_string(),
                    });
                }
                continue;
            }
            _ => {}
        }

        if let Some(target) = item.merge_into() {
            if target != item.id() && statuses.contains_key(target) {
                plan.actions.push(SchedulerAction::Merge {
                    source: item.id().to_string(),
                    target: target.to_string(),
                });
            } else {
                plan.skipped.push((
                    item.id().to_string(),
                    SkipReason::MergeTargetMissing {
                        target: target.to_string(),
                    },
                ));
            }
            continue;
        }
        if item.triage_requested() {
            plan.actions.push(SchedulerAction::Triage {
                item_id: item.id().to_string(),
            });
            continue;
        }

        match status {
            ItemStatus::Ready => ready.push(item),
            ItemStatus::InProgress => in_progress.push(item),
            ItemStatus::Scoping => scoping.push(item),
            ItemStatus::New => new.push(item),
            ItemStatus::Done | ItemStatus::Blocked => {}
        }
    }

    // `ordered` is already by (created_at, id); stable sorts keep that as the tiebreak.
    ready.sort_by_key(|item| Reverse(item.impact()));
    in_progress.sort_by_key(|item| Reverse(pipelines.phase_index(item)));
    scoping.sort_by_key(|item| Reverse(pipelines.phase_index(item)));

    let mut capacity = Capacity {
        wip_free: limits.max_wip.saturating_sub(running.len()),
        exclusive_free: limits
            .max_exclusive
            .saturating_sub(running.destructive_count()),
    };

    for item in ready {
        let action = SchedulerAction::Promote {
            item_id: item.id().to_string(),
            from: ItemStatus::Ready,
        };
        capacity.offer(item, action, &statuses, &mut plan);
    }
    for item in in_progress.into_iter().chain(scoping) {
        let Some(phase) = pipelines.current_phase(item) else {
            plan.skipped
                .push((item.id().to_string(), SkipReason::NoRunnablePhase));
            continue;
        };
        let pool = match item.status() {
            ItemStatus::Scoping => PhasePool::Pre,
            _ => PhasePool::Main,
        };
        let action = SchedulerAction::RunPhase {
            item_id: item.id().to_string(),
            phase: phase.name.clone(),
            pool: item.phase_pool().unwrap_or(pool),
            destructive: phase.destructive,
        };
        capacity.offer(item, action, &statuses, &mut plan);
    }
    for item in new {
        let action = SchedulerAction::Promote {
            item_id: item.id().to_string(),
            from: ItemStatus::New,
        };
        capacity.offer(item, action, &statuses, &mut plan);
    }

    plan
}

struct Capacity {
    wip_free: usize,
    exclusive_free: usize,
}

impl Capacity {
    fn offer(
        &mut self,
        item: &WorkItem,
        action: SchedulerAction,
        statuses: &HashMap<&str, ItemStatus>,
        plan: &mut TickPlan,
    ) {
        let id = item.id().to_string();
        let waiting_on = unmet_dependencies(item, statuses);
        if !waiting_on.is_empty() {
            plan.skipped
                .push((id, SkipReason::UnmetDependencies { waiting_on }));
            return;
        }
        if self.wip_free == 0 {
            plan.skipped.push((id, SkipReason::WipLimit));
            return;
        }
        if action.is_destructive() {
            if self.exclusive_free == 0 {
                plan.skipped.push((id, SkipReason::ExclusiveLimit));
                return;
            }
            self.exclusive_free -= 1;
        }
        self.wip_free -= 1;
        plan.actions.push(action);
    }
}

/// Dependencies that are present in the set and not yet done. IDs missing
/// from the set (archived or unknown) count as satisfied.
pub fn unmet_dependencies(item: &WorkItem, statuses: &HashMap<&str, ItemStatus>) -> Vec<String> {
    item.dependencies()
        .iter()
        .filter(|dep| dep.as_str() != item.id())
        .filter(|dep| {
            statuses
                .get(dep.as_str())
                .is_some_and(|status| !status.is_terminal())
        })
        .cloned()
        .collect()
}
