use super::CoordinatorSettings;
use super::batch::CommitBatch;
use super::commands::{Command, CommitDisposition, PhaseCompletion, PhaseOutcome, PhaseReport, Reply};
use super::merge::merge_items;
use super::retry::{call_store, panic_message};
use crate::errors::{CoordinatorError, ErrorCategory};
use crate::item::{
    self, ItemStatus, ItemUpdate, NewItem, WorkItem, apply_update, is_valid_revision, new_item,
    set_blocked, set_last_phase_commit,
};
use crate::pipeline::{self, PipelineSet, Progress};
use crate::store::{IdAllocator, Item, Store, StoreError, find_item_mut};
use crate::tracker::VersionControl;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub(crate) struct Actor<S: Store> {
    store: Arc<S>,
    vcs: Arc<dyn VersionControl>,
    settings: Arc<CoordinatorSettings>,
    batch: CommitBatch,
}

/// What a phase completion did to the stored item.
#[derive(Debug)]
struct AppliedOutcome {
    status: ItemStatus,
    progress: Option<Progress>,
    phase_start: Option<String>,
}

impl<S: Store> Actor<S> {
    pub(crate) fn new(
        store: Arc<S>,
        vcs: Arc<dyn VersionControl>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            vcs,
            settings: Arc::new(settings),
            batch: CommitBatch::default(),
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!("Coordinator started");
        while let Some(command) = rx.recv().await {
            let name = command.name();
            debug!(command = name, "Dispatching command");
            if self.dispatch(command).await {
                error!(command = name, "Coordinator halting after fatal error");
                break;
            }
        }
        // Queued and future senders see a closed channel.
        drop(rx);
        if !self.batch.is_empty() {
            warn!(
                pending = self.batch.len(),
                "Coordinator stopped with uncommitted batched changes"
            );
        }
        info!("Coordinator stopped");
    }

    /// Handle one command. Returns true when the loop must stop.
    async fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::GetSnapshot { reply } => {
                let result = self.get_snapshot().await;
                respond("get_snapshot", reply, result)
            }
            Command::UpdateItem { id, updates, reply } => {
                let result = self.update_item(id, updates).await;
                respond("update_item", reply, result)
            }
            Command::Promote { id, reply } => {
                let result = self.promote(id).await;
                respond("promote", reply, result)
            }
            Command::RecordPhaseStart {
                id,
                revision,
                reply,
            } => {
                let result = self.record_phase_start(id, revision).await;
                respond("record_phase_start", reply, result)
            }
            Command::CompletePhase { completion, reply } => {
                let result = self.complete_phase(completion).await;
                respond("complete_phase", reply, result)
            }
            Command::FlushBatch { reply } => {
                let result = Ok(self.flush().await);
                respond("flush_batch", reply, result)
            }
            Command::ArchiveItem { id, reply } => {
                let result = self.archive_item(id).await;
                respond("archive_item", reply, result)
            }
            Command::IngestFollowUps { follow_ups, reply } => {
                let result = self.ingest_follow_ups(follow_ups).await;
                respond("ingest_follow_ups", reply, result)
            }
            Command::MergeItem {
                source,
                target,
                reply,
            } => {
                let result = self.merge_item(source, target).await;
                respond("merge_item", reply, result)
            }
            Command::UnblockItem { id, context, reply } => {
                let result = self.unblock_item(id, context).await;
                respond("unblock_item", reply, result)
            }
        }
    }

    async fn store_call<T, F>(&self, operation: &'static str, f: F) -> Result<T, CoordinatorError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, CoordinatorError> + Send + Sync + 'static,
    {
        call_store(&self.store, self.settings.retry, operation, f).await
    }

    /// Load, change one item, and save, all under the store lock.
    async fn mutate_item<T, F>(
        &self,
        operation: &'static str,
        id: &str,
        f: F,
    ) -> Result<T, CoordinatorError>
    where
        T: Send + 'static,
        F: Fn(&mut Item, &PipelineSet) -> Result<T, CoordinatorError> + Send + Sync + 'static,
    {
        let id = id.to_string();
        let settings = Arc::clone(&self.settings);
        self.store_call(operation, move |store: &S| {
            store.with_lock(|| {
                let mut items = store.load_active()?;
                let item = find_item_mut(&mut items, &id)?;
                let value = f(item, &settings.pipelines)?;
                store.save_active(&items)?;
                Ok(value)
            })
        })
        .await
    }

    /// Run a version-control step on the blocking pool. Failures are logged
    /// and reported as `None`; they never fail the command.
    async fn vcs<T, F>(&self, step: &'static str, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn VersionControl) -> anyhow::Result<T> + Send + 'static,
    {
        let vcs = Arc::clone(&self.vcs);
        match tokio::task::spawn_blocking(move || f(vcs.as_ref())).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                error!(step, error = %format!("{:#}", e), "Version control step failed");
                None
            }
            Err(e) => {
                error!(step, error = %panic_message(e), "Version control step panicked");
                None
            }
        }
    }

    /// Stage the store files and queue the change for the next batch commit.
    async fn record_change(&mut self, item_id: &str, summary: String) {
        self.vcs("stage store", |vcs| vcs.stage_self()).await;
        self.batch.push(item_id, summary);
    }

    async fn get_snapshot(&self) -> Result<Vec<WorkItem>, CoordinatorError> {
        self.store_call("get_snapshot", |store: &S| {
            Ok(WorkItem::wrap_all(store.load_active()?))
        })
        .await
    }

    async fn update_item(
        &mut self,
        id: String,
        updates: Vec<ItemUpdate>,
    ) -> Result<WorkItem, CoordinatorError> {
        for update in &updates {
            if let ItemUpdate::SetPipelineType(Some(name)) = update
                && !self.settings.pipelines.is_known(Some(name))
            {
                warn!(item = %id, pipeline = %name, "Unknown pipeline type, the default pipeline will be used");
            }
        }
        let count = updates.len();
        let updated = self
            .mutate_item("update_item", &id, move |item, _| {
                for update in &updates {
                    apply_update(item, update)?;
                }
                Ok(WorkItem::new(item.clone()))
            })
            .await?;
        debug!(item = %id, updates = count, "Item updated");
        self.record_change(&id, format!("updated ({} changes)", count))
            .await;
        Ok(updated)
    }

    async fn promote(&mut self, id: String) -> Result<Progress, CoordinatorError> {
        let progress = self
            .mutate_item("promote", &id, |item, pipelines| {
                pipeline::promote(item, pipelines)
            })
            .await?;
        info!(item = %id, to = %progress, "Item promoted");
        self.record_change(&id, format!("promoted to {}", progress))
            .await;
        Ok(progress)
    }

    async fn record_phase_start(
        &mut self,
        id: String,
        revision: Option<String>,
    ) -> Result<Option<String>, CoordinatorError> {
        if let Some(rev) = &revision
            && !is_valid_revision(rev)
        {
            return Err(CoordinatorError::invalid_transition(
                &id,
                format!("'{}' is not a valid revision", rev),
            ));
        }
        let revision = match revision {
            Some(rev) => Some(rev),
            None => self
                .vcs("read HEAD", |vcs| Ok(vcs.head_revision()))
                .await
                .flatten(),
        };

        let recorded = revision.clone();
        self.mutate_item("record_phase_start", &id, move |item, _| {
            let status = item::read_status(item);
            let Some(phase) = item::read_phase(item) else {
                return Err(CoordinatorError::invalid_transition(
                    &item.id,
                    format!("no phase recorded while the item is {}", status),
                ));
            };
            if !matches!(status, ItemStatus::Scoping | ItemStatus::InProgress) {
                return Err(CoordinatorError::invalid_transition(
                    &item.id,
                    format!("phase '{}' cannot start while the item is {}", phase, status),
                ));
            }
            set_last_phase_commit(item, recorded.as_deref());
            Ok(())
        })
        .await?;

        debug!(item = %id, revision = ?revision, "Phase start recorded");
        self.record_change(&id, "phase started".to_string()).await;
        Ok(revision)
    }

    async fn complete_phase(
        &mut self,
        completion: PhaseCompletion,
    ) -> Result<PhaseReport, CoordinatorError> {
        let PhaseCompletion {
            item_id,
            phase,
            destructive,
            outcome,
            artifacts,
        } = completion;

        // A rejected completion must not leave its artifacts staged.
        let configured = self.check_completion(&item_id, &phase).await?;
        if configured != destructive {
            warn!(
                item = %item_id,
                phase = %phase,
                reported = destructive,
                configured,
                "Reported phase exclusivity differs from the pipeline configuration"
            );
        }

        // Earlier batched changes get their own commit ahead of a destructive one.
        if destructive && !self.batch.is_empty() {
            self.flush().await;
        }

        let staged = if artifacts.is_empty() {
            Vec::new()
        } else {
            let count = artifacts.len();
            let paths = artifacts.clone();
            match self.vcs("stage artifacts", move |vcs| vcs.stage(&paths)).await {
                Some(()) => {
                    debug!(item = %item_id, artifacts = count, "Staged phase artifacts");
                    artifacts
                }
                None => Vec::new(),
            }
        };

        let (reported_phase, reported_outcome) = (phase.clone(), outcome.clone());
        let applied = match self
            .mutate_item("complete_phase", &item_id, move |item, pipelines| {
                apply_outcome(item, &reported_phase, &reported_outcome, pipelines)
            })
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                if !staged.is_empty() {
                    self.vcs("unstage artifacts", move |vcs| vcs.unstage(&staged))
                        .await;
                }
                return Err(e);
            }
        };
        info!(
            item = %item_id,
            phase = %phase,
            outcome = outcome.label(),
            status = %applied.status,
            "Phase result recorded"
        );

        self.vcs("stage store", |vcs| vcs.stage_self()).await;
        let summary = format!("{} {}", phase, outcome.label());
        let commit = if destructive {
            self.commit_destructive(&item_id, summary, applied.phase_start.as_deref())
                .await
        } else {
            self.batch.push(&item_id, summary);
            CommitDisposition::Batched
        };

        Ok(PhaseReport {
            status: applied.status,
            progress: applied.progress,
            destructive,
            commit,
        })
    }

    async fn commit_destructive(
        &mut self,
        item_id: &str,
        summary: String,
        phase_start: Option<&str>,
    ) -> CommitDisposition {
        if let Some(start) = phase_start {
            let head = self
                .vcs("read HEAD", |vcs| Ok(vcs.head_revision()))
                .await
                .flatten();
            if let Some(head) = head
                && head != start
            {
                warn!(
                    item = item_id,
                    phase_start = start,
                    head = %head,
                    "HEAD moved while a destructive phase was running"
                );
            }
        }

        let message = format!("[phasekeep] {}: {}", item_id, summary);
        match self.vcs("commit", move |vcs| vcs.commit(&message)).await {
            Some(Some(revision)) => {
                info!(item = item_id, commit = %revision, "Committed destructive phase");
                if !self.batch.is_empty() {
                    debug!(
                        pending = self.batch.len(),
                        "Destructive commit included previously batched changes"
                    );
                    self.batch.clear();
                }
                CommitDisposition::Committed(revision)
            }
            Some(None) => {
                debug!(item = item_id, "Destructive phase left nothing to commit");
                CommitDisposition::Deferred
            }
            None => {
                warn!(item = item_id, "Destructive commit failed, keeping it for the next flush");
                self.batch.push(item_id, summary);
                CommitDisposition::Deferred
            }
        }
    }

    /// Check that `id` is running `phase` and return whether the pipeline
    /// configures that phase as destructive. Read without the lock; the
    /// locked update that follows is authoritative.
    async fn check_completion(&self, id: &str, phase: &str) -> Result<bool, CoordinatorError> {
        let (id, phase) = (id.to_string(), phase.to_string());
        let settings = Arc::clone(&self.settings);
        self.store_call("complete_phase", move |store: &S| {
            let items = store.load_active()?;
            let Some(item) = items.into_iter().find(|i| i.id == id) else {
                return Err(StoreError::ItemNotFound { id: id.clone() }.into());
            };
            pipeline::check_running_phase(&item, &phase)?;
            Ok(settings
                .pipelines
                .current_phase(&WorkItem::new(item))
                .is_some_and(|p| p.destructive))
        })
        .await
    }

    /// Commit the batch. Entries survive a failed commit.
    async fn flush(&mut self) -> Option<String> {
        if self.batch.is_empty() {
            return None;
        }
        let message = self.batch.message();
        let entries = self.batch.len();
        match self.vcs("commit batch", move |vcs| vcs.commit(&message)).await {
            Some(Some(revision)) => {
                info!(entries, commit = %revision, "Committed batch");
                self.batch.clear();
                Some(revision)
            }
            Some(None) => {
                debug!(entries, "Batch had nothing to commit");
                self.batch.clear();
                None
            }
            None => {
                warn!(entries, "Batch commit failed, keeping entries for the next flush");
                None
            }
        }
    }

    async fn archive_item(&mut self, id: String) -> Result<(), CoordinatorError> {
        let target = id.clone();
        self.store_call("archive_item", move |store: &S| {
            store.with_lock(|| {
                let mut items = store.load_active()?;
                let Some(index) = items.iter().position(|i| i.id == target) else {
                    return Err(StoreError::ItemNotFound { id: target.clone() }.into());
                };
                let status = item::read_status(&items[index]);
                if status != ItemStatus::Done {
                    return Err(CoordinatorError::invalid_transition(
                        &target,
                        format!("only done items can be archived (item is {})", status),
                    ));
                }
                let archived = items.remove(index);
                store.append_to_archive(&archived)?;
                store.save_active(&items)?;
                Ok(())
            })
        })
        .await?;
        info!(item = %id, "Item archived");
        self.record_change(&id, "archived".to_string()).await;
        Ok(())
    }

    async fn ingest_follow_ups(
        &mut self,
        follow_ups: Vec<NewItem>,
    ) -> Result<Vec<String>, CoordinatorError> {
        if follow_ups.is_empty() {
            return Ok(Vec::new());
        }
        for spec in &follow_ups {
            if !self.settings.pipelines.is_known(spec.pipeline_type.as_deref()) {
                warn!(
                    title = %spec.title,
                    pipeline = ?spec.pipeline_type,
                    "Unknown pipeline type, the default pipeline will be used"
                );
            }
        }
        let prefix = self.settings.id_prefix.clone();
        let created = self
            .store_call("ingest_follow_ups", move |store: &S| {
                store.with_lock(|| {
                    let mut items = store.load_active()?;
                    let mut known = store.archived_ids()?;
                    known.extend(items.iter().map(|i| i.id.clone()));
                    let mut ids = IdAllocator::new(&prefix, known)?;
                    let now = Utc::now();
                    let mut created = Vec::with_capacity(follow_ups.len());
                    for spec in &follow_ups {
                        let id = ids.next_id()?;
                        items.push(new_item(&id, spec, now));
                        created.push(id);
                    }
                    store.save_active(&items)?;
                    Ok(created)
                })
            })
            .await?;

        info!(count = created.len(), ids = ?created, "Follow-up items ingested");
        self.vcs("stage store", |vcs| vcs.stage_self()).await;
        for id in &created {
            self.batch.push(id, "created");
        }
        Ok(created)
    }

    async fn merge_item(&mut self, source: String, target: String) -> Result<(), CoordinatorError> {
        let (from, into) = (source.clone(), target.clone());
        self.store_call("merge_item", move |store: &S| {
            store.with_lock(|| {
                let mut items = store.load_active()?;
                let removed = merge_items(&mut items, &from, &into)?;
                store.append_to_archive(&removed)?;
                store.save_active(&items)?;
                Ok(())
            })
        })
        .await?;
        info!(source = %source, target = %target, "Items merged");
        self.record_change(&target, format!("absorbed {}", source))
            .await;
        Ok(())
    }

    async fn unblock_item(
        &mut self,
        id: String,
        context: Option<String>,
    ) -> Result<ItemStatus, CoordinatorError> {
        let restored = self
            .mutate_item("unblock_item", &id, move |item, _| {
                item::unblock(item, context.clone())
            })
            .await?;
        info!(item = %id, status = %restored, "Item unblocked");
        self.record_change(&id, format!("unblocked to {}", restored))
            .await;
        Ok(restored)
    }
}

/// Apply a phase result to the stored item.
///
/// Blocked and failed outcomes keep the phase recorded so the item resumes
/// in the same phase once unblocked.
fn apply_outcome(
    item: &mut Item,
    phase: &str,
    outcome: &PhaseOutcome,
    pipelines: &PipelineSet,
) -> Result<AppliedOutcome, CoordinatorError> {
    let phase_start = item::read_last_phase_commit(item).map(str::to_string);

    let progress = match outcome {
        PhaseOutcome::PhaseComplete => Some(pipeline::advance(item, phase, pipelines)?),
        PhaseOutcome::Blocked {
            reason,
            blocked_type,
        } => {
            pipeline::check_running_phase(item, phase)?;
            set_blocked(item, Some(reason.clone()), Some(*blocked_type))?;
            None
        }
        PhaseOutcome::Failed { reason } => {
            pipeline::check_running_phase(item, phase)?;
            set_blocked(item, Some(format!("phase {} failed: {}", phase, reason)), None)?;
            None
        }
    };

    Ok(AppliedOutcome {
        status: item::read_status(item),
        progress,
        phase_start,
    })
}

/// Log an error by category and send the reply. Returns true for fatal
/// errors.
fn respond<T>(command: &'static str, reply: Reply<T>, result: Result<T, CoordinatorError>) -> bool {
    let fatal = match &result {
        Ok(_) => false,
        Err(e) => {
            match e.category() {
                ErrorCategory::Fatal => error!(command, error = %e, "Fatal coordinator error"),
                ErrorCategory::Retryable => {
                    warn!(command, error = %e, "Command failed, caller may retry")
                }
                ErrorCategory::Skip => info!(command, error = %e, "Command skipped"),
                ErrorCategory::Unexpected => error!(command, error = %e, "Unexpected store failure"),
            }
            e.is_fatal()
        }
    };
    if reply.send(result).is_err() {
        debug!(command, "Caller dropped before the reply was sent");
    }
    fatal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::BlockType;
    use crate::pipeline::{PhaseConfig, PipelineConfig};
    use std::collections::BTreeMap;

    fn pipelines() -> PipelineSet {
        let mut map = BTreeMap::new();
        map.insert(
            "short".to_string(),
            PipelineConfig {
                pre_phases: vec![],
                phases: vec![PhaseConfig::new("build"), PhaseConfig::destructive("ship")],
            },
        );
        PipelineSet::new("short", map)
    }

    fn in_phase(phase: &str) -> Item {
        let mut item = new_item("WRK-1", &NewItem::titled("x"), Utc::now());
        let set = pipelines();
        pipeline::promote(&mut item, &set).unwrap();
        pipeline::promote(&mut item, &set).unwrap();
        if phase == "ship" {
            pipeline::advance(&mut item, "build", &set).unwrap();
        }
        item
    }

    #[test]
    fn completing_last_phase_finishes_item() {
        let mut item = in_phase("ship");
        let applied =
            apply_outcome(&mut item, "ship", &PhaseOutcome::PhaseComplete, &pipelines()).unwrap();
        assert_eq!(applied.status, ItemStatus::Done);
        assert_eq!(applied.progress, Some(Progress::Done));
    }

    #[test]
    fn blocked_outcome_keeps_phase_for_resume() {
        let mut item = in_phase("build");
        let outcome = PhaseOutcome::Blocked {
            reason: "which cache?".to_string(),
            blocked_type: BlockType::Clarification,
        };
        let applied = apply_outcome(&mut item, "build", &outcome, &pipelines()).unwrap();
        assert_eq!(applied.status, ItemStatus::Blocked);
        assert_eq!(item::read_phase(&item), Some("build"));
        assert_eq!(item::read_blocked_from(&item), Some(ItemStatus::InProgress));
        assert_eq!(item.blocked_reason.as_deref(), Some("which cache?"));
    }

    #[test]
    fn failed_outcome_blocks_with_reason() {
        let mut item = in_phase("build");
        let outcome = PhaseOutcome::Failed {
            reason: "tests red".to_string(),
        };
        apply_outcome(&mut item, "build", &outcome, &pipelines()).unwrap();
        assert_eq!(item::read_status(&item), ItemStatus::Blocked);
        assert_eq!(
            item.blocked_reason.as_deref(),
            Some("phase build failed: tests red")
        );
        assert_eq!(item::read_blocked_type(&item), None);
    }

    #[test]
    fn outcome_for_wrong_phase_is_rejected() {
        let mut item = in_phase("build");
        let outcome = PhaseOutcome::Failed {
            reason: "x".to_string(),
        };
        let err = apply_outcome(&mut item, "ship", &outcome, &pipelines()).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(item::read_status(&item), ItemStatus::InProgress);
    }
}
