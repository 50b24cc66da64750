//! Free mutation functions over store items.
//!
//! These take `&mut Item` rather than a [`super::WorkItem`] so coordinator
//! handlers can mutate an element of a collection loaded under the store lock.

use super::{
    BlockType, ItemStatus, Level, PhasePool, SizeLevel, StructuredDescription, keys, read_blocked_from,
    read_description, read_phase, read_status, read_unblock_context,
};
use crate::errors::CoordinatorError;
use crate::store::{Item, NativeStatus};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Typed updates accepted by the update-item command.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemUpdate {
    /// Validated status change (see [`ItemStatus::is_valid_transition`]).
    /// Moving into `Scoping` or `InProgress` needs a phase already recorded;
    /// promotion is the normal way in.
    TransitionStatus(ItemStatus),
    SetPhase(Option<String>),
    SetPhasePool(Option<PhasePool>),
    SetPipelineType(Option<String>),
    SetBlocked {
        reason: String,
        blocked_type: Option<BlockType>,
    },
    SetUnblockContext(Option<String>),
    /// `None` fields are left unchanged
    SetAssessments {
        impact: Option<Level>,
        size: Option<SizeLevel>,
        risk: Option<Level>,
        requires_human_review: Option<bool>,
    },
    SetDescription(StructuredDescription),
    SetTriageRequested(bool),
    SetMergeInto(Option<String>),
    SetDependencies(Vec<String>),
    AddTag(String),
    RemoveTag(String),
    SetTitle(String),
    SetPriority(i64),
}

/// Input for creating a fresh domain item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewItem {
    pub title: String,
    pub description: Option<StructuredDescription>,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    pub priority: i64,
    pub pipeline_type: Option<String>,
    pub origin: Option<String>,
    pub impact: Option<Level>,
    pub size: Option<SizeLevel>,
    pub risk: Option<Level>,
}

impl NewItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Build a `New` item with default extension values populated.
pub fn new_item(id: &str, spec: &NewItem, now: DateTime<Utc>) -> Item {
    let mut item = Item::new(id, &spec.title, now);
    item.priority = spec.priority;
    item.tags = spec.tags.clone();
    item.dependencies = spec
        .dependencies
        .iter()
        .filter(|dep| dep.as_str() != id)
        .cloned()
        .collect();
    set_status(&mut item, ItemStatus::New);
    if let Some(desc) = &spec.description {
        set_structured_description(&mut item, desc);
    }
    set_pipeline_type(&mut item, spec.pipeline_type.as_deref());
    set_optional_string(&mut item, keys::ORIGIN, spec.origin.as_deref());
    set_optional_enum(&mut item, keys::IMPACT, spec.impact.map(Level::as_str));
    set_optional_enum(&mut item, keys::SIZE, spec.size.map(SizeLevel::as_str));
    set_optional_enum(&mut item, keys::RISK, spec.risk.map(Level::as_str));
    item.created_at = now;
    item.updated_at = now;
    item
}

/// Write a domain status.
///
/// `Todo`-backed statuses write native `Todo` plus the sub-state key; any
/// other status writes its native value and removes the key. Blocking
/// should go through [`set_blocked`], which also records where to return to.
pub fn set_status(item: &mut Item, status: ItemStatus) {
    match status.todo_substate() {
        Some(substate) => {
            item.set_native_status(NativeStatus::Todo);
            item.set_extension(keys::STATUS, json!(substate));
        }
        None => {
            item.set_native_status(status.to_native());
            item.remove_extension(keys::STATUS);
        }
    }
}

/// Validated status change. Leaving `Blocked` is only possible via [`unblock`].
pub fn transition(item: &mut Item, to: ItemStatus) -> Result<(), CoordinatorError> {
    let from = read_status(item);
    if from == to {
        return Ok(());
    }
    if !from.is_valid_transition(to) {
        return Err(CoordinatorError::invalid_transition(
            &item.id,
            format!("cannot move from {} to {}", from, to),
        ));
    }
    if to == ItemStatus::Blocked {
        return set_blocked(item, None, None);
    }
    set_status(item, to);
    Ok(())
}

/// Block an item, recording the authoritative status to restore on unblock.
///
/// Re-blocking an already blocked item only replaces the reason and type.
pub fn set_blocked(
    item: &mut Item,
    reason: Option<String>,
    blocked_type: Option<BlockType>,
) -> Result<(), CoordinatorError> {
    let current = read_status(item);
    if current == ItemStatus::Done {
        return Err(CoordinatorError::invalid_transition(
            &item.id,
            "cannot block a finished item",
        ));
    }
    if current != ItemStatus::Blocked {
        item.set_extension(keys::BLOCKED_FROM, json!(current.as_str()));
        item.remove_extension(keys::STATUS);
    }
    item.block_native(reason);
    set_optional_enum(item, keys::BLOCKED_TYPE, blocked_type.map(BlockType::as_str));
    item.remove_extension(keys::UNBLOCK_CONTEXT);
    Ok(())
}

/// Restore a blocked item to the status it was blocked from.
///
/// Fails without touching the item when it is not blocked or the
/// blocked-from record is missing or stale. An unblock context, either the
/// one passed in or one recorded earlier, survives the unblock so the next
/// phase can see the answer.
pub fn unblock(item: &mut Item, context: Option<String>) -> Result<ItemStatus, CoordinatorError> {
    let current = read_status(item);
    if current != ItemStatus::Blocked {
        return Err(CoordinatorError::invalid_transition(
            &item.id,
            format!("cannot unblock an item that is {}", current),
        ));
    }
    let Some(restore_to) = read_blocked_from(item) else {
        return Err(CoordinatorError::invalid_transition(
            &item.id,
            "no valid blocked-from status recorded",
        ));
    };
    let context = context
        .filter(|c| !c.trim().is_empty())
        .or_else(|| read_unblock_context(item).map(str::to_string));

    set_status(item, restore_to);
    item.remove_extension(keys::BLOCKED_FROM);
    item.remove_extension(keys::BLOCKED_TYPE);
    item.remove_extension(keys::UNBLOCK_CONTEXT);
    item.clear_blocked_native();
    if let Some(context) = context {
        item.set_extension(keys::UNBLOCK_CONTEXT, json!(context));
    }
    Ok(restore_to)
}

pub fn set_phase(item: &mut Item, phase: Option<&str>) {
    set_optional_string(item, keys::PHASE, phase);
}

pub fn set_phase_pool(item: &mut Item, pool: Option<PhasePool>) {
    set_optional_enum(item, keys::PHASE_POOL, pool.map(PhasePool::as_str));
}

pub fn set_pipeline_type(item: &mut Item, pipeline: Option<&str>) {
    set_optional_string(item, keys::PIPELINE_TYPE, pipeline);
}

pub fn set_last_phase_commit(item: &mut Item, revision: Option<&str>) {
    set_optional_string(item, keys::LAST_PHASE_COMMIT, revision);
}

pub fn set_unblock_context(item: &mut Item, context: Option<&str>) {
    set_optional_string(item, keys::UNBLOCK_CONTEXT, context);
}

pub fn set_triage_requested(item: &mut Item, requested: bool) {
    if requested {
        item.set_extension(keys::TRIAGE_REQUESTED, Value::Bool(true));
    } else {
        item.remove_extension(keys::TRIAGE_REQUESTED);
    }
}

pub fn set_merge_into(item: &mut Item, target: Option<&str>) {
    set_optional_string(item, keys::MERGE_INTO, target);
}

/// Store the structured description and mirror its context into the
/// native description field.
pub fn set_structured_description(item: &mut Item, desc: &StructuredDescription) {
    item.set_extension(
        keys::DESCRIPTION,
        json!({
            "context": desc.context,
            "problem": desc.problem,
            "solution": desc.solution,
            "impact": desc.impact,
            "sizing_rationale": desc.sizing_rationale,
        }),
    );
    item.description = if desc.context.trim().is_empty() {
        None
    } else {
        Some(desc.context.clone())
    };
}

/// Fold `source` into `target`: dependencies and tags are unioned and the
/// structured descriptions concatenated.
pub fn absorb(target: &mut Item, source: &Item) {
    for dep in &source.dependencies {
        if dep != &target.id && dep != &source.id && !target.dependencies.contains(dep) {
            target.dependencies.push(dep.clone());
        }
    }
    target.dependencies.retain(|dep| dep != &source.id);

    for tag in &source.tags {
        if !target.tags.contains(tag) {
            target.tags.push(tag.clone());
        }
    }
    target.priority = target.priority.max(source.priority);

    let target_desc = description_or_native(target);
    let source_desc = description_or_native(source);
    let merged = target_desc.concat(&source_desc);
    if !merged.is_empty() {
        set_structured_description(target, &merged);
    }
    target.touch();
}

fn description_or_native(item: &Item) -> StructuredDescription {
    read_description(item).unwrap_or_else(|| {
        StructuredDescription::with_context(item.description.clone().unwrap_or_default())
    })
}

/// Apply one typed update.
pub fn apply_update(item: &mut Item, update: &ItemUpdate) -> Result<(), CoordinatorError> {
    match update {
        ItemUpdate::TransitionStatus(to) => {
            if matches!(to, ItemStatus::Scoping | ItemStatus::InProgress)
                && read_status(item) != *to
                && read_phase(item).is_none()
            {
                return Err(CoordinatorError::invalid_transition(
                    &item.id,
                    format!("cannot enter {} without a phase; promote the item instead", to),
                ));
            }
            transition(item, *to)?
        }
        ItemUpdate::SetPhase(phase) => set_phase(item, phase.as_deref()),
        ItemUpdate::SetPhasePool(pool) => set_phase_pool(item, *pool),
        ItemUpdate::SetPipelineType(pipeline) => set_pipeline_type(item, pipeline.as_deref()),
        ItemUpdate::SetBlocked {
            reason,
            blocked_type,
        } => set_blocked(item, Some(reason.clone()), *blocked_type)?,
        ItemUpdate::SetUnblockContext(context) => {
            if read_status(item) != ItemStatus::Blocked && context.is_some() {
                return Err(CoordinatorError::invalid_transition(
                    &item.id,
                    "an unblock context can only be given to a blocked item",
                ));
            }
            set_unblock_context(item, context.as_deref());
        }
        ItemUpdate::SetAssessments {
            impact,
            size,
            risk,
            requires_human_review,
        } => {
            if let Some(impact) = impact {
                item.set_extension(keys::IMPACT, json!(impact.as_str()));
            }
            if let Some(size) = size {
                item.set_extension(keys::SIZE, json!(size.as_str()));
            }
            if let Some(risk) = risk {
                item.set_extension(keys::RISK, json!(risk.as_str()));
            }
            if let Some(review) = requires_human_review {
                item.set_extension(keys::REQUIRES_HUMAN_REVIEW, Value::Bool(*review));
            }
        }
        ItemUpdate::SetDescription(desc) => set_structured_description(item, desc),
        ItemUpdate::SetTriageRequested(requested) => set_triage_requested(item, *requested),
        ItemUpdate::SetMergeInto(target) => {
            if target.as_deref() == Some(item.id.as_str()) {
                return Err(CoordinatorError::invalid_transition(
                    &item.id,
                    "an item cannot be merged into itself",
                ));
            }
            set_merge_into(item, target.as_deref());
        }
        ItemUpdate::SetDependencies(deps) => {
            let id = item.id.clone();
            item.dependencies = deps.iter().filter(|d| **d != id).cloned().collect();
            item.touch();
        }
        ItemUpdate::AddTag(tag) => {
            if !item.tags.contains(tag) {
                item.tags.push(tag.clone());
                item.touch();
            }
        }
        ItemUpdate::RemoveTag(tag) => {
            item.tags.retain(|t| t != tag);
            item.touch();
        }
        ItemUpdate::SetTitle(title) => {
            if title.trim().is_empty() {
                return Err(CoordinatorError::invalid_transition(
                    &item.id,
                    "title cannot be empty",
                ));
            }
            item.title = title.clone();
            item.touch();
        }
        ItemUpdate::SetPriority(priority) => {
            item.priority = *priority;
            item.touch();
        }
    }
    Ok(())
}

fn set_optional_string(item: &mut Item, key: &str, value: Option<&str>) {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => item.set_extension(key, json!(v)),
        None => {
            item.remove_extension(key);
        }
    }
}

fn set_optional_enum(item: &mut Item, key: &str, value: Option<&'static str>) {
    set_optional_string(item, key, value);
}

#[cfg(test)]
mod tests {
    use super::super::WorkItem;
    use super::*;

    fn fresh(id: &str) -> Item {
        new_item(id, &NewItem::titled("Add caching"), Utc::now())
    }

    #[test]
    fn new_item_defaults() {
        let spec = NewItem {
            title: "Add caching".into(),
            dependencies: vec!["WRK-1".into(), "WRK-5".into()],
            pipeline_type: Some("bugfix".into()),
            origin: Some("WRK-1".into()),
            impact: Some(Level::High),
            description: Some(StructuredDescription::with_context("Pages are slow")),
            ..Default::default()
        };
        let item = new_item("WRK-5", &spec, Utc::now());
        let view = WorkItem::new(item.clone());
        assert_eq!(view.status(), ItemStatus::New);
        assert_eq!(item.extension(keys::STATUS), Some(&json!("new")));
        // self-dependencies are dropped
        assert_eq!(view.dependencies(), ["WRK-1".to_string()]);
        assert_eq!(view.pipeline_type(), Some("bugfix"));
        assert_eq!(view.origin(), Some("WRK-1"));
        assert_eq!(view.impact(), Some(Level::High));
        assert_eq!(view.description(), Some("Pages are slow"));
        assert_eq!(view.phase(), None);
    }

    #[test]
    fn transition_rejects_invalid_moves() {
        let mut item = fresh("WRK-1");
        let err = transition(&mut item, ItemStatus::InProgress).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(read_status(&item), ItemStatus::New);

        transition(&mut item, ItemStatus::Ready).unwrap();
        transition(&mut item, ItemStatus::InProgress).unwrap();
        assert_eq!(read_status(&item), ItemStatus::InProgress);
    }

    #[test]
    fn block_and_unblock_restores_domain_status() {
        let mut item = fresh("WRK-1");
        set_status(&mut item, ItemStatus::Scoping);
        set_blocked(
            &mut item,
            Some("which database?".into()),
            Some(BlockType::Clarification),
        )
        .unwrap();
        let view = WorkItem::new(item.clone());
        assert_eq!(view.status(), ItemStatus::Blocked);
        assert_eq!(view.blocked_from(), Some(ItemStatus::Scoping));
        assert_eq!(view.blocked_type(), Some(BlockType::Clarification));
        assert_eq!(view.blocked_reason(), Some("which database?"));
        // lossy native projection
        assert_eq!(item.blocked_from_status, Some(NativeStatus::Todo));

        let restored = unblock(&mut item, Some("postgres".into())).unwrap();
        assert_eq!(restored, ItemStatus::Scoping);
        let view = WorkItem::new(item.clone());
        assert_eq!(view.status(), ItemStatus::Scoping);
        assert_eq!(view.blocked_from(), None);
        assert_eq!(view.blocked_type(), None);
        assert_eq!(view.blocked_reason(), None);
        assert_eq!(view.unblock_context(), Some("postgres"));
        assert!(item.blocked_from_status.is_none());
    }

    #[test]
    fn unblock_of_unblocked_item_changes_nothing() {
        let mut item = fresh("WRK-1");
        set_status(&mut item, ItemStatus::Ready);
        let before = item.clone();
        let err = unblock(&mut item, Some("answer".into())).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(item, before);
    }

    #[test]
    fn unblock_with_stale_blocked_from_changes_nothing() {
        let mut item = fresh("WRK-1");
        set_blocked(&mut item, None, None).unwrap();
        item.blocked_from_status = None;
        let before = item.clone();
        assert!(unblock(&mut item, None).is_err());
        assert_eq!(item, before);
    }

    #[test]
    fn reblocking_keeps_original_blocked_from() {
        let mut item = fresh("WRK-1");
        set_status(&mut item, ItemStatus::Ready);
        transition(&mut item, ItemStatus::InProgress).unwrap();
        set_blocked(&mut item, Some("one".into()), None).unwrap();
        set_blocked(&mut item, Some("two".into()), Some(BlockType::Decision)).unwrap();
        assert_eq!(read_blocked_from(&item), Some(ItemStatus::InProgress));
        assert_eq!(item.blocked_reason.as_deref(), Some("two"));
        assert_eq!(unblock(&mut item, None).unwrap(), ItemStatus::InProgress);
        assert_eq!(item.status, NativeStatus::Doing);
    }

    #[test]
    fn done_items_cannot_be_blocked() {
        let mut item = fresh("WRK-1");
        transition(&mut item, ItemStatus::Done).unwrap();
        assert!(set_blocked(&mut item, None, None).is_err());
        assert!(transition(&mut item, ItemStatus::Ready).is_err());
    }

    #[test]
    fn blocking_from_todo_substate_clears_substate_key() {
        let mut item = fresh("WRK-1");
        set_status(&mut item, ItemStatus::Ready);
        set_blocked(&mut item, None, None).unwrap();
        assert!(item.extension(keys::STATUS).is_none());
        unblock(&mut item, None).unwrap();
        assert_eq!(item.extension(keys::STATUS), Some(&json!("ready")));
    }

    #[test]
    fn structured_description_mirrors_context() {
        let mut item = fresh("WRK-1");
        let desc = StructuredDescription {
            context: "Checkout times out".into(),
            problem: "Payment API latency".into(),
            ..Default::default()
        };
        set_structured_description(&mut item, &desc);
        assert_eq!(item.description.as_deref(), Some("Checkout times out"));
        assert_eq!(read_description(&item), Some(desc));
    }

    #[test]
    fn absorb_unions_dependencies_and_concatenates() {
        let mut target = fresh("A-1");
        target.dependencies = vec!["A-5".into()];
        set_structured_description(&mut target, &StructuredDescription::with_context("first"));
        let mut source = fresh("A-2");
        source.dependencies = vec!["A-9".into(), "A-5".into(), "A-1".into()];
        source.tags = vec!["ui".into()];
        source.description = Some("second".into());

        absorb(&mut target, &source);
        assert_eq!(target.dependencies, vec!["A-5".to_string(), "A-9".to_string()]);
        assert_eq!(target.tags, vec!["ui".to_string()]);
        assert_eq!(read_description(&target).unwrap().context, "first\n\nsecond");
    }

    #[test]
    fn status_update_into_running_state_needs_a_phase() {
        let mut item = fresh("WRK-4");
        apply_update(&mut item, &ItemUpdate::TransitionStatus(ItemStatus::Ready)).unwrap();

        let err = apply_update(&mut item, &ItemUpdate::TransitionStatus(ItemStatus::InProgress))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(read_status(&item), ItemStatus::Ready);

        apply_update(&mut item, &ItemUpdate::SetPhase(Some("build".into()))).unwrap();
        apply_update(&mut item, &ItemUpdate::TransitionStatus(ItemStatus::InProgress)).unwrap();
        assert_eq!(read_status(&item), ItemStatus::InProgress);
        assert_eq!(read_phase(&item), Some("build"));
    }

    #[test]
    fn apply_update_covers_signals_and_assessments() {
        let mut item = fresh("WRK-3");
        apply_update(&mut item, &ItemUpdate::SetTriageRequested(true)).unwrap();
        apply_update(&mut item, &ItemUpdate::SetMergeInto(Some("WRK-1".into()))).unwrap();
        apply_update(
            &mut item,
            &ItemUpdate::SetAssessments {
                impact: Some(Level::Low),
                size: Some(SizeLevel::Large),
                risk: None,
                requires_human_review: Some(true),
            },
        )
        .unwrap();
        apply_update(&mut item, &ItemUpdate::AddTag("infra".into())).unwrap();
        apply_update(&mut item, &ItemUpdate::AddTag("infra".into())).unwrap();

        let view = WorkItem::new(item.clone());
        assert!(view.triage_requested());
        assert_eq!(view.merge_into(), Some("WRK-1"));
        assert_eq!(view.impact(), Some(Level::Low));
        assert_eq!(view.size(), Some(SizeLevel::Large));
        assert_eq!(view.risk(), None);
        assert!(view.requires_human_review());
        assert_eq!(view.tags(), ["infra".to_string()]);

        apply_update(&mut item, &ItemUpdate::SetTriageRequested(false)).unwrap();
        assert!(!WorkItem::new(item.clone()).triage_requested());

        let err = apply_update(&mut item, &ItemUpdate::SetMergeInto(Some("WRK-3".into())));
        assert!(err.is_err());
        assert!(apply_update(&mut item, &ItemUpdate::SetTitle("  ".into())).is_err());
    }

    #[test]
    fn unblock_context_requires_blocked_item() {
        let mut item = fresh("WRK-1");
        let update = ItemUpdate::SetUnblockContext(Some("use redis".into()));
        assert!(apply_update(&mut item, &update).is_err());
        set_blocked(&mut item, Some("which cache?".into()), None).unwrap();
        apply_update(&mut item, &update).unwrap();
        assert_eq!(read_unblock_context(&item), Some("use redis"));
    }
}
