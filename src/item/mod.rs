//! Typed domain view over store items.
//!
//! Domain fields live either in native [`Item`] fields or in namespaced
//! extension entries. This module is the only place that touches the
//! extension map: readers validate each value and report "absent" when a
//! key is missing, has the wrong type, or fails validation. Writes go
//! through the free functions in [`mutate`], which take `&mut Item` so
//! they can run against items inside a loaded collection.
//!
//! Authority rules:
//! - Status: native `Doing`/`Done`/`Blocked` map 1:1 and the sub-state key
//!   is ignored. Native `Todo` reads the sub-state key, defaulting to `New`.
//! - Blocked-from: the extension key is authoritative. It is stale, and
//!   ignored, when the native `blocked_from_status` is absent.

mod fields;
pub mod mutate;
mod status;

pub use fields::{BlockType, Level, SizeLevel, StructuredDescription};
pub use mutate::{
    ItemUpdate, NewItem, absorb, apply_update, new_item, set_blocked, set_last_phase_commit,
    set_merge_into, set_phase, set_phase_pool, set_pipeline_type, set_status,
    set_structured_description, set_triage_requested, set_unblock_context, transition, unblock,
};
pub use status::{ItemStatus, PhasePool};

use crate::store::{Item, NativeStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

/// Extension keys owned by this crate.
pub(crate) mod keys {
    pub const STATUS: &str = "x-pk-status";
    pub const PHASE: &str = "x-pk-phase";
    pub const PHASE_POOL: &str = "x-pk-phase-pool";
    pub const PIPELINE_TYPE: &str = "x-pk-pipeline-type";
    pub const LAST_PHASE_COMMIT: &str = "x-pk-last-phase-commit";
    pub const BLOCKED_FROM: &str = "x-pk-blocked-from";
    pub const BLOCKED_TYPE: &str = "x-pk-blocked-type";
    pub const UNBLOCK_CONTEXT: &str = "x-pk-unblock-context";
    pub const DESCRIPTION: &str = "x-pk-description";
    pub const IMPACT: &str = "x-pk-impact";
    pub const SIZE: &str = "x-pk-size";
    pub const RISK: &str = "x-pk-risk";
    pub const REQUIRES_HUMAN_REVIEW: &str = "x-pk-requires-human-review";
    pub const ORIGIN: &str = "x-pk-origin";
    pub const TRIAGE_REQUESTED: &str = "x-pk-triage-requested";
    pub const MERGE_INTO: &str = "x-pk-merge-into";
}

/// Whether `rev` looks like a version-control revision (7 to 64 hex chars).
pub fn is_valid_revision(rev: &str) -> bool {
    (7..=64).contains(&rev.len()) && rev.chars().all(|c| c.is_ascii_hexdigit())
}

// --- readers -------------------------------------------------------------

fn string_field<'a>(item: &'a Item, key: &str) -> Option<&'a str> {
    match item.extension(key)? {
        Value::String(s) => Some(s.as_str()),
        other => {
            warn!(item = %item.id, key, found = %type_name(other), "Ignoring extension value of unexpected type");
            None
        }
    }
}

fn bool_field(item: &Item, key: &str) -> bool {
    match item.extension(key) {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            warn!(item = %item.id, key, found = %type_name(other), "Ignoring extension value of unexpected type");
            false
        }
    }
}

fn parsed_field<T>(item: &Item, key: &str) -> Option<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw = string_field(item, key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(item = %item.id, key, value = raw, error = %e, "Ignoring invalid extension value");
            None
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn read_status(item: &Item) -> ItemStatus {
    match item.status {
        NativeStatus::Doing => ItemStatus::InProgress,
        NativeStatus::Done => ItemStatus::Done,
        NativeStatus::Blocked => ItemStatus::Blocked,
        NativeStatus::Todo => match item.extension(keys::STATUS) {
            None => ItemStatus::New,
            Some(Value::String(s)) => ItemStatus::from_todo_substate(s).unwrap_or_else(|| {
                warn!(item = %item.id, value = %s, "Unrecognized sub-state, reading as new");
                ItemStatus::New
            }),
            Some(other) => {
                warn!(item = %item.id, found = %type_name(other), "Sub-state has unexpected type, reading as new");
                ItemStatus::New
            }
        },
    }
}

pub(crate) fn read_phase(item: &Item) -> Option<&str> {
    let phase = string_field(item, keys::PHASE)?;
    if phase.trim().is_empty() {
        warn!(item = %item.id, "Ignoring empty phase name");
        return None;
    }
    Some(phase)
}

pub(crate) fn read_phase_pool(item: &Item) -> Option<PhasePool> {
    parsed_field(item, keys::PHASE_POOL)
}

pub(crate) fn read_pipeline_type(item: &Item) -> Option<&str> {
    string_field(item, keys::PIPELINE_TYPE).filter(|s| !s.trim().is_empty())
}

pub(crate) fn read_last_phase_commit(item: &Item) -> Option<&str> {
    let rev = string_field(item, keys::LAST_PHASE_COMMIT)?;
    if !is_valid_revision(rev) {
        warn!(item = %item.id, value = rev, "Ignoring malformed phase commit");
        return None;
    }
    Some(rev)
}

/// Authoritative blocked-from status.
pub(crate) fn read_blocked_from(item: &Item) -> Option<ItemStatus> {
    let status: ItemStatus = parsed_field(item, keys::BLOCKED_FROM)?;
    if item.blocked_from_status.is_none() {
        warn!(
            item = %item.id,
            value = %status,
            "Blocked-from extension is stale (native field cleared externally), ignoring"
        );
        return None;
    }
    if !status.is_blockable() {
        warn!(item = %item.id, value = %status, "Ignoring blocked-from that cannot be restored");
        return None;
    }
    Some(status)
}

pub(crate) fn read_blocked_type(item: &Item) -> Option<BlockType> {
    parsed_field(item, keys::BLOCKED_TYPE)
}

pub(crate) fn read_unblock_context(item: &Item) -> Option<&str> {
    string_field(item, keys::UNBLOCK_CONTEXT).filter(|s| !s.trim().is_empty())
}

pub(crate) fn read_description(item: &Item) -> Option<StructuredDescription> {
    let value = item.extension(keys::DESCRIPTION)?;
    match serde_json::from_value(value.clone()) {
        Ok(desc) => Some(desc),
        Err(e) => {
            warn!(item = %item.id, error = %e, "Ignoring unreadable structured description");
            None
        }
    }
}

pub(crate) fn read_impact(item: &Item) -> Option<Level> {
    parsed_field(item, keys::IMPACT)
}

pub(crate) fn read_merge_into(item: &Item) -> Option<&str> {
    string_field(item, keys::MERGE_INTO).filter(|s| !s.trim().is_empty())
}

pub(crate) fn read_triage_requested(item: &Item) -> bool {
    bool_field(item, keys::TRIAGE_REQUESTED)
}

// --- typed view ----------------------------------------------------------

/// Read-only typed wrapper over a store [`Item`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem(Item);

impl WorkItem {
    pub fn new(item: Item) -> Self {
        Self(item)
    }

    pub fn wrap_all(items: Vec<Item>) -> Vec<WorkItem> {
        items.into_iter().map(WorkItem).collect()
    }

    pub fn item(&self) -> &Item {
        &self.0
    }

    pub fn into_inner(self) -> Item {
        self.0
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn title(&self) -> &str {
        &self.0.title
    }

    pub fn native_status(&self) -> NativeStatus {
        self.0.status
    }

    pub fn priority(&self) -> i64 {
        self.0.priority
    }

    pub fn tags(&self) -> &[String] {
        &self.0.tags
    }

    pub fn dependencies(&self) -> &[String] {
        &self.0.dependencies
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.0.updated_at
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.0.blocked_reason.as_deref()
    }

    /// Native single-line description.
    pub fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }

    pub fn status(&self) -> ItemStatus {
        read_status(&self.0)
    }

    pub fn phase(&self) -> Option<&str> {
        read_phase(&self.0)
    }

    pub fn phase_pool(&self) -> Option<PhasePool> {
        read_phase_pool(&self.0)
    }

    pub fn pipeline_type(&self) -> Option<&str> {
        read_pipeline_type(&self.0)
    }

    pub fn last_phase_commit(&self) -> Option<&str> {
        read_last_phase_commit(&self.0)
    }

    pub fn blocked_from(&self) -> Option<ItemStatus> {
        read_blocked_from(&self.0)
    }

    pub fn blocked_type(&self) -> Option<BlockType> {
        read_blocked_type(&self.0)
    }

    pub fn unblock_context(&self) -> Option<&str> {
        read_unblock_context(&self.0)
    }

    pub fn structured_description(&self) -> Option<StructuredDescription> {
        read_description(&self.0)
    }

    pub fn impact(&self) -> Option<Level> {
        read_impact(&self.0)
    }

    pub fn size(&self) -> Option<SizeLevel> {
        parsed_field(&self.0, keys::SIZE)
    }

    pub fn risk(&self) -> Option<Level> {
        parsed_field(&self.0, keys::RISK)
    }

    pub fn requires_human_review(&self) -> bool {
        bool_field(&self.0, keys::REQUIRES_HUMAN_REVIEW)
    }

    pub fn origin(&self) -> Option<&str> {
        string_field(&self.0, keys::ORIGIN)
    }

    pub fn triage_requested(&self) -> bool {
        read_triage_requested(&self.0)
    }

    pub fn merge_into(&self) -> Option<&str> {
        read_merge_into(&self.0)
    }
}

impl From<Item> for WorkItem {
    fn from(item: Item) -> Self {
        WorkItem(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo(id: &str) -> Item {
        Item::new(id, "Some work", Utc::now())
    }

    #[test]
    fn every_status_round_trips_through_native() {
        for status in ItemStatus::ALL {
            let mut item = todo("WRK-1");
            if status == ItemStatus::Blocked {
                set_blocked(&mut item, Some("waiting".into()), None).unwrap();
            } else {
                set_status(&mut item, status);
            }
            assert_eq!(read_status(&item), status, "round trip of {status}");
            assert_eq!(item.status, status.to_native());
        }
    }

    #[test]
    fn todo_without_substate_reads_as_new() {
        let item = todo("WRK-1");
        assert!(item.extension(keys::STATUS).is_none());
        assert_eq!(read_status(&item), ItemStatus::New);
    }

    #[test]
    fn unrecognized_substate_reads_as_new() {
        let mut item = todo("WRK-1");
        item.set_extension(keys::STATUS, json!("someday"));
        assert_eq!(read_status(&item), ItemStatus::New);
        item.set_extension(keys::STATUS, json!(3));
        assert_eq!(read_status(&item), ItemStatus::New);
    }

    #[test]
    fn non_todo_ignores_stale_substate() {
        for native in [NativeStatus::Doing, NativeStatus::Done, NativeStatus::Blocked] {
            let mut item = todo("WRK-1");
            item.set_extension(keys::STATUS, json!("ready"));
            item.set_native_status(native);
            let expected = match native {
                NativeStatus::Doing => ItemStatus::InProgress,
                NativeStatus::Done => ItemStatus::Done,
                _ => ItemStatus::Blocked,
            };
            assert_eq!(read_status(&item), expected);
        }
    }

    #[test]
    fn non_todo_write_clears_substate() {
        let mut item = todo("WRK-1");
        set_status(&mut item, ItemStatus::Ready);
        assert_eq!(item.extension(keys::STATUS), Some(&json!("ready")));
        set_status(&mut item, ItemStatus::InProgress);
        assert!(item.extension(keys::STATUS).is_none());
    }

    #[test]
    fn blocked_from_is_stale_without_native_field() {
        let mut item = todo("WRK-1");
        set_status(&mut item, ItemStatus::Scoping);
        set_blocked(&mut item, None, None).unwrap();
        assert_eq!(read_blocked_from(&item), Some(ItemStatus::Scoping));

        // An external tool cleared the native field but left our key.
        item.blocked_from_status = None;
        assert_eq!(read_blocked_from(&item), None);
    }

    #[test]
    fn blocked_from_rejects_unrestorable_values() {
        let mut item = todo("WRK-1");
        item.block_native(None);
        item.set_extension(keys::BLOCKED_FROM, json!("done"));
        assert_eq!(read_blocked_from(&item), None);
        item.set_extension(keys::BLOCKED_FROM, json!("blocked"));
        assert_eq!(read_blocked_from(&item), None);
        item.set_extension(keys::BLOCKED_FROM, json!("in_progress"));
        assert_eq!(read_blocked_from(&item), Some(ItemStatus::InProgress));
    }

    #[test]
    fn malformed_description_reads_as_absent() {
        let mut item = todo("WRK-1");
        item.set_extension(keys::DESCRIPTION, json!("just a string"));
        assert_eq!(read_description(&item), None);
        item.set_extension(keys::DESCRIPTION, json!({"context": 12}));
        assert_eq!(read_description(&item), None);
        item.set_extension(keys::DESCRIPTION, json!({"context": "ok", "problem": "p"}));
        assert_eq!(read_description(&item).unwrap().problem, "p");
    }

    #[test]
    fn phase_validation() {
        let mut item = todo("WRK-1");
        item.set_extension(keys::PHASE, json!(""));
        assert_eq!(read_phase(&item), None);
        item.set_extension(keys::PHASE, json!(["build"]));
        assert_eq!(read_phase(&item), None);
        item.set_extension(keys::PHASE, json!("build"));
        assert_eq!(read_phase(&item), Some("build"));
    }

    #[test]
    fn revision_validation() {
        assert!(is_valid_revision("abc1234"));
        assert!(is_valid_revision(&"f".repeat(40)));
        assert!(!is_valid_revision("abc12"));
        assert!(!is_valid_revision("not-a-sha"));
        assert!(!is_valid_revision(&"a".repeat(65)));

        let mut item = todo("WRK-1");
        item.set_extension(keys::LAST_PHASE_COMMIT, json!("zzzzzzz"));
        assert_eq!(read_last_phase_commit(&item), None);
        item.set_extension(keys::LAST_PHASE_COMMIT, json!("deadbeef"));
        assert_eq!(read_last_phase_commit(&item), Some("deadbeef"));
    }

    #[test]
    fn enum_fields_parse_or_read_absent() {
        let mut item = todo("WRK-1");
        item.set_extension(keys::IMPACT, json!("high"));
        item.set_extension(keys::SIZE, json!("gigantic"));
        item.set_extension(keys::PHASE_POOL, json!("pre"));
        item.set_extension(keys::REQUIRES_HUMAN_REVIEW, json!("yes"));
        let view = WorkItem::new(item);
        assert_eq!(view.impact(), Some(Level::High));
        assert_eq!(view.size(), None);
        assert_eq!(view.phase_pool(), Some(PhasePool::Pre));
        assert!(!view.requires_human_review());
    }

    #[test]
    fn view_delegates_native_fields() {
        let mut item = todo("WRK-9");
        item.tags = vec!["backend".into()];
        item.dependencies = vec!["WRK-1".into()];
        item.priority = 4;
        let view = WorkItem::from(item.clone());
        assert_eq!(view.id(), "WRK-9");
        assert_eq!(view.title(), "Some work");
        assert_eq!(view.tags(), ["backend".to_string()]);
        assert_eq!(view.dependencies(), ["WRK-1".to_string()]);
        assert_eq!(view.priority(), 4);
        assert_eq!(view.native_status(), NativeStatus::Todo);
        assert_eq!(view.into_inner(), item);
    }
}
