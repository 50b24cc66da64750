//! The store's native item record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Native four-state status understood by every store reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeStatus {
    Todo,
    Doing,
    Done,
    Blocked,
}

impl std::fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeStatus::Todo => write!(f, "todo"),
            NativeStatus::Doing => write!(f, "doing"),
            NativeStatus::Done => write!(f, "done"),
            NativeStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// A unit of tracked work as persisted by the store.
///
/// Domain-specific data lives in the extension map, keyed by namespaced
/// strings. The map is only reachable through crate-internal accessors; the
/// typed view over it is [`crate::item::WorkItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub status: NativeStatus,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Lossy projection of the status held before blocking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_from_status: Option<NativeStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, serde_json::Value>,
}

impl Item {
    /// Create a `Todo` item with no extension data.
    pub fn new(id: &str, title: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            status: NativeStatus::Todo,
            priority: 0,
            description: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            blocked_reason: None,
            blocked_from_status: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_native_status(&mut self, status: NativeStatus) {
        self.status = status;
        self.touch();
    }

    /// Move to `Blocked`, remembering the previous native status.
    ///
    /// Blocking an already blocked item only replaces the reason.
    pub fn block_native(&mut self, reason: Option<String>) {
        if self.status != NativeStatus::Blocked {
            self.blocked_from_status = Some(self.status);
            self.status = NativeStatus::Blocked;
        }
        self.blocked_reason = reason;
        self.touch();
    }

    /// Clear native blocked bookkeeping. A still-blocked item falls back to
    /// its recorded native status, or `Todo`.
    pub fn clear_blocked_native(&mut self) {
        if self.status == NativeStatus::Blocked {
            self.status = self.blocked_from_status.unwrap_or(NativeStatus::Todo);
        }
        self.blocked_reason = None;
        self.blocked_from_status = None;
        self.touch();
    }

    pub(crate) fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    pub(crate) fn set_extension(&mut self, key: &str, value: serde_json::Value) {
        self.extensions.insert(key.to_string(), value);
        self.touch();
    }

    pub(crate) fn remove_extension(&mut self, key: &str) -> Option<serde_json::Value> {
        let removed = self.extensions.remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> Item {
        Item::new("WRK-1", "Write docs", Utc::now())
    }

    #[test]
    fn new_item_is_todo_without_extensions() {
        let item = item();
        assert_eq!(item.status, NativeStatus::Todo);
        assert!(item.extensions.is_empty());
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn block_native_records_previous_status() {
        let mut item = item();
        item.set_native_status(NativeStatus::Doing);
        item.block_native(Some("waiting on API keys".into()));
        assert_eq!(item.status, NativeStatus::Blocked);
        assert_eq!(item.blocked_from_status, Some(NativeStatus::Doing));
        assert_eq!(item.blocked_reason.as_deref(), Some("waiting on API keys"));
    }

    #[test]
    fn reblocking_keeps_original_blocked_from() {
        let mut item = item();
        item.block_native(Some("first".into()));
        item.block_native(Some("second".into()));
        assert_eq!(item.blocked_from_status, Some(NativeStatus::Todo));
        assert_eq!(item.blocked_reason.as_deref(), Some("second"));
    }

    #[test]
    fn clear_blocked_native_restores_status() {
        let mut item = item();
        item.set_native_status(NativeStatus::Doing);
        item.block_native(None);
        item.clear_blocked_native();
        assert_eq!(item.status, NativeStatus::Doing);
        assert!(item.blocked_from_status.is_none());
        assert!(item.blocked_reason.is_none());
    }

    #[test]
    fn extensions_serialize_and_skip_when_empty() {
        let mut item = item();
        let plain = serde_json::to_value(&item).unwrap();
        assert!(plain.get("extensions").is_none());

        item.set_extension("x-pk-phase", json!("build"));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["extensions"]["x-pk-phase"], "build");

        let back: Item = serde_json::from_value(value).unwrap();
        assert_eq!(back.extension("x-pk-phase"), Some(&json!("build")));
    }

    #[test]
    fn remove_extension_reports_previous_value() {
        let mut item = item();
        item.set_extension("x-pk-phase", json!("spec"));
        assert_eq!(item.remove_extension("x-pk-phase"), Some(json!("spec")));
        assert_eq!(item.remove_extension("x-pk-phase"), None);
    }
}
