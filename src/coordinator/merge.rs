//! Folding one item into another.

use crate::errors::CoordinatorError;
use crate::item::{absorb, set_merge_into};
use crate::store::{Item, StoreError, find_item_mut};
use std::collections::{HashMap, HashSet};

/// Merge `source` into `target` within a loaded active set.
///
/// On success the active set no longer contains the source, the target has
/// absorbed it, and every dependency on the source now points at the target.
/// The removed source is returned for archiving. On failure `items` is left
/// untouched.
pub(crate) fn merge_items(
    items: &mut Vec<Item>,
    source: &str,
    target: &str,
) -> Result<Item, CoordinatorError> {
    if source == target {
        return Err(CoordinatorError::invalid_transition(
            source,
            "an item cannot be merged into itself",
        ));
    }
    let Some(source_index) = items.iter().position(|i| i.id == source) else {
        return Err(StoreError::ItemNotFound {
            id: source.to_string(),
        }
        .into());
    };
    if !items.iter().any(|i| i.id == target) {
        return Err(StoreError::ItemNotFound {
            id: target.to_string(),
        }
        .into());
    }

    let mut next = items.clone();
    let mut removed = next.remove(source_index);
    absorb(find_item_mut(&mut next, target)?, &removed);

    for item in next.iter_mut().filter(|i| i.id != target) {
        if item.dependencies.iter().any(|d| d == source) {
            item.dependencies.retain(|d| d != source);
            if !item.dependencies.iter().any(|d| d == target) {
                item.dependencies.push(target.to_string());
            }
            item.touch();
        }
    }

    if let Some(cycle) = find_cycle(&next, target) {
        return Err(CoordinatorError::DependencyCycle {
            id: target.to_string(),
            cycle,
        });
    }

    set_merge_into(&mut removed, None);
    *items = next;
    Ok(removed)
}

/// A dependency path from `start` back to itself, following only IDs present
/// in `items`.
pub(crate) fn find_cycle(items: &[Item], start: &str) -> Option<Vec<String>> {
    let graph: HashMap<&str, &[String]> = items
        .iter()
        .map(|i| (i.id.as_str(), i.dependencies.as_slice()))
        .collect();
    let mut path = vec![start.to_string()];
    let mut visited = HashSet::new();
    if walk(&graph, start, start, &mut path, &mut visited) {
        Some(path)
    } else {
        None
    }
}

fn walk<'a>(
    graph: &HashMap<&'a str, &'a [String]>,
    start: &str,
    current: &str,
    path: &mut Vec<String>,
    visited: &mut HashSet<&'a str>,
) -> bool {
    let Some(deps) = graph.get(current) else {
        return false;
    };
    for dep in deps.iter() {
        if dep == start {
            path.push(dep.clone());
            return true;
        }
        if graph.contains_key(dep.as_str()) && visited.insert(dep.as_str()) {
            path.push(dep.clone());
            if walk(graph, start, dep, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{NewItem, WorkItem, new_item, set_merge_into};
    use chrono::Utc;

    fn item(id: &str, deps: &[&str]) -> Item {
        let mut spec = NewItem::titled(id);
        spec.dependencies = deps.iter().map(|d| d.to_string()).collect();
        new_item(id, &spec, Utc::now())
    }

    #[test]
    fn merge_unions_dependencies_and_removes_source() {
        let mut source = item("A-2", &["A-9"]);
        set_merge_into(&mut source, Some("A-1"));
        let mut items = vec![item("A-1", &["A-5"]), source];

        let removed = merge_items(&mut items, "A-2", "A-1").unwrap();
        assert_eq!(removed.id, "A-2");
        assert_eq!(WorkItem::new(removed).merge_into(), None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].dependencies, vec!["A-5".to_string(), "A-9".to_string()]);
    }

    #[test]
    fn dependents_of_source_point_at_target() {
        let mut items = vec![
            item("A-1", &[]),
            item("A-2", &[]),
            item("A-3", &["A-2", "A-1"]),
            item("A-4", &["A-2"]),
        ];
        merge_items(&mut items, "A-2", "A-1").unwrap();
        let a3 = items.iter().find(|i| i.id == "A-3").unwrap();
        let a4 = items.iter().find(|i| i.id == "A-4").unwrap();
        assert_eq!(a3.dependencies, vec!["A-1".to_string()]);
        assert_eq!(a4.dependencies, vec!["A-1".to_string()]);
    }

    #[test]
    fn missing_items_are_not_found() {
        let mut items = vec![item("A-1", &[])];
        let err = merge_items(&mut items, "A-2", "A-1").unwrap_err();
        assert!(matches!(err, CoordinatorError::ItemNotFound { ref id } if id == "A-2"));
        let err = merge_items(&mut items, "A-1", "A-7").unwrap_err();
        assert!(matches!(err, CoordinatorError::ItemNotFound { ref id } if id == "A-7"));
    }

    #[test]
    fn self_merge_is_invalid() {
        let mut items = vec![item("A-1", &[])];
        assert!(matches!(
            merge_items(&mut items, "A-1", "A-1"),
            Err(CoordinatorError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn merge_creating_cycle_is_rejected_without_changes() {
        // A-3 depends on A-1; merging A-2 (which depends on A-3) into A-1 closes the loop.
        let mut items = vec![item("A-1", &[]), item("A-2", &["A-3"]), item("A-3", &["A-1"])];
        let before = items.clone();
        let err = merge_items(&mut items, "A-2", "A-1").unwrap_err();
        match err {
            CoordinatorError::DependencyCycle { id, cycle } => {
                assert_eq!(id, "A-1");
                assert_eq!(cycle, vec!["A-1", "A-3", "A-1"]);
            }
            other => panic!("Expected DependencyCycle, got {:?}", other),
        }
        assert_eq!(items, before);
    }

    #[test]
    fn find_cycle_ignores_missing_ids() {
        let items = vec![item("A-1", &["GONE-1"]), item("A-2", &["A-1"])];
        assert!(find_cycle(&items, "A-1").is_none());
        assert!(find_cycle(&items, "A-2").is_none());
    }
}
