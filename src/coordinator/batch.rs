//! Deferred commits for non-destructive changes.

/// One staged change waiting for the next batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub item_id: String,
    pub summary: String,
}

/// Accumulates staged changes between flushes. Only the coordinator loop
/// touches it.
#[derive(Debug, Default)]
pub(crate) struct CommitBatch {
    entries: Vec<BatchEntry>,
}

impl CommitBatch {
    pub fn push(&mut self, item_id: &str, summary: impl Into<String>) {
        self.entries.push(BatchEntry {
            item_id: item_id.to_string(),
            summary: summary.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Commit message covering every entry, in the order they were added.
    pub fn message(&self) -> String {
        let mut ids: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !ids.contains(&entry.item_id.as_str()) {
                ids.push(&entry.item_id);
            }
        }
        let mut message = format!("[phasekeep] batch: {}\n\n", ids.join(", "));
        for entry in &self.entries {
            message.push_str(&format!("- {}: {}\n", entry.item_id, entry.summary));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lists_each_item_once_in_header() {
        let mut batch = CommitBatch::default();
        batch.push("WRK-2", "prd complete");
        batch.push("WRK-3", "promoted to scoping");
        batch.push("WRK-2", "design complete");
        assert_eq!(batch.len(), 3);
        let message = batch.message();
        assert!(message.starts_with("[phasekeep] batch: WRK-2, WRK-3\n"));
        assert!(message.contains("- WRK-2: prd complete\n"));
        assert!(message.contains("- WRK-2: design complete\n"));

        batch.clear();
        assert!(batch.is_empty());
    }
}
