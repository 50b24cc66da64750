//! Collision-free item ID allocation.

use super::StoreError;
use std::collections::HashSet;

/// Upper bound on candidate IDs tried before allocation gives up.
pub const MAX_ID_ATTEMPTS: u32 = 1000;

/// Allocates `<PREFIX>-<N>` IDs against a known-ID set.
///
/// Allocated IDs are added to the set, so several allocations made within
/// one command never collide with each other.
#[derive(Debug)]
pub struct IdAllocator {
    prefix: String,
    known: HashSet<String>,
    next: u64,
}

impl IdAllocator {
    pub fn new(prefix: &str, known: HashSet<String>) -> Result<Self, StoreError> {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::InvalidId {
                id: prefix.to_string(),
            });
        }

        let highest = known
            .iter()
            .filter_map(|id| numeric_suffix(id, prefix))
            .max()
            .unwrap_or(0);

        Ok(Self {
            prefix: prefix.to_string(),
            known,
            next: highest.saturating_add(1),
        })
    }

    pub fn next_id(&mut self) -> Result<String, StoreError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = format!("{}-{}", self.prefix, self.next);
            self.next = self.next.checked_add(1).ok_or_else(|| self.exhausted())?;
            if self.known.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(self.exhausted())
    }

    fn exhausted(&self) -> StoreError {
        StoreError::IdExhausted {
            prefix: self.prefix.clone(),
            attempts: MAX_ID_ATTEMPTS,
        }
    }
}

fn numeric_suffix(id: &str, prefix: &str) -> Option<u64> {
    id.strip_prefix(prefix)?.strip_prefix('-')?.parse().ok()
}
