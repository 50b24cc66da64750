//! Domain status and phase pool enums.

use crate::store::NativeStatus;
use serde::{Deserialize, Serialize};

/// Six-state domain status layered over the native four-state status.
///
/// `New`, `Scoping` and `Ready` all persist as native `Todo`; the sub-state
/// lives in an extension key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet triaged
    New,
    /// Running pre-phases
    Scoping,
    /// Scoped and waiting for promotion into the main pipeline
    Ready,
    InProgress,
    Done,
    Blocked,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        ItemStatus::New,
        ItemStatus::Scoping,
        ItemStatus::Ready,
        ItemStatus::InProgress,
        ItemStatus::Done,
        ItemStatus::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Scoping => "scoping",
            ItemStatus::Ready => "ready",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Done => "done",
            ItemStatus::Blocked => "blocked",
        }
    }

    pub fn to_native(self) -> NativeStatus {
        match self {
            ItemStatus::New | ItemStatus::Scoping | ItemStatus::Ready => NativeStatus::Todo,
            ItemStatus::InProgress => NativeStatus::Doing,
            ItemStatus::Done => NativeStatus::Done,
            ItemStatus::Blocked => NativeStatus::Blocked,
        }
    }

    /// Value stored under the sub-state key, for `Todo`-backed statuses.
    pub(crate) fn todo_substate(self) -> Option<&'static str> {
        match self {
            ItemStatus::New | ItemStatus::Scoping | ItemStatus::Ready => Some(self.as_str()),
            ItemStatus::InProgress | ItemStatus::Done | ItemStatus::Blocked => None,
        }
    }

    pub(crate) fn from_todo_substate(value: &str) -> Option<Self> {
        match value {
            "new" => Some(ItemStatus::New),
            "scoping" => Some(ItemStatus::Scoping),
            "ready" => Some(ItemStatus::Ready),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done)
    }

    /// Statuses an item may be blocked from and later restored to.
    pub fn is_blockable(self) -> bool {
        !matches!(self, ItemStatus::Done | ItemStatus::Blocked)
    }

    /// Whether a direct status change is allowed. Leaving `Blocked` goes
    /// through unblock, never through a plain transition.
    pub fn is_valid_transition(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, to) {
            (Done, _) | (Blocked, _) => false,
            (_, Blocked) | (_, Done) => true,
            (New, Scoping) | (New, Ready) => true,
            (Scoping, Ready) => true,
            (Ready, InProgress) | (Ready, Scoping) => true,
            (InProgress, Ready) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "new" => Ok(ItemStatus::New),
            "scoping" => Ok(ItemStatus::Scoping),
            "ready" => Ok(ItemStatus::Ready),
            "in_progress" => Ok(ItemStatus::InProgress),
            "done" => Ok(ItemStatus::Done),
            "blocked" => Ok(ItemStatus::Blocked),
            _ => anyhow::bail!(
                "Invalid status '{}'. Valid values: new, scoping, ready, in_progress, done, blocked",
                s
            ),
        }
    }
}

/// Whether a phase belongs to the pre-pipeline (scoping) or the main pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhasePool {
    Pre,
    Main,
}

impl PhasePool {
    pub fn as_str(self) -> &'static str {
        match self {
            PhasePool::Pre => "pre",
            PhasePool::Main => "main",
        }
    }
}

impl std::fmt::Display for PhasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhasePool {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pre" => Ok(PhasePool::Pre),
            "main" => Ok(PhasePool::Main),
            _ => anyhow::bail!("Invalid phase pool '{}'. Valid values: pre, main", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn todo_backed_statuses_share_native_todo() {
        for status in [ItemStatus::New, ItemStatus::Scoping, ItemStatus::Ready] {
            assert_eq!(status.to_native(), NativeStatus::Todo);
            assert!(status.todo_substate().is_some());
        }
        assert_eq!(ItemStatus::InProgress.to_native(), NativeStatus::Doing);
        assert_eq!(ItemStatus::Done.to_native(), NativeStatus::Done);
        assert_eq!(ItemStatus::Blocked.to_native(), NativeStatus::Blocked);
    }

    #[test]
    fn substate_round_trips() {
        for status in ItemStatus::ALL {
            if let Some(value) = status.todo_substate() {
                assert_eq!(ItemStatus::from_todo_substate(value), Some(status));
            }
        }
        assert_eq!(ItemStatus::from_todo_substate("in_progress"), None);
    }

    #[test]
    fn parse_accepts_dashes_and_case() {
        assert_eq!("In-Progress".parse::<ItemStatus>().unwrap(), ItemStatus::InProgress);
        assert_eq!("READY".parse::<ItemStatus>().unwrap(), ItemStatus::Ready);
        assert!("started".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn transitions() {
        assert!(ItemStatus::New.is_valid_transition(ItemStatus::Scoping));
        assert!(ItemStatus::Ready.is_valid_transition(ItemStatus::InProgress));
        assert!(ItemStatus::InProgress.is_valid_transition(ItemStatus::Done));
        assert!(ItemStatus::Scoping.is_valid_transition(ItemStatus::Blocked));
        assert!(!ItemStatus::New.is_valid_transition(ItemStatus::InProgress));
        assert!(!ItemStatus::Done.is_valid_transition(ItemStatus::Ready));
        assert!(!ItemStatus::Blocked.is_valid_transition(ItemStatus::Ready));
    }

    #[test]
    fn blockable_excludes_terminal_and_blocked() {
        assert!(ItemStatus::InProgress.is_blockable());
        assert!(ItemStatus::New.is_blockable());
        assert!(!ItemStatus::Done.is_blockable());
        assert!(!ItemStatus::Blocked.is_blockable());
    }

    #[test]
    fn phase_pool_parses() {
        assert_eq!("pre".parse::<PhasePool>().unwrap(), PhasePool::Pre);
        assert_eq!("Main".parse::<PhasePool>().unwrap(), PhasePool::Main);
        assert!("post".parse::<PhasePool>().is_err());
    }
}
