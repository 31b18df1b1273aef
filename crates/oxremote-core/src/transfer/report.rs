use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::path::Path;

/// What a worker does after one item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop and return the first failure.
    #[default]
    Abort,
    /// Keep going; failures are listed in the report.
    Continue,
}

/// How one item of a copy was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    Native,
    Stream,
    Multipart,
    Directory,
}

#[derive(Debug)]
pub enum ItemOutcome {
    Copied { source: Path, target: Path, method: CopyMethod },
    Deleted { path: Path },
    Failed { path: Path, error: StorageError },
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }
}

/// Per-item outcomes of a worker run, in completion order.
#[derive(Debug, Default)]
pub struct TransferReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl TransferReport {
    pub fn push(&mut self, outcome: ItemOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn extend(&mut self, other: TransferReport) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &StorageError)> {
        self.outcomes.iter().filter_map(|o| match o {
            ItemOutcome::Failed { path, error } => Some((path, error)),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(ItemOutcome::is_failure)
    }

    /// Method used to copy `target`, if it was copied.
    pub fn method_for(&self, target: &Path) -> Option<CopyMethod> {
        self.outcomes.iter().find_map(|o| match o {
            ItemOutcome::Copied { target: t, method, .. } if t.eq_ignoring_version(target) => Some(*method),
            _ => None,
        })
    }

    pub fn deleted(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|o| match o {
            ItemOutcome::Deleted { path } => Some(path),
            _ => None,
        })
    }
}
