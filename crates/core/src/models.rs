//! Domain model types shared by the sync engine and its callers.
//!
//! These types are what the engine hands back: the explicit [`SyncState`]
//! threaded through every call and the [`SyncReport`] rendered by the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::{Conflict, MergeKind, MergePlan};
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Revisions & state
// ---------------------------------------------------------------------------

/// Opaque identifier of a remote revision (a commit SHA for Git).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State passed into and returned from every sync operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// The revision both sides last agreed on. `None` before the first sync.
    pub base_revision: Option<RevisionId>,
}

impl SyncState {
    pub fn at(revision: Option<RevisionId>) -> Self {
        Self {
            base_revision: revision,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// How a sync operation ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The remote already matched what the merge produced.
    UpToDate,
    /// Push found no local edits since the base.
    NoChanges,
    /// Remote changes were merged into the working tree.
    Pulled,
    /// A new revision was published.
    Pushed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up_to_date"),
            Self::NoChanges => write!(f, "no_changes"),
            Self::Pulled => write!(f, "pulled"),
            Self::Pushed => write!(f, "pushed"),
        }
    }
}

/// Per-path change counts between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ChangeCounts {
    /// Count what it takes to turn `from` into `to`.
    pub fn between(from: &Snapshot, to: &Snapshot) -> Self {
        let mut counts = Self::default();
        for path in Snapshot::union_paths(&[from, to]) {
            match (from.get(path), to.get(path)) {
                (None, Some(_)) => counts.created += 1,
                (Some(_), None) => counts.deleted += 1,
                (Some(a), Some(b)) if a != b => counts.updated += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// The result of one pull or push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Paths whose content was produced by a three-way merge.
    pub merged: usize,
    pub conflicts_auto_resolved: usize,
    /// Publish attempts rejected before the one that succeeded.
    pub retries: u32,
    pub warnings: Vec<String>,
    pub conflicts: Vec<Conflict>,
    /// The base after this operation.
    pub base_revision: Option<RevisionId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn new(outcome: SyncOutcome, started_at: DateTime<Utc>) -> Self {
        Self {
            outcome,
            created: 0,
            updated: 0,
            deleted: 0,
            merged: 0,
            conflicts_auto_resolved: 0,
            retries: 0,
            warnings: Vec::new(),
            conflicts: Vec::new(),
            base_revision: None,
            started_at,
            completed_at: None,
        }
    }

    /// Fill in the counts, warnings, and conflicts of an applied plan.
    /// `changes` describes the side that was rewritten.
    pub fn record_plan(&mut self, plan: &MergePlan, changes: ChangeCounts) {
        self.created = changes.created;
        self.updated = changes.updated;
        self.deleted = changes.deleted;
        self.merged = plan.count(MergeKind::Merge);
        self.conflicts_auto_resolved = plan.conflicts.len();
        self.warnings = plan.warnings.clone();
        self.conflicts = plan.conflicts.clone();
    }

    /// Stamp the completion time and resulting base.
    pub fn finish(mut self, base_revision: Option<RevisionId>) -> Self {
        self.base_revision = base_revision;
        self.completed_at = Some(Utc::now());
        self
    }

    /// The state a caller should carry into its next sync.
    pub fn state(&self) -> SyncState {
        SyncState::at(self.base_revision.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(files: &[(&str, &str)]) -> Snapshot {
        files
            .iter()
            .map(|(p, c)| (*p, c.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_change_counts() {
        let from = snapshot(&[("a.txt", "1"), ("b.txt", "2"), ("c.txt", "3")]);
        let to = snapshot(&[("a.txt", "1"), ("b.txt", "two"), ("d.txt", "4")]);
        let counts = ChangeCounts::between(&from, &to);
        assert_eq!(
            counts,
            ChangeCounts {
                created: 1,
                updated: 1,
                deleted: 1
            }
        );
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_revision_short() {
        let rev = RevisionId::new("0123456789abcdef");
        assert_eq!(rev.short(), "0123456");
        assert_eq!(RevisionId::new("abc").short(), "abc");
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = SyncReport::new(SyncOutcome::Pushed, Utc::now())
            .finish(Some(RevisionId::new("deadbeef")));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "pushed");
        assert_eq!(json["base_revision"], "deadbeef");
        assert!(json["completed_at"].is_string());
        assert_eq!(report.state().base_revision, Some(RevisionId::new("deadbeef")));
    }
}
