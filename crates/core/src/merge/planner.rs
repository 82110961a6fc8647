//! Per-path merge decisions over base/local/remote snapshots.
//!
//! # Decision table
//!
//! | base | local | remote | action |
//! |------|-------|--------|--------|
//! | –    | –     | ✓      | `AdoptRemote` |
//! | –    | ✓     | –      | `KeepLocal` |
//! | –    | ✓     | ✓      | equal: `AdoptRemote`, else `KeepLocal` (no common ancestor) |
//! | ✓    | ✓     | –      | `Delete` (warns if local had edits) |
//! | ✓    | –     | ✓      | `Delete` (local removal wins, even over remote edits) |
//! | ✓    | –     | –      | `Delete` |
//! | ✓    | ✓     | ✓      | unchanged local: `AdoptRemote`; unchanged remote or equal sides: `KeepLocal`; else `Merge` |
//!
//! `Merge` actions whose content is binary (or not valid UTF-8) are turned
//! into `KeepLocal` without invoking a merger.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Conflict, ContentMerger, MergeStrategy};
use crate::snapshot::Snapshot;

/// What happens to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    AdoptRemote,
    KeepLocal,
    Delete,
    Merge,
}

impl std::fmt::Display for MergeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdoptRemote => write!(f, "adopt_remote"),
            Self::KeepLocal => write!(f, "keep_local"),
            Self::Delete => write!(f, "delete"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// The decision for one path, with the three versions it was made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeAction {
    pub path: String,
    pub kind: MergeKind,
    pub base: Option<Vec<u8>>,
    pub local: Option<Vec<u8>>,
    pub remote: Option<Vec<u8>>,
    pub warning: Option<String>,
}

impl MergeAction {
    fn new(path: &str, kind: MergeKind, base: Option<&[u8]>, local: Option<&[u8]>, remote: Option<&[u8]>) -> Self {
        Self {
            path: path.to_string(),
            kind,
            base: base.map(<[u8]>::to_vec),
            local: local.map(<[u8]>::to_vec),
            remote: remote.map(<[u8]>::to_vec),
            warning: None,
        }
    }

    fn with_warning(mut self, warning: String) -> Self {
        self.warning = Some(warning);
        self
    }
}

/// The full outcome of planning a sync.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    /// One action per path, in lexical path order.
    pub actions: Vec<MergeAction>,
    /// The tree every side should converge on.
    pub merged: Snapshot,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
}

impl MergePlan {
    pub fn count(&self, kind: MergeKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    pub fn action(&self, path: &str) -> Option<&MergeAction> {
        self.actions.iter().find(|a| a.path == path)
    }
}

/// Builds [`MergePlan`]s. Pure: no I/O and no shared state.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    merger: ContentMerger,
}

impl Planner {
    pub fn new(merger: ContentMerger) -> Self {
        Self { merger }
    }

    /// Compare the three snapshots path by path and merge where needed.
    pub fn plan(&self, base: &Snapshot, local: &Snapshot, remote: &Snapshot) -> MergePlan {
        let paths = Snapshot::union_paths(&[base, local, remote]);
        let mut plan = MergePlan::default();
        let mut merged = Snapshot::builder();

        for path in paths {
            let b = base.get(path);
            let l = local.get(path);
            let r = remote.get(path);

            let mut action = decide(path, b, l, r);
            let content = match action.kind {
                MergeKind::AdoptRemote => r.map(<[u8]>::to_vec),
                MergeKind::KeepLocal => l.map(<[u8]>::to_vec),
                MergeKind::Delete => None,
                MergeKind::Merge => {
                    // decide() only emits Merge with all three sides present.
                    let (Some(b), Some(l), Some(r)) = (b, l, r) else {
                        continue;
                    };
                    self.resolve_merge(path, b, l, r, &mut action, &mut plan.conflicts)
                }
            };

            debug!(path, kind = %action.kind, "planned");
            if let Some(warning) = &action.warning {
                warn!(path, "{warning}");
                plan.warnings.push(warning.clone());
            }
            if let Some(content) = content {
                merged.insert(path, content);
            }
            plan.actions.push(action);
        }

        plan.merged = merged.build();
        info!(
            paths = plan.actions.len(),
            adopt_remote = plan.count(MergeKind::AdoptRemote),
            keep_local = plan.count(MergeKind::KeepLocal),
            delete = plan.count(MergeKind::Delete),
            merge = plan.count(MergeKind::Merge),
            conflicts = plan.conflicts.len(),
            "merge plan built"
        );
        plan
    }

    /// Run the content merger for a `Merge` action. Binary or non-UTF-8
    /// content turns the action into `KeepLocal`.
    fn resolve_merge(
        &self,
        path: &str,
        base: &[u8],
        local: &[u8],
        remote: &[u8],
        action: &mut MergeAction,
        conflicts: &mut Vec<Conflict>,
    ) -> Option<Vec<u8>> {
        let kind = self.merger.classifier().classify(path, local, remote);
        let Some(strategy) = MergeStrategy::for_kind(kind) else {
            return Some(self.keep_local_binary(path, local, action, conflicts));
        };

        match self.merger.merge(path, strategy, Some(base), local, remote) {
            Ok(file) => {
                if let Some(reason) = file.fallback_reason {
                    action.warning = Some(format!("{path}: merged line by line ({reason})"));
                }
                conflicts.extend(file.conflicts);
                Some(file.content)
            }
            Err(err) => {
                debug!(path, error = %err, "content is not mergeable text");
                Some(self.keep_local_binary(path, local, action, conflicts))
            }
        }
    }

    fn keep_local_binary(
        &self,
        path: &str,
        local: &[u8],
        action: &mut MergeAction,
        conflicts: &mut Vec<Conflict>,
    ) -> Vec<u8> {
        action.kind = MergeKind::KeepLocal;
        action.warning = Some(format!(
            "{path}: binary file changed on both sides, keeping local version"
        ));
        let remote_len = action.remote.as_ref().map_or(0, Vec::len);
        conflicts.push(Conflict::local_wins(
            path,
            None,
            format!("<binary, {} bytes>", local.len()),
            format!("<binary, {remote_len} bytes>"),
        ));
        local.to_vec()
    }
}

/// The decision table, before any content merging.
fn decide(path: &str, base: Option<&[u8]>, local: Option<&[u8]>, remote: Option<&[u8]>) -> MergeAction {
    use MergeKind::*;

    match (base, local, remote) {
        (None, None, Some(_)) => MergeAction::new(path, AdoptRemote, base, local, remote),
        (None, Some(_), None) => MergeAction::new(path, KeepLocal, base, local, remote),
        (None, Some(l), Some(r)) if l == r => MergeAction::new(path, AdoptRemote, base, local, remote),
        (None, Some(_), Some(_)) => MergeAction::new(path, KeepLocal, base, local, remote).with_warning(
            format!("{path}: created on both sides with different content, keeping local version"),
        ),
        (Some(b), Some(l), None) => {
            let action = MergeAction::new(path, Delete, base, local, remote);
            if l != b {
                action.with_warning(format!(
                    "{path}: deleted remotely, discarding local edits"
                ))
            } else {
                action
            }
        }
        (Some(_), None, _) => MergeAction::new(path, Delete, base, local, remote),
        (Some(b), Some(l), Some(r)) => {
            let kind = if l == b {
                AdoptRemote
            } else if r == b || l == r {
                KeepLocal
            } else {
                Merge
            };
            MergeAction::new(path, kind, base, local, remote)
        }
        // Paths come from the union of the three key sets.
        (None, None, None) => MergeAction::new(path, Delete, base, local, remote),
    }
}
