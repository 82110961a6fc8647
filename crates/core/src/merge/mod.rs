//! Three-way merging of file contents and whole snapshots.
//!
//! The merge subsystem is responsible for:
//! 1. **Line merging** -- diff-based merging of free-form text.
//! 2. **Structured merging** -- field-level merging of JSON documents.
//! 3. **Planning** -- deciding per path whether to adopt, keep, delete, or
//!    merge, and producing the merged snapshot.
//!
//! Every irreconcilable difference resolves the same way: the local side
//! wins, and the loss of the remote edit is recorded as a [`Conflict`].

pub mod line;
pub mod planner;
pub mod structured;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::{Classifier, ContentKind};
use crate::errors::MergeError;

pub use line::{LineMergeResult, LineMerger};
pub use planner::{MergeAction, MergeKind, MergePlan, Planner};
pub use structured::{StructuredMergeResult, StructuredMerger};

/// Default recursion bound for nested documents.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Default length (in characters) of conflict value previews.
pub const DEFAULT_PREVIEW_LEN: usize = 80;

/// Preview text used for a value one side deleted.
pub const DELETED_PREVIEW: &str = "(deleted)";

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// How an automatically resolved conflict was settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    LocalWins,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalWins => write!(f, "local_wins"),
        }
    }
}

/// A remote edit that was discarded in favour of the local one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    /// File the conflict occurred in.
    pub path: String,
    /// Dotted field path inside a structured document, if any.
    pub field: Option<String>,
    pub resolution: Resolution,
    /// Bounded preview of the value that was kept.
    pub local_preview: String,
    /// Bounded preview of the value that was dropped.
    pub remote_preview: String,
}

impl Conflict {
    pub fn local_wins(
        path: impl Into<String>,
        field: Option<String>,
        local_preview: String,
        remote_preview: String,
    ) -> Self {
        Self {
            path: path.into(),
            field,
            resolution: Resolution::LocalWins,
            local_preview,
            remote_preview,
        }
    }
}

/// Truncate `text` to at most `max_chars` characters, marking truncation
/// with an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// ContentMerger
// ---------------------------------------------------------------------------

/// Which content merger handles a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Line,
    Structured,
}

impl MergeStrategy {
    /// The strategy for a classified content kind. Binary content has no
    /// strategy: it is never merged.
    pub fn for_kind(kind: ContentKind) -> Option<Self> {
        match kind {
            ContentKind::Binary => None,
            ContentKind::Structured => Some(Self::Structured),
            ContentKind::Text => Some(Self::Line),
        }
    }
}

/// The merged content of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMerge {
    pub content: Vec<u8>,
    pub strategy: MergeStrategy,
    pub conflicts: Vec<Conflict>,
    /// Set when the structured merge failed and the line merger took over.
    pub fallback_reason: Option<String>,
}

/// The single merge capability the planner dispatches through. The
/// classifier picks a [`MergeStrategy`]; both strategies share the
/// local-wins rule.
#[derive(Debug, Clone)]
pub struct ContentMerger {
    classifier: Classifier,
    structured: StructuredMerger,
    preview_len: usize,
}

impl Default for ContentMerger {
    fn default() -> Self {
        Self::new(Classifier::default(), DEFAULT_MAX_DEPTH, DEFAULT_PREVIEW_LEN)
    }
}

impl ContentMerger {
    pub fn new(classifier: Classifier, max_depth: usize, preview_len: usize) -> Self {
        Self {
            classifier,
            structured: StructuredMerger::new(max_depth, preview_len),
            preview_len,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Merge one text file. Returns `MergeError::NotUtf8` if any side is not
    /// valid UTF-8; callers treat that like binary content.
    pub fn merge(
        &self,
        path: &str,
        strategy: MergeStrategy,
        base: Option<&[u8]>,
        local: &[u8],
        remote: &[u8],
    ) -> Result<FileMerge, MergeError> {
        let base = base.map(|b| as_text(path, "base", b)).transpose()?;
        let local = as_text(path, "local", local)?;
        let remote = as_text(path, "remote", remote)?;

        match strategy {
            MergeStrategy::Line => {
                let result = LineMerger::merge(base, local, remote);
                if result.overlaps > 0 {
                    debug!(path, overlaps = result.overlaps, "overlapping line edits resolved local-wins");
                }
                Ok(FileMerge {
                    content: result.merged.into_bytes(),
                    strategy,
                    conflicts: Vec::new(),
                    fallback_reason: None,
                })
            }
            MergeStrategy::Structured => {
                match self.structured.merge_text(path, base, local, remote) {
                    Ok(result) => Ok(FileMerge {
                        content: result.merged.into_bytes(),
                        strategy,
                        conflicts: result.conflicts,
                        fallback_reason: None,
                    }),
                    Err(err) => {
                        warn!(path, error = %err, "structured merge failed, falling back to line merge");
                        let result = LineMerger::merge(base, local, remote);
                        let conflict = Conflict::local_wins(
                            path,
                            None,
                            preview(local, self.preview_len),
                            preview(remote, self.preview_len),
                        );
                        Ok(FileMerge {
                            content: result.merged.into_bytes(),
                            strategy: MergeStrategy::Line,
                            conflicts: vec![conflict],
                            fallback_reason: Some(err.to_string()),
                        })
                    }
                }
            }
        }
    }
}

fn as_text<'a>(path: &str, side: &'static str, bytes: &'a [u8]) -> Result<&'a str, MergeError> {
    std::str::from_utf8(bytes).map_err(|_| MergeError::NotUtf8 {
        path: path.to_string(),
        side,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("  padded  ", 10), "padded");
        assert_eq!(preview("ééééé", 3), "ééé…");
    }

    #[test]
    fn test_strategy_for_kind() {
        assert_eq!(MergeStrategy::for_kind(ContentKind::Binary), None);
        assert_eq!(
            MergeStrategy::for_kind(ContentKind::Structured),
            Some(MergeStrategy::Structured)
        );
        assert_eq!(MergeStrategy::for_kind(ContentKind::Text), Some(MergeStrategy::Line));
    }

    #[test]
    fn test_structured_parse_failure_falls_back_to_lines() {
        let merger = ContentMerger::default();
        let base = b"{\"a\": 1,\n";
        let local = b"{\"a\": 2,\n";
        let remote = b"{\"a\": 1,\n\"b\": 3\n";
        let result = merger
            .merge("broken.json", MergeStrategy::Structured, Some(base), local, remote)
            .unwrap();
        assert_eq!(result.strategy, MergeStrategy::Line);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].field, None);
        assert!(result.fallback_reason.is_some());
        assert_eq!(result.content, b"{\"a\": 2,\n\"b\": 3\n");
    }

    #[test]
    fn test_non_utf8_is_rejected() {
        let merger = ContentMerger::default();
        let result = merger.merge("latin1.txt", MergeStrategy::Line, None, b"caf\xe9", b"cafe");
        assert!(matches!(result, Err(MergeError::NotUtf8 { side: "local", .. })));
    }
}
