//! Three-way line merge engine.
//!
//! Uses the `diffy` crate to compute zero-context edit scripts from the base
//! to each side, then walks both scripts in base-line order. Edits that touch
//! disjoint base ranges are all applied; where the two scripts collide the
//! local edit wins and the remote edit is dropped. No conflict markers are
//! ever written into the output.

use diffy::{DiffOptions, Line};
use tracing::debug;

/// The result of a three-way line merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMergeResult {
    pub merged: String,
    /// Number of colliding regions resolved in local's favour.
    pub overlaps: usize,
}

impl LineMergeResult {
    fn clean(merged: &str) -> Self {
        Self {
            merged: merged.to_string(),
            overlaps: 0,
        }
    }
}

/// One contiguous replacement of base lines `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    lines: Vec<String>,
}

impl Edit {
    /// Two edits collide when their base ranges intersect or when they start
    /// at the same base line (two insertions at one point, or an insertion
    /// at the start of a replacement).
    fn collides_with(&self, start: usize, end: usize) -> bool {
        self.start == start || (self.start < end && start < self.end)
    }
}

/// Stateless three-way line merge engine.
pub struct LineMerger;

impl LineMerger {
    /// Merge `local` and `remote` against their common ancestor `base`.
    ///
    /// Without a common ancestor both sides created the file independently
    /// and local wins outright.
    pub fn merge(base: Option<&str>, local: &str, remote: &str) -> LineMergeResult {
        let Some(base) = base else {
            debug!("no common ancestor, local wins");
            return LineMergeResult::clean(local);
        };

        // Fast paths: one side unchanged, or both sides made the same change.
        if local == base || local == remote {
            return LineMergeResult::clean(remote);
        }
        if remote == base {
            return LineMergeResult::clean(local);
        }

        let local_edits = edit_script(base, local);
        let remote_edits = edit_script(base, remote);
        let base_lines: Vec<&str> = base.split_inclusive('\n').collect();

        let result = walk(&base_lines, &local_edits, &remote_edits);
        debug!(
            local_edits = local_edits.len(),
            remote_edits = remote_edits.len(),
            overlaps = result.overlaps,
            "line merge complete"
        );
        result
    }
}

/// Build the zero-context edit script turning `base` into `other`.
fn edit_script(base: &str, other: &str) -> Vec<Edit> {
    let mut options = DiffOptions::new();
    options.set_context_len(0);
    let patch = options.create_patch(base, other);

    patch
        .hunks()
        .iter()
        .map(|hunk| {
            let range = hunk.old_range();
            // Unified-diff ranges are 1-based, except that an empty range
            // names the line *after which* the insertion happens.
            let start = if range.len() == 0 {
                range.start()
            } else {
                range.start() - 1
            };
            let lines = hunk
                .lines()
                .iter()
                .filter_map(|line| match line {
                    Line::Insert(text) => Some(text.to_string()),
                    Line::Context(_) | Line::Delete(_) => None,
                })
                .collect();
            Edit {
                start,
                end: start + range.len(),
                lines,
            }
        })
        .collect()
}

/// Output builder that copies unchanged base spans and applies edits.
struct Output<'a> {
    base: &'a [&'a str],
    cursor: usize,
    text: String,
}

impl<'a> Output<'a> {
    /// Append one line. A previous line that lacked its terminator (the old
    /// last line of one side) gets a newline first so lines never fuse.
    fn push_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    fn copy_base_until(&mut self, pos: usize) {
        let pos = pos.min(self.base.len());
        if pos > self.cursor {
            let base = self.base;
            for line in &base[self.cursor..pos] {
                self.push_line(line);
            }
            self.cursor = pos;
        }
    }

    fn apply(&mut self, edit: &Edit) {
        self.copy_base_until(edit.start);
        for line in &edit.lines {
            self.push_line(line);
        }
        self.cursor = self.cursor.max(edit.end);
    }
}

fn walk(base: &[&str], local: &[Edit], remote: &[Edit]) -> LineMergeResult {
    let mut out = Output {
        base,
        cursor: 0,
        text: String::new(),
    };
    let mut overlaps = 0;
    let (mut li, mut ri) = (0, 0);

    loop {
        match (local.get(li), remote.get(ri)) {
            (None, None) => break,
            (Some(l), None) => {
                out.apply(l);
                li += 1;
            }
            (None, Some(r)) => {
                out.apply(r);
                ri += 1;
            }
            (Some(l), Some(r)) if !l.collides_with(r.start, r.end) => {
                if l.start <= r.start {
                    out.apply(l);
                    li += 1;
                } else {
                    out.apply(r);
                    ri += 1;
                }
            }
            (Some(l), Some(r)) => {
                // Grow the colliding region until no edit on either side
                // touches it, then emit local's version of the whole region.
                let start = l.start.min(r.start);
                let mut end = l.end.max(r.end);
                let first_local = li;
                li += 1;
                ri += 1;
                loop {
                    if let Some(next) = local.get(li).filter(|e| e.collides_with(start, end)) {
                        end = end.max(next.end);
                        li += 1;
                    } else if let Some(next) = remote.get(ri).filter(|e| e.collides_with(start, end)) {
                        end = end.max(next.end);
                        ri += 1;
                    } else {
                        break;
                    }
                }

                out.copy_base_until(start);
                for edit in &local[first_local..li] {
                    out.apply(edit);
                }
                out.copy_base_until(end);
                overlaps += 1;
            }
        }
    }
    out.copy_base_until(base.len());

    LineMergeResult {
        merged: out.text,
        overlaps,
    }
}
