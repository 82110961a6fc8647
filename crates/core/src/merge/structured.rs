//! Three-way field-level merge of JSON documents.
//!
//! Documents are parsed with `serde_json`'s `preserve_order` maps so key
//! order survives the merge: output follows remote's key order, with keys
//! only local has appended at the end. Nested objects changed on both sides
//! are merged recursively up to a fixed depth; below that depth, and for
//! every non-object value, the local side wins and a [`Conflict`] is
//! recorded.

use serde_json::{Map, Value};
use tracing::debug;

use super::{preview, Conflict, DELETED_PREVIEW};
use crate::errors::MergeError;

/// The result of a structured merge.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredMergeResult {
    /// Serialized merged document.
    pub merged: String,
    pub conflicts: Vec<Conflict>,
}

/// Field-level three-way merger with bounded recursion.
#[derive(Debug, Clone)]
pub struct StructuredMerger {
    max_depth: usize,
    preview_len: usize,
}

impl StructuredMerger {
    pub fn new(max_depth: usize, preview_len: usize) -> Self {
        Self {
            max_depth,
            preview_len,
        }
    }

    /// Parse, merge, and re-serialize three versions of a JSON document.
    ///
    /// Fails with [`MergeError::ParseFailed`] if any side is not a JSON
    /// object. Unchanged sides short-circuit so the winning side's
    /// formatting is kept byte for byte.
    pub fn merge_text(
        &self,
        path: &str,
        base: Option<&str>,
        local: &str,
        remote: &str,
    ) -> Result<StructuredMergeResult, MergeError> {
        let Some(base) = base else {
            return Ok(StructuredMergeResult {
                merged: local.to_string(),
                conflicts: Vec::new(),
            });
        };
        if local == base || local == remote {
            return Ok(StructuredMergeResult {
                merged: remote.to_string(),
                conflicts: Vec::new(),
            });
        }
        if remote == base {
            return Ok(StructuredMergeResult {
                merged: local.to_string(),
                conflicts: Vec::new(),
            });
        }

        let base_doc = parse_object(path, "base", base)?;
        let local_doc = parse_object(path, "local", local)?;
        let remote_doc = parse_object(path, "remote", remote)?;

        let (merged_doc, conflicts) = self.merge_documents(path, &base_doc, &local_doc, &remote_doc);

        let mut merged = serde_json::to_string_pretty(&Value::Object(merged_doc)).map_err(|e| {
            MergeError::SerializeFailed {
                path: path.to_string(),
                detail: e.to_string(),
            }
        })?;
        if local.ends_with('\n') {
            merged.push('\n');
        }

        debug!(path, conflicts = conflicts.len(), "structured merge complete");
        Ok(StructuredMergeResult { merged, conflicts })
    }

    /// Merge three parsed documents, returning the merged document and every
    /// conflict resolved along the way.
    pub fn merge_documents(
        &self,
        path: &str,
        base: &Map<String, Value>,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
    ) -> (Map<String, Value>, Vec<Conflict>) {
        let mut conflicts = Vec::new();
        let merged = self.merge_level(path, "", 0, base, local, remote, &mut conflicts);
        (merged, conflicts)
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_level(
        &self,
        path: &str,
        prefix: &str,
        depth: usize,
        base: &Map<String, Value>,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
        conflicts: &mut Vec<Conflict>,
    ) -> Map<String, Value> {
        let mut out = Map::new();

        // Primary traversal: remote's keys, in remote's order.
        for (key, remote_val) in remote {
            let base_val = base.get(key);
            let local_val = local.get(key);
            let local_changed = local_val != base_val;
            let remote_changed = Some(remote_val) != base_val;

            if !local_changed {
                out.insert(key.clone(), remote_val.clone());
                continue;
            }
            if !remote_changed || local_val == Some(remote_val) {
                if let Some(v) = local_val {
                    out.insert(key.clone(), v.clone());
                }
                continue;
            }

            let field = join_field(prefix, key);
            match (local_val, remote_val) {
                (Some(Value::Object(l)), Value::Object(r)) if depth < self.max_depth => {
                    let empty = Map::new();
                    let b = match base_val {
                        Some(Value::Object(b)) => b,
                        _ => &empty,
                    };
                    let nested = self.merge_level(path, &field, depth + 1, b, l, r, conflicts);
                    out.insert(key.clone(), Value::Object(nested));
                }
                _ => {
                    if let Some(v) = local_val {
                        out.insert(key.clone(), v.clone());
                    }
                    conflicts.push(self.conflict(path, field, local_val, Some(remote_val)));
                }
            }
        }

        // Secondary traversal: keys remote does not have.
        for (key, local_val) in local {
            if remote.contains_key(key) {
                continue;
            }
            match base.get(key) {
                // Added locally.
                None => {
                    out.insert(key.clone(), local_val.clone());
                }
                // Remote deleted it and local left it alone: honour the deletion.
                Some(base_val) if base_val == local_val => {}
                // Remote deleted it but local edited it: keep local's edit.
                Some(_) => {
                    out.insert(key.clone(), local_val.clone());
                    let field = join_field(prefix, key);
                    conflicts.push(self.conflict(path, field, Some(local_val), None));
                }
            }
        }

        out
    }

    fn conflict(
        &self,
        path: &str,
        field: String,
        local: Option<&Value>,
        remote: Option<&Value>,
    ) -> Conflict {
        debug!(path, field = %field, "field changed on both sides, local wins");
        Conflict::local_wins(
            path,
            Some(field),
            self.value_preview(local),
            self.value_preview(remote),
        )
    }

    fn value_preview(&self, value: Option<&Value>) -> String {
        match value {
            None => DELETED_PREVIEW.to_string(),
            Some(Value::String(s)) => preview(s, self.preview_len),
            Some(other) => preview(&other.to_string(), self.preview_len),
        }
    }
}

fn join_field(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn parse_object(path: &str, side: &'static str, text: &str) -> Result<Map<String, Value>, MergeError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MergeError::ParseFailed {
            path: path.to_string(),
            side,
            detail: format!("top-level value is {}, not an object", type_name(&other)),
        }),
        Err(e) => Err(MergeError::ParseFailed {
            path: path.to_string(),
            side,
            detail: e.to_string(),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
