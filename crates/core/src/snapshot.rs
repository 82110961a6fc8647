//! Immutable path-to-content snapshots of a content tree.
//!
//! A [`Snapshot`] captures the full state of a tree (base, local, or remote)
//! at one instant. Keys are slash-normalized relative paths. Snapshots are
//! built once (via [`SnapshotBuilder`] or `FromIterator`) and never mutated
//! afterwards.

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

/// Normalize a relative path to the snapshot key form: forward slashes, no
/// leading `./` or `/`, no empty or `.` segments.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// An immutable mapping from relative path to byte content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<String, Vec<u8>>,
}

impl Snapshot {
    /// An empty snapshot (e.g. the base before the first sync).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a new snapshot.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// `(path, content)` pairs in lexical path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    /// The sorted union of the paths in all given snapshots.
    pub fn union_paths<'a>(snapshots: &[&'a Snapshot]) -> BTreeSet<&'a str> {
        snapshots.iter().copied().flat_map(Snapshot::paths).collect()
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, Vec<u8>);
    type IntoIter = btree_map::IntoIter<String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl<P: AsRef<str>> FromIterator<(P, Vec<u8>)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (P, Vec<u8>)>>(iter: I) -> Self {
        let mut builder = Snapshot::builder();
        for (path, content) in iter {
            builder.insert(path.as_ref(), content);
        }
        builder.build()
    }
}

/// Accumulates files before freezing them into a [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    files: BTreeMap<String, Vec<u8>>,
}

impl SnapshotBuilder {
    /// Insert a file. The path is normalized; a later insert of the same
    /// normalized path replaces the earlier one. Paths that normalize to the
    /// empty string are ignored.
    pub fn insert(&mut self, path: &str, content: Vec<u8>) -> &mut Self {
        let key = normalize_path(path);
        if !key.is_empty() {
            self.files.insert(key, content);
        }
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot { files: self.files }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/b.json"), "a/b.json");
        assert_eq!(normalize_path("./a//b.json"), "a/b.json");
        assert_eq!(normalize_path("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(normalize_path("/root.txt"), "root.txt");
        assert_eq!(normalize_path("."), "");
    }

    #[test]
    fn test_builder_normalizes_and_dedups() {
        let mut builder = Snapshot::builder();
        builder
            .insert("pages\\home.json", b"old".to_vec())
            .insert("./pages/home.json", b"new".to_vec())
            .insert("", b"ignored".to_vec());
        let snap = builder.build();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("pages/home.json"), Some(&b"new"[..]));
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a: Snapshot = vec![("x", b"1".to_vec()), ("y", b"2".to_vec())]
            .into_iter()
            .collect();
        let b: Snapshot = vec![("y", b"2".to_vec()), ("x", b"1".to_vec())]
            .into_iter()
            .collect();
        assert_eq!(a, b);
        assert_eq!(a.paths().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn test_union_paths_sorted() {
        let a: Snapshot = vec![("b", vec![]), ("a", vec![])].into_iter().collect();
        let b: Snapshot = vec![("c", vec![]), ("a", vec![])].into_iter().collect();
        let union: Vec<&str> = Snapshot::union_paths(&[&a, &b]).into_iter().collect();
        assert_eq!(union, vec!["a", "b", "c"]);
    }
}
