//! The local working tree the user edits.
//!
//! [`WorkingTree`] is the engine's view of the local side: list and read the
//! content files, replace the whole tree with a merged snapshot, and keep the
//! out-of-band marker files aside while that happens.
//!
//! # Path classes
//!
//! Every relative path under the root falls into one [`PathClass`]:
//!
//! | Condition | Class |
//! |-----------|-------|
//! | Inside `.git` | `Repository` |
//! | File name is a configured marker file | `Marker` |
//! | Inside a metadata directory, at any depth | `Marker` |
//! | The `cmsync.toml` at the root | `Ignored` |
//! | Matches an ignore pattern | `Ignored` |
//! | None of the above | `Content` |
//!
//! Only `Content` paths are synced. `reset` removes everything except
//! `Repository` and `Ignored` paths, so markers must be saved before a reset
//! and restored after it. Files whose normalized content already matches the
//! target are not rewritten, so local line endings survive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::classify::normalize_content;
use crate::config::{TreeConfig, CONFIG_FILE_NAME};
use crate::errors::TreeError;
use crate::snapshot::{normalize_path, Snapshot};

const GIT_DIR: &str = ".git";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The local side of a sync. Implementations are blocking; the engine runs
/// them on the blocking thread pool.
pub trait WorkingTree: Send + Sync + 'static {
    /// Relative paths of all content files, in lexical order.
    fn list_files(&self) -> Result<Vec<String>, TreeError>;

    /// Raw bytes of one content file.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, TreeError>;

    /// Make the content of the tree equal `target`. Destructive: marker
    /// files are removed too.
    fn reset(&self, target: &Snapshot) -> Result<(), TreeError>;

    /// Copy every marker file and the metadata directory aside.
    fn save_markers(&self) -> Result<MarkerSet, TreeError>;

    /// Write saved markers back verbatim.
    fn restore_markers(&self, markers: &MarkerSet) -> Result<(), TreeError>;
}

/// Saved marker-file and metadata contents, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerSet {
    files: BTreeMap<String, Vec<u8>>,
}

impl MarkerSet {
    pub fn insert(&mut self, path: impl Into<String>, content: Vec<u8>) {
        self.files.insert(path.into(), content);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }
}

// ---------------------------------------------------------------------------
// Path classification
// ---------------------------------------------------------------------------

/// How a relative path is treated by the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// Synced content.
    Content,
    /// Marker file or metadata entry: never synced, preserved across resets.
    Marker,
    /// Matches an ignore pattern: never synced, never touched.
    Ignored { pattern: String },
    /// Version-control internals.
    Repository,
}

impl PathClass {
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Content)
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Marker => "marker",
            Self::Ignored { .. } => "ignored",
            Self::Repository => "repository",
        }
    }
}

/// Classifies relative paths against the `[tree]` configuration.
#[derive(Debug, Clone)]
pub struct PathFilter {
    marker_files: Vec<String>,
    metadata_dir: String,
    ignore_patterns: Vec<String>,
}

impl PathFilter {
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            marker_files: config.marker_files.clone(),
            metadata_dir: normalize_path(&config.metadata_dir),
            ignore_patterns: config
                .ignore_patterns
                .iter()
                .map(|p| p.replace('\\', "/"))
                .collect(),
        }
    }

    /// Classify a slash-separated relative path.
    pub fn classify(&self, rel_path: &str) -> PathClass {
        let path = normalize_path(rel_path);
        let first = path.split('/').next().unwrap_or_default();
        if first == GIT_DIR {
            return PathClass::Repository;
        }
        if path == CONFIG_FILE_NAME {
            return PathClass::Ignored {
                pattern: CONFIG_FILE_NAME.to_string(),
            };
        }
        if self.in_metadata_dir(&path) {
            return PathClass::Marker;
        }
        let name = path.rsplit('/').next().unwrap_or_default();
        if self.marker_files.iter().any(|m| m == name) {
            return PathClass::Marker;
        }
        for pattern in &self.ignore_patterns {
            if glob_match::glob_match(pattern, &path) {
                debug!(path = %path, pattern = pattern.as_str(), "path matches ignore pattern");
                return PathClass::Ignored {
                    pattern: pattern.clone(),
                };
            }
        }
        PathClass::Content
    }

    /// Whether some directory segment of `path` is the metadata directory.
    fn in_metadata_dir(&self, path: &str) -> bool {
        if self.metadata_dir.is_empty() {
            return false;
        }
        format!("/{path}").contains(&format!("/{}/", self.metadata_dir))
    }
}

// ---------------------------------------------------------------------------
// Filesystem implementation
// ---------------------------------------------------------------------------

/// A [`WorkingTree`] backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct FsWorkingTree {
    root: PathBuf,
    filter: PathFilter,
}

impl FsWorkingTree {
    /// Open the tree rooted at `root`, which must be an existing directory.
    pub fn new<P: AsRef<Path>>(root: P, config: &TreeConfig) -> Result<Self, TreeError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TreeError::RootNotFound(root.display().to_string()));
        }
        info!(root = %root.display(), "opened working tree");
        Ok(Self {
            root: root.to_path_buf(),
            filter: PathFilter::new(config),
        })
    }

    fn full_path(&self, rel_path: &str) -> PathBuf {
        rel_path
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    /// Every regular file under the root with its class, skipping `.git`.
    fn walk(&self) -> Result<Vec<(String, PathClass)>, TreeError> {
        let mut out = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|source| TreeError::Walk {
                path: dir.display().to_string(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| TreeError::Walk {
                    path: dir.display().to_string(),
                    source,
                })?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let rel = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                let file_type = entry.file_type().map_err(|source| TreeError::Walk {
                    path: rel.clone(),
                    source,
                })?;

                if file_type.is_dir() {
                    if rel != GIT_DIR {
                        pending.push((entry.path(), rel));
                    }
                } else if file_type.is_file() {
                    let class = self.filter.classify(&rel);
                    out.push((rel, class));
                } else {
                    debug!(path = %rel, "skipping non-regular file");
                }
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn write_file(&self, rel_path: &str, content: &[u8]) -> Result<(), TreeError> {
        let full = self.full_path(rel_path);
        let write_err = |source| TreeError::Write {
            path: rel_path.to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(&full, content).map_err(write_err)
    }

    fn remove_file(&self, rel_path: &str) -> Result<(), TreeError> {
        std::fs::remove_file(self.full_path(rel_path)).map_err(|source| TreeError::Remove {
            path: rel_path.to_string(),
            source,
        })
    }

    /// Remove empty directories below the root (never the root or `.git`).
    fn prune_empty_dirs(&self, dir: &Path) -> Result<bool, TreeError> {
        let entries = std::fs::read_dir(dir).map_err(|source| TreeError::Walk {
            path: dir.display().to_string(),
            source,
        })?;
        let mut empty = true;
        for entry in entries {
            let entry = entry.map_err(|source| TreeError::Walk {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && entry.file_name() != GIT_DIR && self.prune_empty_dirs(&path)? {
                std::fs::remove_dir(&path).map_err(|source| TreeError::Remove {
                    path: path.display().to_string(),
                    source,
                })?;
                continue;
            }
            empty = false;
        }
        Ok(empty)
    }
}

impl WorkingTree for FsWorkingTree {
    fn list_files(&self) -> Result<Vec<String>, TreeError> {
        let files: Vec<String> = self
            .walk()?
            .into_iter()
            .filter(|(_, class)| class.is_content())
            .map(|(path, _)| path)
            .collect();
        debug!(count = files.len(), "listed working tree");
        Ok(files)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, TreeError> {
        std::fs::read(self.full_path(path)).map_err(|source| TreeError::Read {
            path: path.to_string(),
            source,
        })
    }

    fn reset(&self, target: &Snapshot) -> Result<(), TreeError> {
        let mut removed = 0usize;
        let mut written = 0usize;

        for (path, class) in self.walk()? {
            let keep = match class {
                PathClass::Content => target.contains(&path),
                PathClass::Marker => false,
                PathClass::Ignored { .. } | PathClass::Repository => true,
            };
            if !keep {
                self.remove_file(&path)?;
                removed += 1;
            }
        }

        for (path, content) in target.iter() {
            let full = self.full_path(path);
            if let Ok(existing) = std::fs::read(&full) {
                if normalize_content(existing) == content {
                    continue;
                }
            }
            self.write_file(path, content)?;
            written += 1;
        }

        self.prune_empty_dirs(&self.root)?;
        info!(written, removed, "working tree reset");
        Ok(())
    }

    fn save_markers(&self) -> Result<MarkerSet, TreeError> {
        let mut markers = MarkerSet::default();
        for (path, class) in self.walk()? {
            if class == PathClass::Marker {
                let content = self.read_file(&path)?;
                markers.insert(path, content);
            }
        }
        debug!(count = markers.len(), "saved markers");
        Ok(markers)
    }

    fn restore_markers(&self, markers: &MarkerSet) -> Result<(), TreeError> {
        for (path, content) in markers.iter() {
            if let Err(err) = self.write_file(path, content) {
                warn!(path, error = %err, "failed to restore marker");
                return Err(err);
            }
        }
        debug!(count = markers.len(), "restored markers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_config() -> TreeConfig {
        TreeConfig {
            marker_files: vec![".cmsync".into()],
            metadata_dir: "_meta".into(),
            ignore_patterns: vec!["*.tmp".into(), "**/*.tmp".into(), "drafts/**".into()],
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let full = root.join(rel);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    #[test]
    fn test_classify_paths() {
        let filter = PathFilter::new(&tree_config());
        assert_eq!(filter.classify("posts/hello.md"), PathClass::Content);
        assert_eq!(filter.classify(".git/HEAD"), PathClass::Repository);
        assert_eq!(filter.classify("posts/.cmsync"), PathClass::Marker);
        assert_eq!(filter.classify("_meta/posts.json"), PathClass::Marker);
        assert_eq!(filter.classify("_metadata.json"), PathClass::Content);
        assert_eq!(filter.classify("posts/_meta/schema.json"), PathClass::Marker);
        assert_eq!(filter.classify("posts/_metadata/a.json"), PathClass::Content);
        assert!(matches!(
            filter.classify("posts/scratch.tmp"),
            PathClass::Ignored { .. }
        ));
        assert_eq!(filter.classify("drafts/idea.md").label(), "ignored");
    }

    #[test]
    fn test_config_file_is_never_synced() {
        let filter = PathFilter::new(&tree_config());
        assert_eq!(
            filter.classify(CONFIG_FILE_NAME),
            PathClass::Ignored {
                pattern: CONFIG_FILE_NAME.to_string()
            }
        );
        assert_eq!(filter.classify("docs/cmsync.toml"), PathClass::Content);

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, CONFIG_FILE_NAME, "[repo]\nremote = \"origin\"\n");
        write(root, "index.md", "home");
        let tree = FsWorkingTree::new(root, &tree_config()).unwrap();
        assert_eq!(tree.list_files().unwrap(), vec!["index.md"]);

        tree.reset(&Snapshot::empty()).unwrap();
        assert!(root.join(CONFIG_FILE_NAME).exists());
        assert!(!root.join("index.md").exists());
    }

    #[test]
    fn test_root_not_found() {
        let result = FsWorkingTree::new("/nonexistent/tree", &tree_config());
        assert!(matches!(result, Err(TreeError::RootNotFound(_))));
    }

    #[test]
    fn test_list_files_excludes_non_content() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.md", "home");
        write(root, "posts/a.json", "{}");
        write(root, "posts/.cmsync", "id=1");
        write(root, "_meta/schema.json", "{}");
        write(root, ".git/config", "[core]");
        write(root, "notes.tmp", "scratch");

        let tree = FsWorkingTree::new(root, &tree_config()).unwrap();
        assert_eq!(tree.list_files().unwrap(), vec!["index.md", "posts/a.json"]);
        assert_eq!(tree.read_file("posts/a.json").unwrap(), b"{}");
    }

    #[test]
    fn test_reset_replaces_content_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "keep.md", "same");
        write(root, "change.md", "old");
        write(root, "old/gone.md", "bye");
        write(root, "notes.tmp", "scratch");
        write(root, ".git/HEAD", "ref: refs/heads/main");

        let target: Snapshot = vec![
            ("keep.md", b"same".to_vec()),
            ("change.md", b"new".to_vec()),
            ("fresh/new.md", b"hi".to_vec()),
        ]
        .into_iter()
        .collect();

        let tree = FsWorkingTree::new(root, &tree_config()).unwrap();
        tree.reset(&target).unwrap();

        assert_eq!(std::fs::read(root.join("change.md")).unwrap(), b"new");
        assert_eq!(std::fs::read(root.join("fresh/new.md")).unwrap(), b"hi");
        assert!(!root.join("old").exists());
        assert!(root.join("notes.tmp").exists());
        assert!(root.join(".git/HEAD").exists());
        assert_eq!(
            tree.list_files().unwrap(),
            vec!["change.md", "fresh/new.md", "keep.md"]
        );
    }

    #[test]
    fn test_reset_leaves_crlf_files_matching_target() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "dos.txt", "one\r\ntwo\r\n");
        write(root, "stale.txt", "old\r\n");

        let target: Snapshot = vec![
            ("dos.txt", b"one\ntwo\n".to_vec()),
            ("stale.txt", b"new\n".to_vec()),
        ]
        .into_iter()
        .collect();

        let tree = FsWorkingTree::new(root, &tree_config()).unwrap();
        tree.reset(&target).unwrap();

        assert_eq!(std::fs::read(root.join("dos.txt")).unwrap(), b"one\r\ntwo\r\n");
        assert_eq!(std::fs::read(root.join("stale.txt")).unwrap(), b"new\n");
    }

    #[test]
    fn test_markers_survive_reset_when_saved() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "posts/a.md", "a");
        write(root, "posts/.cmsync", "entity=posts");
        write(root, "_meta/posts.json", "{\"id\": 7}");

        let tree = FsWorkingTree::new(root, &tree_config()).unwrap();
        let markers = tree.save_markers().unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers.get("posts/.cmsync"), Some(&b"entity=posts"[..]));

        tree.reset(&Snapshot::empty()).unwrap();
        assert!(!root.join("posts").exists());
        assert!(!root.join("_meta").exists());

        tree.restore_markers(&markers).unwrap();
        assert_eq!(
            std::fs::read(root.join("posts/.cmsync")).unwrap(),
            b"entity=posts"
        );
        assert_eq!(
            std::fs::read(root.join("_meta/posts.json")).unwrap(),
            b"{\"id\": 7}"
        );
        assert!(tree.list_files().unwrap().is_empty());
    }
}
