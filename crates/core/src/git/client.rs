//! [`VersionedRemote`] backed by a local Git clone via `git2`.
//!
//! The local branch ref doubles as the recorded base. Publishing never
//! touches the working directory: the tree is built from the snapshot in an
//! in-memory index, committed on top of the fetched revision, and pushed
//! without force so the remote itself enforces the compare-and-swap.

use std::path::{Path, PathBuf};

use git2::{
    Cred, ErrorCode, FetchOptions, FetchPrune, Index, IndexEntry, IndexTime, ObjectType, Oid,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature, Tree, TreeWalkMode,
    TreeWalkResult,
};
use tracing::{debug, info, instrument, warn};

use super::{PublishOutcome, RemoteState, VersionedRemote};
use crate::classify::normalize_content;
use crate::config::RepoConfig;
use crate::errors::GitError;
use crate::models::RevisionId;
use crate::snapshot::Snapshot;

const FILE_MODE: u32 = 0o100_644;

/// Git-backed remote: a local repository plus a named upstream and branch.
pub struct GitRemote {
    repo_path: PathBuf,
    remote_name: String,
    branch: String,
    token: Option<String>,
    author_name: String,
    author_email: String,
}

impl GitRemote {
    /// Open the repository at `repo_path` for syncing `branch` with
    /// `remote_name`.
    pub fn new<P: AsRef<Path>>(
        repo_path: P,
        remote_name: &str,
        branch: &str,
    ) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), remote = remote_name, branch, "opening git repository");
        Repository::open(path).map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo_path: path.to_path_buf(),
            remote_name: remote_name.to_string(),
            branch: branch.to_string(),
            token: None,
            author_name: "cmsync".into(),
            author_email: "cmsync@localhost".into(),
        })
    }

    /// Open the repository described by the `[repo]` config section.
    pub fn from_config(config: &RepoConfig) -> Result<Self, GitError> {
        let mut remote = Self::new(&config.path, &config.remote, &config.branch)?;
        remote.token = config.token.clone();
        remote.author_name = config.author_name.clone();
        remote.author_email = config.author_email.clone();
        Ok(remote)
    }

    pub fn with_author(mut self, name: &str, email: &str) -> Self {
        self.author_name = name.to_string();
        self.author_email = email.to_string();
        self
    }

    fn open(&self) -> Result<Repository, GitError> {
        Repository::open(&self.repo_path)
            .map_err(|_| GitError::RepositoryNotFound(self.repo_path.display().to_string()))
    }

    fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote_name, self.branch)
    }

    fn callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = &self.token {
            let tok = tok.clone();
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        callbacks
    }

    fn fetch(&self, repo: &Repository) -> Result<(), GitError> {
        let mut remote = repo.find_remote(&self.remote_name)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.callbacks());
        fetch_opts.prune(FetchPrune::On);
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!(remote = %self.remote_name, "fetch completed");
        Ok(())
    }

    /// Push the local branch without force. A rejected ref update comes back
    /// as `GitError::PushRejected`.
    fn push_branch(&self, repo: &Repository) -> Result<(), GitError> {
        let mut remote = repo.find_remote(&self.remote_name)?;
        let refspec = format!("{0}:{0}", self.local_ref());
        let mut rejection: Option<String> = None;
        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    rejection = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut push_opts))?;
        }
        match rejection {
            Some(detail) => Err(GitError::PushRejected {
                branch: self.branch.clone(),
                detail,
            }),
            None => Ok(()),
        }
    }

    /// Point the local branch back at `previous` (or delete it).
    fn restore_local_ref(&self, repo: &Repository, previous: Option<Oid>) -> Result<(), GitError> {
        let name = self.local_ref();
        match previous {
            Some(oid) => {
                repo.reference(&name, oid, true, "cmsync: roll back rejected publish")?;
            }
            None => {
                if let Ok(mut reference) = repo.find_reference(&name) {
                    reference.delete()?;
                }
            }
        }
        Ok(())
    }

    fn resolve_target(repo: &Repository, name: &str) -> Result<Option<Oid>, GitError> {
        match repo.find_reference(name) {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read every blob in `tree` into a snapshot, normalizing text content.
fn tree_snapshot(repo: &Repository, tree: &Tree<'_>) -> Result<Snapshot, GitError> {
    let mut entries = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                entries.push((format!("{dir}{name}"), entry.id()));
            }
        }
        TreeWalkResult::Ok
    })?;

    let mut builder = Snapshot::builder();
    for (path, oid) in entries {
        let blob = repo.find_blob(oid)?;
        builder.insert(&path, normalize_content(blob.content().to_vec()));
    }
    Ok(builder.build())
}

/// Write `snapshot` into the object database as a tree, without touching
/// the repository's own index.
fn write_snapshot_tree(repo: &Repository, snapshot: &Snapshot) -> Result<Oid, GitError> {
    let mut index = Index::new()?;
    for (path, content) in snapshot.iter() {
        if path.is_empty() || path.split('/').any(|s| s == ".." || s == ".git") {
            return Err(GitError::InvalidPath(path.to_string()));
        }
        let id = repo.blob(content)?;
        let file_size =
            u32::try_from(content.len()).map_err(|_| GitError::InvalidPath(path.to_string()))?;
        index.add(&IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: FILE_MODE,
            uid: 0,
            gid: 0,
            file_size,
            id,
            flags: 0,
            flags_extended: 0,
            path: path.as_bytes().to_vec(),
        })?;
    }
    Ok(index.write_tree_to(repo)?)
}

impl VersionedRemote for GitRemote {
    #[instrument(skip(self), fields(remote = %self.remote_name, branch = %self.branch))]
    fn fetch_latest(&self) -> Result<RemoteState, GitError> {
        let repo = self.open()?;
        self.fetch(&repo)?;

        let Some(oid) = Self::resolve_target(&repo, &self.tracking_ref())? else {
            info!("remote branch does not exist yet");
            return Ok(RemoteState::default());
        };
        let commit = repo.find_commit(oid)?;
        let snapshot = tree_snapshot(&repo, &commit.tree()?)?;
        info!(revision = %oid, files = snapshot.len(), "fetched remote");
        Ok(RemoteState {
            revision: Some(RevisionId::new(oid.to_string())),
            snapshot,
        })
    }

    #[instrument(skip(self))]
    fn snapshot_at(&self, revision: &RevisionId) -> Result<Snapshot, GitError> {
        let repo = self.open()?;
        let oid = Oid::from_str(revision.as_str())
            .map_err(|_| GitError::RefNotFound(revision.to_string()))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|_| GitError::RefNotFound(revision.to_string()))?;
        let tree = commit.tree()?;
        let snapshot = tree_snapshot(&repo, &tree)?;
        Ok(snapshot)
    }

    #[instrument(skip(self, snapshot, message), fields(files = snapshot.len()))]
    fn publish(
        &self,
        snapshot: &Snapshot,
        expected_parent: Option<&RevisionId>,
        message: &str,
    ) -> Result<PublishOutcome, GitError> {
        let repo = self.open()?;

        let parent = match expected_parent {
            Some(rev) => {
                let oid = Oid::from_str(rev.as_str())
                    .map_err(|_| GitError::RefNotFound(rev.to_string()))?;
                Some(repo.find_commit(oid)?)
            }
            None => None,
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let tree_oid = write_snapshot_tree(&repo, snapshot)?;
        let tree = repo.find_tree(tree_oid)?;
        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let oid = repo.commit(None, &signature, &signature, message, &tree, &parents)?;
        debug!(sha = %oid, "created commit");

        let local_ref = self.local_ref();
        let previous = Self::resolve_target(&repo, &local_ref)?;
        repo.reference(&local_ref, oid, true, "cmsync: publish")?;

        match self.push_branch(&repo) {
            Ok(()) => {
                info!(sha = %oid, "published");
                Ok(PublishOutcome::Published(RevisionId::new(oid.to_string())))
            }
            Err(err) => {
                self.restore_local_ref(&repo, previous)?;
                if err.is_concurrency_conflict() {
                    warn!(error = %err, "remote moved during publish");
                    Ok(PublishOutcome::Conflict)
                } else {
                    Err(err)
                }
            }
        }
    }

    #[instrument(skip(self))]
    fn record_base(&self, revision: &RevisionId) -> Result<(), GitError> {
        let repo = self.open()?;
        let oid = Oid::from_str(revision.as_str())
            .map_err(|_| GitError::RefNotFound(revision.to_string()))?;
        let commit = repo.find_commit(oid)?;
        let local_ref = self.local_ref();
        repo.reference(&local_ref, oid, true, "cmsync: record base")?;
        repo.set_head(&local_ref)?;
        repo.reset(commit.as_object(), ResetType::Mixed, None)?;
        debug!(sha = %oid, "recorded base");
        Ok(())
    }

    fn base_revision(&self) -> Result<Option<RevisionId>, GitError> {
        let repo = self.open()?;
        let revision = match repo.head() {
            Ok(head) => Some(RevisionId::new(head.peel_to_commit()?.id().to_string())),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(revision)
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
    fn test_repo_not_found() {
        assert!(matches!(
            GitRemote::new("/nonexistent", "origin", "main"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_tree_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let snap = snapshot(&[("index.md", "home\n"), ("posts/a.json", "{\"a\": 1}\n")]);

        let tree_oid = write_snapshot_tree(&repo, &snap).unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        assert_eq!(tree_snapshot(&repo, &tree).unwrap(), snap);
    }

    #[test]
    fn test_snapshot_tree_normalizes_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let snap = snapshot(&[("dos.txt", "a\r\nb\r\n")]);

        let tree = repo
            .find_tree(write_snapshot_tree(&repo, &snap).unwrap())
            .unwrap();
        let read = tree_snapshot(&repo, &tree).unwrap();
        assert_eq!(read.get("dos.txt"), Some(&b"a\nb\n"[..]));
    }

    #[test]
    fn test_rejects_escaping_path() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let snap = snapshot(&[("../outside.txt", "x")]);
        // normalize_path keeps `..` segments, so the tree writer must refuse them.
        assert!(matches!(
            write_snapshot_tree(&repo, &snap),
            Err(GitError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_base_revision_unborn() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let remote = GitRemote::new(dir.path(), "origin", "main").unwrap();
        assert_eq!(remote.base_revision().unwrap(), None);
    }

    #[test]
    fn test_recorded_base_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let snap = snapshot(&[("index.md", "home\n"), ("posts/a.md", "a\n")]);
        let tree = repo
            .find_tree(write_snapshot_tree(&repo, &snap).unwrap())
            .unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let oid = repo.commit(None, &sig, &sig, "initial", &tree, &[]).unwrap();
        let revision = RevisionId::new(oid.to_string());

        let remote = GitRemote::new(dir.path(), "origin", "main").unwrap();
        remote.record_base(&revision).unwrap();
        assert_eq!(remote.base_revision().unwrap(), Some(revision.clone()));
        assert_eq!(remote.snapshot_at(&revision).unwrap(), snap);
        assert!(matches!(
            remote.snapshot_at(&RevisionId::new("not-a-sha")),
            Err(GitError::RefNotFound(_))
        ));
    }
}
