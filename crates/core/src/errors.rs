//! Error types for the cmsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the versioned remote (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected by the remote.
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// A snapshot path cannot be stored in a git tree.
    #[error("invalid path for git tree: '{0}'")]
    InvalidPath(String),
}

impl GitError {
    /// `true` when the error means the remote branch advanced underneath us
    /// (a non-fast-forward rejection) rather than a hard failure.
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            Self::Git2Error(e) => e.code() == git2::ErrorCode::NotFastForward,
            Self::PushRejected { detail, .. } => {
                let detail = detail.to_ascii_lowercase();
                detail.contains("fast-forward")
                    || detail.contains("fastforward")
                    || detail.contains("fast forward")
                    || detail.contains("fetch first")
                    || detail.contains("stale")
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Working tree errors
// ---------------------------------------------------------------------------

/// Errors from the local working tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The working tree root does not exist or is not a directory.
    #[error("working tree not found at '{0}'")]
    RootNotFound(String),

    /// Reading a file failed.
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a file (or creating its parent directory) failed.
    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Removing a file failed.
    #[error("failed to remove '{path}': {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Walking the directory tree failed.
    #[error("failed to walk '{path}': {source}")]
    Walk {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TreeError {
    /// The path the failing operation was working on.
    pub fn path(&self) -> &str {
        match self {
            Self::RootNotFound(path) => path,
            Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Remove { path, .. }
            | Self::Walk { path, .. } => path,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the content mergers. These never abort a sync: the planner
/// recovers from them by falling back to a line merge.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A structured document could not be parsed.
    #[error("failed to parse {side} version of '{path}' as a JSON object: {detail}")]
    ParseFailed {
        path: String,
        side: &'static str,
        detail: String,
    },

    /// Content that must be text was not valid UTF-8.
    #[error("{side} version of '{path}' is not valid UTF-8")]
    NotUtf8 { path: String, side: &'static str },

    /// Serializing a merged document failed.
    #[error("failed to serialize merged '{path}': {detail}")]
    SerializeFailed { path: String, detail: String },
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the pull/push orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync operation is already running on this engine.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning { started_at: String },

    /// Every publish attempt was rejected because the remote kept moving.
    #[error("push failed after {attempts} attempts: remote kept changing")]
    RetriesExhausted { attempts: u32 },

    /// The versioned remote failed (fetch, read, or a non-conflict publish
    /// failure).
    #[error("remote error: {0}")]
    Remote(#[from] GitError),

    /// Reading the local tree failed. Nothing was written.
    #[error("failed to read local tree: {0}")]
    Read(#[source] TreeError),

    /// Writing the merged result to disk failed part-way. The working tree
    /// may no longer match the recorded base.
    #[error("failed to apply merge result: {0}")]
    Apply(#[source] TreeError),

    /// A background reader task failed to complete.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// `true` when the working tree may have been partially updated.
    pub fn is_partial_apply(&self) -> bool {
        matches!(self, Self::Apply(_))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = SyncError::RetriesExhausted { attempts: 5 };
        assert_eq!(
            err.to_string(),
            "push failed after 5 attempts: remote kept changing"
        );

        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = ConfigError::InvalidValue {
            field: "sync.max_push_attempts".into(),
            detail: "must be at least 1".into(),
        };
        assert!(err.to_string().contains("sync.max_push_attempts"));
    }

    #[test]
    fn test_apply_error_is_partial() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SyncError::Apply(TreeError::Write {
            path: "pages/home.json".into(),
            source: io,
        });
        assert!(err.is_partial_apply());
        assert!(err.to_string().contains("pages/home.json"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = SyncError::Read(TreeError::Read {
            path: "a.txt".into(),
            source: io,
        });
        assert!(!err.is_partial_apply());
    }

    #[test]
    fn test_push_rejection_classification() {
        let err = GitError::PushRejected {
            branch: "main".into(),
            detail: "cannot push non-fastforwardable reference".into(),
        };
        assert!(err.is_concurrency_conflict());

        let err = GitError::PushRejected {
            branch: "main".into(),
            detail: "rejected: non-fast-forward".into(),
        };
        assert!(err.is_concurrency_conflict());

        let err = GitError::PushRejected {
            branch: "main".into(),
            detail: "pre-receive hook declined".into(),
        };
        assert!(!err.is_concurrency_conflict());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = SyncError::RetriesExhausted { attempts: 1 }.into();
        assert!(matches!(core_err, CoreError::Sync(_)));

        let core_err: CoreError = GitError::RefNotFound("refs/heads/x".into()).into();
        assert!(matches!(core_err, CoreError::Git(_)));
    }
}
