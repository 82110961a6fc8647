//! The versioned remote side of a sync.
//!
//! [`VersionedRemote`] is the boundary the engine talks to; [`GitRemote`]
//! implements it on top of a local Git clone and its upstream.

pub mod client;

pub use client::GitRemote;

use crate::errors::GitError;
use crate::models::RevisionId;
use crate::snapshot::Snapshot;

/// The latest state of the remote branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    /// `None` while the branch has never been published.
    pub revision: Option<RevisionId>,
    pub snapshot: Snapshot,
}

/// What happened to a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The remote accepted the new revision.
    Published(RevisionId),
    /// The remote moved past the expected parent; nothing was published.
    Conflict,
}

/// A remote, versioned copy of the content tree. Implementations are
/// blocking; the engine runs them on the blocking thread pool.
pub trait VersionedRemote: Send + Sync + 'static {
    /// Fetch and return the newest revision and its content.
    fn fetch_latest(&self) -> Result<RemoteState, GitError>;

    /// Content of a known revision.
    fn snapshot_at(&self, revision: &RevisionId) -> Result<Snapshot, GitError>;

    /// Publish `snapshot` as the child of `expected_parent`. Compare-and-swap:
    /// if the remote is no longer at `expected_parent` the result is
    /// [`PublishOutcome::Conflict`] and the remote is unchanged.
    fn publish(
        &self,
        snapshot: &Snapshot,
        expected_parent: Option<&RevisionId>,
        message: &str,
    ) -> Result<PublishOutcome, GitError>;

    /// Durably record `revision` as the agreed base.
    fn record_base(&self, revision: &RevisionId) -> Result<(), GitError>;

    /// The base recorded by the last successful sync, if any.
    fn base_revision(&self) -> Result<Option<RevisionId>, GitError>;
}
