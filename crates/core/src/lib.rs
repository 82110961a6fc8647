//! cmsync core library.
//!
//! This crate provides the three-way merge and optimistic-concurrency sync
//! engine behind `cmsync`: content snapshots, classification, line and
//! structured merging, per-path planning, and the pull/push orchestrator,
//! plus the working-tree and Git collaborators it runs against.

pub mod classify;
pub mod config;
pub mod errors;
pub mod git;
pub mod merge;
pub mod models;
pub mod snapshot;
pub mod sync_engine;
pub mod worktree;

// Re-exports for convenience.
pub use config::CmsyncConfig;
pub use git::{GitRemote, VersionedRemote};
pub use merge::{MergePlan, Planner};
pub use models::{SyncOutcome, SyncReport, SyncState};
pub use snapshot::Snapshot;
pub use sync_engine::SyncEngine;
pub use worktree::{FsWorkingTree, WorkingTree};
