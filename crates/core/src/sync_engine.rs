//! Pull and push orchestration between a working tree and a versioned remote.
//!
//! The [`SyncEngine`] drives each operation as:
//!
//! 1. Build three snapshots: base (the last agreed revision), local (the
//!    working tree, read in parallel), and remote (freshly fetched).
//! 2. Plan the merge with the [`Planner`].
//! 3. Apply the merged snapshot to the working tree, keeping marker files.
//! 4. For a push, publish the merged snapshot against the fetched revision
//!    and retry from step 1 if the remote moved in the meantime.
//!
//! The base revision is explicit state: callers pass a [`SyncState`] in and
//! get the next one back through [`SyncReport::state`]. A lock flag prevents
//! concurrent operations on one engine.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::classify::normalize_content;
use crate::config::SyncConfig;
use crate::errors::{SyncError, TreeError};
use crate::git::{PublishOutcome, RemoteState, VersionedRemote};
use crate::merge::{MergeKind, MergePlan, Planner};
use crate::models::{ChangeCounts, RevisionId, SyncOutcome, SyncReport, SyncState};
use crate::snapshot::Snapshot;
use crate::worktree::WorkingTree;

/// Reader pool size when the platform cannot report its parallelism.
const FALLBACK_READ_WORKERS: usize = 4;

/// The pull/push engine.
pub struct SyncEngine<R: VersionedRemote, T: WorkingTree> {
    remote: Arc<R>,
    tree: Arc<T>,
    planner: Planner,
    max_push_attempts: u32,
    read_workers: usize,
    /// Atomic flag preventing concurrent operations.
    running: Arc<AtomicBool>,
    /// Start of the current operation, in milliseconds since the epoch.
    op_started_ms: AtomicI64,
}

impl<R: VersionedRemote, T: WorkingTree> SyncEngine<R, T> {
    pub fn new(remote: R, tree: T, config: &SyncConfig) -> Self {
        info!(
            max_push_attempts = config.max_push_attempts,
            read_workers = config.read_workers,
            "initializing sync engine"
        );
        Self {
            remote: Arc::new(remote),
            tree: Arc::new(tree),
            planner: config.planner(),
            max_push_attempts: config.max_push_attempts.max(1),
            read_workers: config.read_workers,
            running: Arc::new(AtomicBool::new(false)),
            op_started_ms: AtomicI64::new(0),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// Check if an operation is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The state recorded by the remote, for callers that do not keep their
    /// own.
    pub async fn recorded_state(&self) -> Result<SyncState, SyncError> {
        let remote = self.remote.clone();
        let revision = run_blocking(move || Ok(remote.base_revision()?)).await?;
        Ok(SyncState::at(revision))
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Bring remote changes into the working tree.
    ///
    /// Local edits are kept and merged; the new base is the fetched remote
    /// revision.
    pub async fn pull(&self, state: &SyncState) -> Result<SyncReport, SyncError> {
        let _guard = self.acquire()?;
        let started_at = Utc::now();
        info!(base = ?state.base_revision, "pull started");

        let remote = self.fetch_remote().await?;
        let local = self.read_local().await?;

        if remote.revision == state.base_revision {
            info!("already up to date");
            return Ok(SyncReport::new(SyncOutcome::UpToDate, started_at)
                .finish(state.base_revision.clone()));
        }

        let base = self.read_base(state).await?;
        let plan = self.planner.plan(&base, &local, &remote.snapshot);
        let changes = ChangeCounts::between(&local, &plan.merged);

        if plan.merged != local {
            self.apply_to_tree(&plan.merged).await?;
        }
        if let Some(revision) = &remote.revision {
            self.record_base(revision).await?;
        }

        let mut report = SyncReport::new(SyncOutcome::Pulled, started_at);
        report.record_plan(&plan, changes);
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            merged = report.merged,
            conflicts = report.conflicts_auto_resolved,
            "pull completed"
        );
        Ok(report.finish(remote.revision))
    }

    /// Publish local edits, merging in whatever the remote gained since the
    /// base. Retries while the remote keeps moving, up to the configured
    /// attempt ceiling.
    pub async fn push(&self, state: &SyncState) -> Result<SyncReport, SyncError> {
        let _guard = self.acquire()?;
        let started_at = Utc::now();
        info!(base = ?state.base_revision, "push started");

        let local = self.read_local().await?;
        let base = self.read_base(state).await?;

        if local == base {
            info!("no local changes to push");
            return Ok(SyncReport::new(SyncOutcome::NoChanges, started_at)
                .finish(state.base_revision.clone()));
        }

        for attempt in 1..=self.max_push_attempts {
            let remote = self.fetch_remote().await?;
            let plan = self.planner.plan(&base, &local, &remote.snapshot);

            if plan.merged != local {
                self.apply_to_tree(&plan.merged).await?;
            }

            if plan.merged == remote.snapshot {
                info!(attempt, "remote already has every local change");
                if let Some(revision) = &remote.revision {
                    self.record_base(revision).await?;
                }
                let mut report = SyncReport::new(SyncOutcome::UpToDate, started_at);
                report.record_plan(&plan, ChangeCounts::default());
                report.retries = attempt - 1;
                return Ok(report.finish(remote.revision));
            }

            let changes = ChangeCounts::between(&remote.snapshot, &plan.merged);
            let message = commit_message(&plan, changes, Utc::now());

            match self.publish(&plan.merged, remote.revision.clone(), message).await? {
                PublishOutcome::Published(revision) => {
                    self.record_base(&revision).await?;
                    let mut report = SyncReport::new(SyncOutcome::Pushed, started_at);
                    report.record_plan(&plan, changes);
                    report.retries = attempt - 1;
                    info!(
                        revision = %revision,
                        attempt,
                        files = changes.total(),
                        "push completed"
                    );
                    return Ok(report.finish(Some(revision)));
                }
                PublishOutcome::Conflict => {
                    warn!(
                        attempt,
                        max_attempts = self.max_push_attempts,
                        "remote changed during push, retrying"
                    );
                }
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts: self.max_push_attempts,
        })
    }

    /// Plan a sync without touching the working tree or the remote.
    pub async fn preview(&self, state: &SyncState) -> Result<MergePlan, SyncError> {
        let _guard = self.acquire()?;
        let remote = self.fetch_remote().await?;
        let local = self.read_local().await?;
        let base = self.read_base(state).await?;
        let plan = self.planner.plan(&base, &local, &remote.snapshot);
        debug!(
            actions = plan.actions.len(),
            merges = plan.count(MergeKind::Merge),
            "preview planned"
        );
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn acquire(&self) -> Result<SyncLockGuard<'_>, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Zero until the holder has stored its start time.
            let started_ms = self.op_started_ms.load(Ordering::SeqCst);
            let started_at = DateTime::from_timestamp_millis(started_ms)
                .filter(|_| started_ms > 0)
                .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
            return Err(SyncError::AlreadyRunning { started_at });
        }
        self.op_started_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        // Cleared on drop, even if the operation panics.
        Ok(SyncLockGuard {
            running: self.running.clone(),
            started_ms: &self.op_started_ms,
        })
    }

    fn worker_count(&self, files: usize) -> usize {
        let configured = if self.read_workers > 0 {
            self.read_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_READ_WORKERS)
        };
        configured.min(files).max(1)
    }

    async fn fetch_remote(&self) -> Result<RemoteState, SyncError> {
        let remote = self.remote.clone();
        run_blocking(move || Ok(remote.fetch_latest()?)).await
    }

    async fn read_base(&self, state: &SyncState) -> Result<Snapshot, SyncError> {
        let Some(revision) = state.base_revision.clone() else {
            return Ok(Snapshot::empty());
        };
        let remote = self.remote.clone();
        run_blocking(move || Ok(remote.snapshot_at(&revision)?)).await
    }

    /// Read every content file, fanning the reads out over a pool of
    /// blocking workers.
    async fn read_local(&self) -> Result<Snapshot, SyncError> {
        let tree = self.tree.clone();
        let files = run_blocking(move || tree.list_files().map_err(SyncError::Read)).await?;
        if files.is_empty() {
            return Ok(Snapshot::empty());
        }

        let workers = self.worker_count(files.len());
        let chunk_size = files.len().div_ceil(workers);
        debug!(files = files.len(), workers, "reading working tree");

        let mut set = JoinSet::new();
        for chunk in files.chunks(chunk_size) {
            let tree = self.tree.clone();
            let chunk = chunk.to_vec();
            set.spawn_blocking(move || -> Result<Vec<(String, Vec<u8>)>, TreeError> {
                chunk
                    .into_iter()
                    .map(|path| -> Result<(String, Vec<u8>), TreeError> {
                        let content = tree.read_file(&path)?;
                        Ok((path, normalize_content(content)))
                    })
                    .collect()
            });
        }

        let mut builder = Snapshot::builder();
        while let Some(joined) = set.join_next().await {
            let files = joined
                .map_err(|e| SyncError::TaskFailed(e.to_string()))?
                .map_err(SyncError::Read)?;
            for (path, content) in files {
                builder.insert(&path, content);
            }
        }
        Ok(builder.build())
    }

    /// Replace the working tree with `merged`, saving marker files first and
    /// writing them back afterwards.
    async fn apply_to_tree(&self, merged: &Snapshot) -> Result<(), SyncError> {
        let tree = self.tree.clone();
        let merged = merged.clone();
        run_blocking(move || {
            let markers = tree.save_markers().map_err(SyncError::Read)?;
            let reset = tree.reset(&merged).map_err(|err| {
                warn!(path = err.path(), error = %err, "apply stopped part-way");
                SyncError::Apply(err)
            });
            // Markers go back even when the reset stopped part-way.
            let restored = tree.restore_markers(&markers).map_err(SyncError::Apply);
            reset.and(restored)
        })
        .await
    }

    async fn publish(
        &self,
        merged: &Snapshot,
        parent: Option<RevisionId>,
        message: String,
    ) -> Result<PublishOutcome, SyncError> {
        let remote = self.remote.clone();
        let merged = merged.clone();
        run_blocking(move || Ok(remote.publish(&merged, parent.as_ref(), &message)?)).await
    }

    async fn record_base(&self, revision: &RevisionId) -> Result<(), SyncError> {
        let remote = self.remote.clone();
        let revision = revision.clone();
        run_blocking(move || Ok(remote.record_base(&revision)?)).await
    }
}

/// RAII guard that clears the running flag and start time on drop.
struct SyncLockGuard<'a> {
    running: Arc<AtomicBool>,
    started_ms: &'a AtomicI64,
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        self.started_ms.store(0, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Run blocking collaborator work off the async runtime.
async fn run_blocking<F, O>(f: F) -> Result<O, SyncError>
where
    F: FnOnce() -> Result<O, SyncError> + Send + 'static,
    O: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?
}

/// Message recorded on a published revision.
fn commit_message(plan: &MergePlan, changes: ChangeCounts, at: DateTime<Utc>) -> String {
    format!(
        "cmsync: push {} file(s) ({} created, {} updated, {} deleted, {} merged)\n\nSynced-At: {}",
        changes.total(),
        changes.created,
        changes.updated,
        changes.deleted,
        plan.count(MergeKind::Merge),
        at.to_rfc3339()
    )
}
