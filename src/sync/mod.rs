//! Sync engine
//!
//! Turns repository history into store mutations. Two entry points:
//!
//! - [`SyncService::sync_repository_changes`] catches up on everything
//!   authored since the store's high-water mark, one branch at a time, with
//!   the main branch last so its publish state wins.
//! - [`SyncService::handle_push_event`] analyzes one pushed commit range and
//!   dispatches every file as an independent background task, then returns.
//!
//! ```text
//! commits ──► analyzer ──► ChangeSet ──► WorkItem* ──► worker ──► ContentStore
//!                                          │
//!                     push: TaskTracker + Semaphore, catch-up: serial
//! ```
//!
//! Only the main branch publishes, and only the main branch removes:
//! deleting a file on a feature branch says nothing about what is live.

pub mod analyzer;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::content::MarkdownRenderer;
use crate::error::{Error, Result};
use crate::source::{BranchRef, CommitSummary, SourceRepository, ZERO_SHA};
use crate::storage::ContentStore;

pub use analyzer::{analyze_commits, ChangeSet, KindChanges, PendingFile};
pub use worker::{WorkOutcome, WorkerContext};

/// A push notification, reduced to what the engine needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub before: String,
    pub after: String,
    /// Fully-qualified ref, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub reference: String,
    /// `owner/name` of the pushed repository
    pub repository: String,
}

/// What a push handler handed off to background work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub main_branch: bool,
    pub upserts: usize,
    pub removals: usize,
}

/// Outcome of a catch-up sync
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub since: Option<DateTime<Utc>>,
    pub branches: usize,
    pub failed_branches: Vec<String>,
    pub saved: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, result: &Result<WorkOutcome>) {
        match result {
            Ok(WorkOutcome::Saved | WorkOutcome::Published) => self.saved += 1,
            Ok(WorkOutcome::Unchanged) => self.unchanged += 1,
            Ok(WorkOutcome::Unpublished | WorkOutcome::Removed) => self.removed += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// A single scheduled unit of work
#[derive(Debug)]
enum WorkItem {
    Post {
        path: String,
        pending: PendingFile,
        publish: bool,
    },
    Image {
        path: String,
        pending: PendingFile,
    },
    Unpublish {
        id: String,
    },
    RemoveImage {
        path: String,
    },
}

impl WorkItem {
    fn target(&self) -> &str {
        match self {
            WorkItem::Post { path, .. }
            | WorkItem::Image { path, .. }
            | WorkItem::RemoveImage { path } => path,
            WorkItem::Unpublish { id } => id,
        }
    }

    async fn run(self, ctx: &WorkerContext) -> Result<WorkOutcome> {
        match self {
            WorkItem::Post {
                path,
                pending,
                publish,
            } => worker::process_post(ctx, &path, &pending, publish).await,
            WorkItem::Image { path, pending } => worker::process_image(ctx, &path, &pending).await,
            WorkItem::Unpublish { id } => worker::unpublish_post(ctx, &id).await,
            WorkItem::RemoveImage { path } => worker::remove_image(ctx, &path).await,
        }
    }
}

/// Turn an analyzed batch into work. Removals only apply on the main branch.
fn plan(changes: ChangeSet, main_branch: bool) -> Vec<WorkItem> {
    let mut items = Vec::new();

    if main_branch {
        items.extend(
            changes
                .post_removals()
                .into_iter()
                .map(|id| WorkItem::Unpublish { id }),
        );
        items.extend(
            changes
                .images
                .removals
                .iter()
                .cloned()
                .map(|path| WorkItem::RemoveImage { path }),
        );
    }

    items.extend(
        changes
            .posts
            .upserts
            .into_iter()
            .map(|(path, pending)| WorkItem::Post {
                path,
                pending,
                publish: main_branch,
            }),
    );
    items.extend(
        changes
            .images
            .upserts
            .into_iter()
            .map(|(path, pending)| WorkItem::Image { path, pending }),
    );

    items
}

fn tally(items: &[WorkItem]) -> (usize, usize) {
    items.iter().fold((0, 0), |(upserts, removals), item| match item {
        WorkItem::Post { .. } | WorkItem::Image { .. } => (upserts + 1, removals),
        WorkItem::Unpublish { .. } | WorkItem::RemoveImage { .. } => (upserts, removals + 1),
    })
}

/// Branch-aware sync orchestrator.
///
/// Owns the cancellation token and the set of background tasks spawned for
/// push events. Call [`SyncService::close`] before dropping it to drain them.
#[derive(Debug)]
pub struct SyncService {
    ctx: WorkerContext,
    main_branch: String,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn SourceRepository>,
        store: Arc<dyn ContentStore>,
        renderer: Arc<dyn MarkdownRenderer>,
        main_branch: impl Into<String>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                source,
                store,
                renderer,
                cancel: CancellationToken::new(),
            },
            main_branch: main_branch.into(),
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    pub fn source(&self) -> &Arc<dyn SourceRepository> {
        &self.ctx.source
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.ctx.store
    }

    /// True if `reference` (`refs/heads/x` or plain `x`) is the main branch
    pub fn is_main_ref(&self, reference: &str) -> bool {
        reference.strip_prefix("refs/heads/").unwrap_or(reference) == self.main_branch
    }

    /// Number of background tasks still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Catch up on every branch since the store's high-water mark.
    ///
    /// Fetches first; if the remote is unreachable the sync carries on with
    /// the branches already fetched. A branch that fails is logged and
    /// skipped; failing to read the high-water mark or the branch list fails
    /// the whole sync.
    pub async fn sync_repository_changes(&self) -> Result<SyncReport> {
        if self.ctx.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        if let Err(e) = self.ctx.source.fetch().await {
            tracing::warn!(error = %e, "fetch failed, syncing from local refs");
        }

        let since = self.ctx.store.latest_updated_time().await?;
        let mut branches = self.ctx.source.list_branches().await?;
        // Main last, so its publish/unpublish decisions are final
        branches.sort_by_key(|b| b.is_main(&self.main_branch));

        let mut report = SyncReport {
            since,
            branches: branches.len(),
            ..SyncReport::default()
        };

        tracing::info!(
            branches = branches.len(),
            since = ?since,
            "starting catch-up sync"
        );

        for branch in &branches {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!("catch-up sync interrupted by shutdown");
                break;
            }
            if let Err(e) = self.sync_branch(branch, since, &mut report).await {
                tracing::error!(branch = %branch.name, error = %e, "branch sync failed");
                report.failed_branches.push(branch.name.clone());
            }
        }

        tracing::info!(
            saved = report.saved,
            unchanged = report.unchanged,
            removed = report.removed,
            failed = report.failed,
            failed_branches = report.failed_branches.len(),
            "catch-up sync finished"
        );
        Ok(report)
    }

    async fn sync_branch(
        &self,
        branch: &BranchRef,
        since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let commits = self
            .ctx
            .source
            .get_commits_since(&branch.name, since)
            .await?;
        if commits.is_empty() {
            tracing::debug!(branch = %branch.name, "branch up to date");
            return Ok(());
        }

        let changes = analyze_commits(self.ctx.source.as_ref(), &commits).await?;
        let main = branch.is_main(&self.main_branch);
        tracing::info!(branch = %branch.name, commits = commits.len(), main, "syncing branch");

        for item in plan(changes, main) {
            let target = item.target().to_string();
            let result = item.run(&self.ctx).await;
            if let Err(e) = &result {
                if e.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                tracing::error!(branch = %branch.name, item = %target, error = %e, "content sync failed");
            }
            report.record(&result);
        }
        Ok(())
    }

    /// Analyze a pushed range and hand every file to a background task.
    ///
    /// Returns once work is dispatched; the work itself runs under the
    /// service's own cancellation token, not the caller's request.
    pub async fn handle_push_event(&self, event: &PushEvent) -> Result<Dispatch> {
        if self.ctx.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        if event.after == ZERO_SHA {
            tracing::info!(reference = %event.reference, "branch deleted, nothing to sync");
            return Ok(Dispatch::default());
        }

        // The pushed commits exist only upstream until fetched
        self.ctx.source.fetch().await?;

        let commits = if event.before.is_empty() || event.before == ZERO_SHA {
            vec![CommitSummary::new(event.after.clone())]
        } else {
            self.ctx
                .source
                .get_commits_in_range(&event.before, &event.after)
                .await?
        };

        let changes = analyze_commits(self.ctx.source.as_ref(), &commits).await?;
        let main_branch = self.is_main_ref(&event.reference);
        let items = plan(changes, main_branch);
        let (upserts, removals) = tally(&items);

        for item in items {
            self.dispatch(item);
        }

        tracing::info!(
            reference = %event.reference,
            commits = commits.len(),
            upserts,
            removals,
            main_branch,
            "push dispatched"
        );
        Ok(Dispatch {
            main_branch,
            upserts,
            removals,
        })
    }

    fn dispatch(&self, item: WorkItem) {
        let ctx = self.ctx.clone();
        let limiter = Arc::clone(&self.limiter);

        self.tracker.spawn(async move {
            let target = item.target().to_string();
            let _permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    tracing::debug!(item = %target, "work cancelled before start");
                    return;
                }
                permit = limiter.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            match item.run(&ctx).await {
                Ok(outcome) => tracing::debug!(item = %target, ?outcome, "work finished"),
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(item = %target, "work cancelled")
                }
                Err(e) => tracing::error!(item = %target, error = %e, "content worker failed"),
            }
        });
    }

    /// Wait for all dispatched work to finish without cancelling it
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel outstanding work and wait until every task has exited
    pub async fn close(&self) {
        self.ctx.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("sync service stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }
}
