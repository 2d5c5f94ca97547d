//! Commit change analysis
//!
//! Folds the file changes of a batch of commits, oldest first, into the
//! smallest set of work: which paths to (re)process and which to remove.
//!
//! Per path the fold keeps two commits. `commit` is the first commit in the
//! batch that wrote the path and supplies the creation time of a new post.
//! `head` is the last one and is where the content is read from, so the
//! stored bytes always match the batch's final state.
//!
//! | status           | effect                                                   |
//! |------------------|----------------------------------------------------------|
//! | added / modified | upsert path, drop it from removals                       |
//! | removed          | drop path from upserts, add it to removals               |
//! | renamed          | remove the old path, upsert the new one                  |
//!
//! A rename that keeps the content's identity (same post ID) is a move, not a
//! removal, so the old path is cleared from removals again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::content::paths::{self, ContentKind};
use crate::error::Result;
use crate::source::{CommitDetail, CommitSummary, FileChange, FileStatus, SourceRepository};

/// A path scheduled for processing
#[derive(Debug, Clone)]
pub struct PendingFile {
    /// First commit in the batch that wrote the path
    pub commit: Arc<CommitDetail>,
    /// Last commit in the batch that wrote the path
    pub head: Arc<CommitDetail>,
}

impl PendingFile {
    fn new(commit: &Arc<CommitDetail>) -> Self {
        Self {
            commit: Arc::clone(commit),
            head: Arc::clone(commit),
        }
    }

    /// Reference the file bytes are read at
    pub fn content_ref(&self) -> &str {
        &self.head.sha
    }

    /// Creation time for content not stored yet
    pub fn created_at(&self) -> DateTime<Utc> {
        self.commit.author_date
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.head.author_date
    }
}

/// Upserts and removals for one kind of content
#[derive(Debug, Clone, Default)]
pub struct KindChanges {
    pub upserts: BTreeMap<String, PendingFile>,
    pub removals: BTreeSet<String>,
}

impl KindChanges {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    fn upsert(&mut self, path: &str, commit: &Arc<CommitDetail>) {
        self.removals.remove(path);
        self.upserts
            .entry(path.to_string())
            .and_modify(|pending| pending.head = Arc::clone(commit))
            .or_insert_with(|| PendingFile::new(commit));
    }

    fn remove(&mut self, path: &str) {
        self.upserts.remove(path);
        self.removals.insert(path.to_string());
    }
}

/// Result of analyzing a batch of commits
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub posts: KindChanges,
    pub images: KindChanges,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.images.is_empty()
    }

    fn kind_mut(&mut self, kind: ContentKind) -> &mut KindChanges {
        match kind {
            ContentKind::Post => &mut self.posts,
            ContentKind::Image => &mut self.images,
        }
    }

    /// Fold one file change into the set. Unclassified paths are ignored.
    pub fn apply(&mut self, change: &FileChange, commit: &Arc<CommitDetail>) {
        let current = ContentKind::classify(&change.path);

        match change.status {
            FileStatus::Added | FileStatus::Modified => {
                if let Some(kind) = current {
                    self.kind_mut(kind).upsert(&change.path, commit);
                }
            }
            FileStatus::Removed => {
                if let Some(kind) = current {
                    self.kind_mut(kind).remove(&change.path);
                }
            }
            FileStatus::Renamed => {
                let previous = change
                    .previous_path
                    .as_deref()
                    .and_then(|p| ContentKind::classify(p).map(|kind| (p, kind)));

                if let Some((from, kind)) = previous {
                    self.kind_mut(kind).remove(from);
                }

                if let Some(kind) = current {
                    let changes = self.kind_mut(kind);
                    changes.upsert(&change.path, commit);

                    if let Some((from, from_kind)) = previous {
                        if from_kind == kind && kind.identity(from) == kind.identity(&change.path)
                        {
                            changes.removals.remove(from);
                        }
                    }
                }
            }
        }
    }

    /// Post IDs to unpublish.
    ///
    /// A removed path whose ID is still written elsewhere in the batch
    /// (`001-a.md` deleted, `001-b.md` added) is not a removal of the post.
    pub fn post_removals(&self) -> BTreeSet<String> {
        let kept: BTreeSet<&str> = self
            .posts
            .upserts
            .keys()
            .filter_map(|p| paths::extract_post_id(p))
            .collect();

        self.posts
            .removals
            .iter()
            .filter_map(|p| paths::extract_post_id(p))
            .filter(|id| !kept.contains(id))
            .map(str::to_string)
            .collect()
    }
}

/// Resolve each commit and fold its changes, in order.
///
/// Any failure resolving a commit aborts the whole analysis.
pub async fn analyze_commits(
    source: &dyn SourceRepository,
    commits: &[CommitSummary],
) -> Result<ChangeSet> {
    let mut changes = ChangeSet::default();

    for summary in commits {
        let detail = Arc::new(source.get_commit(&summary.sha).await?);
        for file in &detail.files {
            changes.apply(file, &detail);
        }
    }

    tracing::debug!(
        commits = commits.len(),
        posts = changes.posts.upserts.len(),
        post_removals = changes.posts.removals.len(),
        images = changes.images.upserts.len(),
        image_removals = changes.images.removals.len(),
        "analyzed commits"
    );
    Ok(changes)
}
