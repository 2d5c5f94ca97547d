//! Source repository access
//!
//! The sync engine reads the content repository through [`SourceRepository`]:
//! branches, commit listings, per-commit changelists and file bytes at an
//! exact commit. [`GitSourceRepository`] implements it over a local clone.
//!
//! # Ordering Contract
//!
//! Commit listings are returned **oldest first**. The change analyzer keeps the
//! first commit that touched a path as its representative, so this ordering is
//! what makes a new post's `created_at` the time it was first authored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

mod git;

pub use git::GitSourceRepository;

/// SHA git uses for "no commit" in push events (branch creation/deletion)
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// A branch in the source repository
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BranchRef {
    pub name: String,
}

impl BranchRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Fully-qualified ref, as carried by push events
    pub fn full_ref(&self) -> String {
        format!("refs/heads/{}", self.name)
    }

    pub fn is_main(&self, main_branch: &str) -> bool {
        self.name == main_branch
    }
}

/// A commit as returned by listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub summary: String,
}

impl CommitSummary {
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            summary: String::new(),
        }
    }
}

/// Status of a single file within a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// A file-level change within a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Current path (the old path for removals)
    pub path: String,
    /// Path before a rename
    pub previous_path: Option<String>,
    pub status: FileStatus,
}

impl FileChange {
    pub fn added(path: impl Into<String>) -> Self {
        Self::plain(path, FileStatus::Added)
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self::plain(path, FileStatus::Modified)
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self::plain(path, FileStatus::Removed)
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            path: to.into(),
            previous_path: Some(from.into()),
            status: FileStatus::Renamed,
        }
    }

    fn plain(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            previous_path: None,
            status,
        }
    }
}

/// A commit resolved to its full changelist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetail {
    pub sha: String,
    pub author_date: DateTime<Utc>,
    pub files: Vec<FileChange>,
}

/// Read access to the content repository
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Bring the view of the hosted repository up to date. Sources without
    /// a remote treat this as a no-op.
    async fn fetch(&self) -> Result<()>;

    /// All branches in the repository
    async fn list_branches(&self) -> Result<Vec<BranchRef>>;

    /// Commits on `branch` authored after `since` that touch content paths.
    /// `None` means the whole history.
    async fn get_commits_since(
        &self,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>>;

    /// Commits reachable from `after` but not from `before`
    async fn get_commits_in_range(&self, before: &str, after: &str) -> Result<Vec<CommitSummary>>;

    /// Resolve a commit to its changelist
    async fn get_commit(&self, sha: &str) -> Result<CommitDetail>;

    /// Bytes of `path` as of `reference` (a SHA or branch name)
    async fn get_file_contents(&self, path: &str, reference: &str) -> Result<Vec<u8>>;

    async fn get_default_branch_name(&self) -> Result<String>;

    /// `owner/name` of the repository
    fn repo_full_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_ref() {
        let branch = BranchRef::new("main");
        assert_eq!(branch.full_ref(), "refs/heads/main");
        assert!(branch.is_main("main"));
        assert!(!BranchRef::new("draft").is_main("main"));
    }
}
