//! Git backend for the source repository
//!
//! Reads a local clone (or mirror) of the content repository with libgit2.
//! [`GitSourceRepository::fetch`] pulls the hosted branches into
//! `refs/remotes/<remote>/*`, and branch tips resolve against those
//! remote-tracking refs first. libgit2 handles are not `Sync`, so every call
//! opens the repository inside a blocking task and drops it before returning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use git2::{
    AutotagOption, BranchType, Commit, Delta, Diff, DiffFindOptions, ErrorCode, FetchOptions, Oid,
    Repository, Sort,
};
use tokio::sync::Mutex;

use super::{BranchRef, CommitDetail, CommitSummary, FileChange, FileStatus, SourceRepository};
use crate::error::{Error, Result};

/// Directories the sync engine cares about
const CONTENT_PREFIXES: &[&str] = &["posts/", "images/"];

/// [`SourceRepository`] over a local git repository
#[derive(Debug, Clone)]
pub struct GitSourceRepository {
    path: PathBuf,
    remote: String,
    full_name: String,
    /// Concurrent fetches would race on the same ref locks
    fetch_lock: Arc<Mutex<()>>,
}

impl GitSourceRepository {
    /// Open the repository at `path`, resolving remote branches against `remote`
    pub fn open(path: impl Into<PathBuf>, remote: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let remote = remote.into();
        let repo = Repository::open(&path)?;
        let full_name = full_name_of(&repo, &remote, &path);

        Ok(Self {
            path,
            remote,
            full_name,
            fetch_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against a freshly opened repository on the blocking pool
    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Repository, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let remote = self.remote.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path)?;
            f(&repo, &remote)
        })
        .await?
    }
}

#[async_trait]
impl SourceRepository for GitSourceRepository {
    async fn fetch(&self) -> Result<()> {
        let _guard = self.fetch_lock.lock().await;
        self.with_repo(|repo, remote| {
            let mut origin = match repo.find_remote(remote) {
                Ok(origin) => origin,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    tracing::debug!(remote, "no remote configured, reading local branches only");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let refspec = format!("+refs/heads/*:refs/remotes/{}/*", remote);
            let mut opts = FetchOptions::new();
            opts.download_tags(AutotagOption::None);
            origin.fetch(&[refspec.as_str()], Some(&mut opts), None)?;

            let stats = origin.stats();
            tracing::debug!(
                remote,
                received_objects = stats.received_objects(),
                "fetched remote branches"
            );
            Ok(())
        })
        .await
    }

    async fn list_branches(&self) -> Result<Vec<BranchRef>> {
        self.with_repo(|repo, remote| {
            let mut names = BTreeSet::new();
            let remote_prefix = format!("{}/", remote);

            for entry in repo.branches(None)? {
                let (branch, kind) = entry?;
                let Some(name) = branch.name()? else {
                    continue;
                };
                match kind {
                    BranchType::Local => {
                        names.insert(name.to_string());
                    }
                    BranchType::Remote => {
                        if let Some(short) = name.strip_prefix(&remote_prefix) {
                            if short != "HEAD" {
                                names.insert(short.to_string());
                            }
                        }
                    }
                }
            }

            Ok(names.into_iter().map(BranchRef::new).collect())
        })
        .await
    }

    async fn get_commits_since(
        &self,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>> {
        let branch = branch.to_string();
        self.with_repo(move |repo, remote| {
            let tip = resolve_branch(repo, remote, &branch)?;

            let mut walk = repo.revwalk()?;
            walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
            walk.push(tip)?;

            let mut commits = Vec::new();
            for oid in walk {
                let commit = repo.find_commit(oid?)?;
                let authored = author_date(&commit)?;
                if since.is_some_and(|since| authored <= since) {
                    continue;
                }
                if touches_content(&diff_commit(repo, &commit)?) {
                    commits.push(summarize(&commit));
                }
            }
            Ok(commits)
        })
        .await
    }

    async fn get_commits_in_range(&self, before: &str, after: &str) -> Result<Vec<CommitSummary>> {
        let before = before.to_string();
        let after = after.to_string();
        self.with_repo(move |repo, _| {
            let mut walk = repo.revwalk()?;
            walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
            walk.push(Oid::from_str(&after)?)?;
            walk.hide(Oid::from_str(&before)?)?;

            walk.map(|oid| -> Result<CommitSummary> { Ok(summarize(&repo.find_commit(oid?)?)) })
                .collect()
        })
        .await
    }

    async fn get_commit(&self, sha: &str) -> Result<CommitDetail> {
        let sha = sha.to_string();
        self.with_repo(move |repo, _| {
            let commit = repo.find_commit(Oid::from_str(&sha)?)?;
            let diff = diff_commit(repo, &commit)?;

            let files = diff
                .deltas()
                .filter_map(|delta| {
                    let old = delta.old_file().path().map(path_string);
                    let new = delta.new_file().path().map(path_string);
                    match (delta.status(), old, new) {
                        (Delta::Added | Delta::Copied, _, Some(new)) => Some(FileChange::added(new)),
                        (Delta::Modified | Delta::Typechange, _, Some(new)) => {
                            Some(FileChange::modified(new))
                        }
                        (Delta::Deleted, Some(old), _) => Some(FileChange::removed(old)),
                        (Delta::Renamed, Some(old), Some(new)) => Some(FileChange::renamed(old, new)),
                        _ => None,
                    }
                })
                .collect();

            Ok(CommitDetail {
                sha: commit.id().to_string(),
                author_date: author_date(&commit)?,
                files,
            })
        })
        .await
    }

    async fn get_file_contents(&self, path: &str, reference: &str) -> Result<Vec<u8>> {
        let path = path.to_string();
        let reference = reference.to_string();
        self.with_repo(move |repo, _| {
            let commit = repo.revparse_single(&reference)?.peel_to_commit()?;
            let tree = commit.tree()?;
            let entry = match tree.get_path(Path::new(&path)) {
                Ok(entry) => entry,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    return Err(Error::FileNotFound { path, reference });
                }
                Err(e) => return Err(e.into()),
            };
            let blob = repo.find_blob(entry.id())?;
            Ok(blob.content().to_vec())
        })
        .await
    }

    async fn get_default_branch_name(&self) -> Result<String> {
        self.with_repo(|repo, remote| {
            let remote_head = format!("refs/remotes/{}/HEAD", remote);
            if let Ok(reference) = repo.find_reference(&remote_head) {
                let prefix = format!("refs/remotes/{}/", remote);
                if let Some(name) = reference
                    .symbolic_target()
                    .and_then(|target| target.strip_prefix(&prefix))
                {
                    return Ok(name.to_string());
                }
            }

            let head = repo.head()?;
            head.shorthand()
                .map(str::to_string)
                .ok_or_else(|| Error::Source {
                    message: "HEAD does not point to a named branch".to_string(),
                    source: None,
                })
        })
        .await
    }

    fn repo_full_name(&self) -> String {
        self.full_name.clone()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Tip of a branch, preferring the remote-tracking ref (what was last
/// fetched) over a local branch of the same name
fn resolve_branch(repo: &Repository, remote: &str, name: &str) -> Result<Oid> {
    let branch = match repo.find_branch(&format!("{}/{}", remote, name), BranchType::Remote) {
        Ok(branch) => branch,
        Err(_) => repo.find_branch(name, BranchType::Local)?,
    };
    Ok(branch.get().peel_to_commit()?.id())
}

/// Diff a commit against its first parent, detecting renames
fn diff_commit<'r>(repo: &'r Repository, commit: &Commit<'_>) -> Result<Diff<'r>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };

    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;
    Ok(diff)
}

fn touches_content(diff: &Diff<'_>) -> bool {
    diff.deltas().any(|delta| {
        [delta.old_file().path(), delta.new_file().path()]
            .into_iter()
            .flatten()
            .map(path_string)
            .any(|p| CONTENT_PREFIXES.iter().any(|prefix| p.starts_with(prefix)))
    })
}

fn author_date(commit: &Commit<'_>) -> Result<DateTime<Utc>> {
    let seconds = commit.author().when().seconds();
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::Source {
            message: format!("commit {} has an invalid author time", commit.id()),
            source: None,
        })
}

fn summarize(commit: &Commit<'_>) -> CommitSummary {
    CommitSummary {
        sha: commit.id().to_string(),
        summary: commit.summary().unwrap_or_default().to_string(),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `owner/name` from the remote URL, falling back to the directory name
fn full_name_of(repo: &Repository, remote: &str, path: &Path) -> String {
    let from_remote = repo
        .find_remote(remote)
        .ok()
        .and_then(|r| r.url().map(str::to_string))
        .and_then(|url| parse_full_name(&url));

    from_remote.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

/// Parse `owner/name` out of https, ssh and scp-style remote URLs
fn parse_full_name(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut parts = trimmed.rsplit(['/', ':']);
    let name = parts.next().filter(|s| !s.is_empty())?;
    let owner = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{}/{}", owner, name))
}
