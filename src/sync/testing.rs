//! In-memory source and store used by the sync tests

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::content::{Image, Post};
use crate::error::{Error, Result};
use crate::source::{BranchRef, CommitDetail, CommitSummary, FileChange, SourceRepository};
use crate::storage::ContentStore;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Scripted repository: commits are recorded in push order, one minute apart
#[derive(Debug, Default)]
pub struct FakeSource {
    history: Vec<(String, CommitDetail)>,
    contents: HashMap<(String, String), Vec<u8>>,
    failing_branches: HashSet<String>,
    failing_commits: HashSet<String>,
    failing_fetch: bool,
    remote_fetches: AtomicUsize,
    file_fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, branch: &str, sha: &str, files: Vec<FileChange>) -> &mut Self {
        let author_date = base_time() + Duration::minutes(self.history.len() as i64);
        self.history.push((
            branch.to_string(),
            CommitDetail {
                sha: sha.to_string(),
                author_date,
                files,
            },
        ));
        self
    }

    pub fn content(&mut self, path: &str, sha: &str, body: &str) -> &mut Self {
        self.contents
            .insert((path.to_string(), sha.to_string()), body.as_bytes().to_vec());
        self
    }

    pub fn fail_branch(&mut self, branch: &str) -> &mut Self {
        self.failing_branches.insert(branch.to_string());
        self
    }

    pub fn fail_commit(&mut self, sha: &str) -> &mut Self {
        self.failing_commits.insert(sha.to_string());
        self
    }

    pub fn fail_fetch(&mut self) -> &mut Self {
        self.failing_fetch = true;
        self
    }

    pub fn author_date(&self, sha: &str) -> DateTime<Utc> {
        self.find(sha).unwrap().author_date
    }

    pub fn remote_fetches(&self) -> usize {
        self.remote_fetches.load(Ordering::SeqCst)
    }

    pub fn file_fetches(&self) -> usize {
        self.file_fetches.load(Ordering::SeqCst)
    }

    fn find(&self, sha: &str) -> Option<&CommitDetail> {
        self.history
            .iter()
            .map(|(_, c)| c)
            .find(|c| c.sha == sha)
    }

    fn position(&self, sha: &str) -> Option<usize> {
        self.history.iter().position(|(_, c)| c.sha == sha)
    }
}

fn unavailable(what: &str) -> Error {
    Error::Source {
        message: format!("{} unavailable", what),
        source: None,
    }
}

#[async_trait]
impl SourceRepository for FakeSource {
    async fn fetch(&self) -> Result<()> {
        self.remote_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_fetch {
            return Err(unavailable("remote"));
        }
        Ok(())
    }

    async fn list_branches(&self) -> Result<Vec<BranchRef>> {
        let names: BTreeSet<&str> = self.history.iter().map(|(b, _)| b.as_str()).collect();
        Ok(names.into_iter().map(BranchRef::new).collect())
    }

    async fn get_commits_since(
        &self,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>> {
        if self.failing_branches.contains(branch) {
            return Err(unavailable(branch));
        }
        Ok(self
            .history
            .iter()
            .filter(|(b, c)| b == branch && since.map_or(true, |s| c.author_date > s))
            .map(|(_, c)| CommitSummary::new(c.sha.clone()))
            .collect())
    }

    async fn get_commits_in_range(&self, before: &str, after: &str) -> Result<Vec<CommitSummary>> {
        let end = self.position(after).ok_or_else(|| unavailable(after))?;
        let start = self.position(before).map_or(0, |i| i + 1);
        Ok(self.history[start..=end]
            .iter()
            .map(|(_, c)| CommitSummary::new(c.sha.clone()))
            .collect())
    }

    async fn get_commit(&self, sha: &str) -> Result<CommitDetail> {
        if self.failing_commits.contains(sha) {
            return Err(unavailable(sha));
        }
        self.find(sha).cloned().ok_or_else(|| unavailable(sha))
    }

    async fn get_file_contents(&self, path: &str, reference: &str) -> Result<Vec<u8>> {
        self.file_fetches.fetch_add(1, Ordering::SeqCst);
        self.contents
            .get(&(path.to_string(), reference.to_string()))
            .cloned()
            .ok_or_else(|| Error::FileNotFound {
                path: path.to_string(),
                reference: reference.to_string(),
            })
    }

    async fn get_default_branch_name(&self) -> Result<String> {
        Ok("main".to_string())
    }

    fn repo_full_name(&self) -> String {
        "owner/blog".to_string()
    }
}

/// Map-backed store that counts every call
#[derive(Debug, Default)]
pub struct FakeStore {
    posts: Mutex<BTreeMap<String, Post>>,
    images: Mutex<BTreeMap<String, Image>>,
    failing_posts: HashSet<String>,
    calls: AtomicUsize,
    image_writes: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_post(mut self, id: &str) -> Self {
        self.failing_posts.insert(id.to_string());
        self
    }

    pub fn insert_post(&self, post: Post) {
        self.posts.lock().unwrap().insert(post.id.clone(), post);
    }

    pub fn insert_image(&self, image: Image) {
        self.images.lock().unwrap().insert(image.path.clone(), image);
    }

    pub fn post(&self, id: &str) -> Option<Post> {
        self.posts.lock().unwrap().get(id).cloned()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn image(&self, path: &str) -> Option<Image> {
        self.images.lock().unwrap().get(path).cloned()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn image_writes(&self) -> usize {
        self.image_writes.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn save_post(&self, post: &Post) -> Result<()> {
        self.touch();
        if self.failing_posts.contains(&post.id) {
            return Err(Error::Other(format!("cannot save {}", post.id)));
        }
        let mut posts = self.posts.lock().unwrap();
        let mut post = post.clone();
        if let Some(existing) = posts.get(&post.id) {
            post.created_at = existing.created_at;
            post.published_at = post.published_at.or(existing.published_at);
        }
        posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn get_post(&self, id: &str) -> Result<Post> {
        self.touch();
        self.post(id).ok_or_else(|| Error::PostNotFound { id: id.to_string() })
    }

    async fn publish(&self, id: &str) -> Result<()> {
        self.touch();
        let mut posts = self.posts.lock().unwrap();
        let post = posts
            .get_mut(id)
            .ok_or_else(|| Error::PostNotFound { id: id.to_string() })?;
        post.published_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn unpublish(&self, id: &str) -> Result<()> {
        self.touch();
        if let Some(post) = self.posts.lock().unwrap().get_mut(id) {
            post.published_at = None;
        }
        Ok(())
    }

    async fn latest_updated_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.touch();
        Ok(self.posts.lock().unwrap().values().map(|p| p.updated_at).max())
    }

    async fn save_image(&self, image: &Image) -> Result<bool> {
        self.touch();
        let mut images = self.images.lock().unwrap();
        if images.get(&image.path).map_or(false, |i| i.hash == image.hash) {
            return Ok(false);
        }
        self.image_writes.fetch_add(1, Ordering::SeqCst);
        images.insert(image.path.clone(), image.clone());
        Ok(true)
    }

    async fn get_image(&self, path: &str) -> Result<Image> {
        self.touch();
        self.image(path).ok_or_else(|| Error::ImageNotFound {
            path: path.to_string(),
        })
    }

    async fn delete_image(&self, path: &str) -> Result<()> {
        self.touch();
        self.images.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list_published_posts(&self, limit: i64, offset: i64) -> Result<Vec<Post>> {
        self.touch();
        let mut published: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_published())
            .cloned()
            .collect();
        published.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(published
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(1) as usize)
            .collect())
    }
}
