//! SQLite-backed [`ContentStore`]
//!
//! The repositories are synchronous; each call is moved onto the blocking
//! pool so workers never stall the async runtime on disk or database I/O.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ContentStore, Database, ImageRepository, PostRepository};
use crate::content::{Image, Post};
use crate::error::Result;

#[derive(Debug)]
struct Repositories {
    posts: PostRepository,
    images: ImageRepository,
}

/// Content store over a shared SQLite database and two output directories
#[derive(Debug, Clone)]
pub struct SqliteContentStore {
    db: Arc<Database>,
    repos: Arc<Repositories>,
}

impl SqliteContentStore {
    pub fn new(
        db: Arc<Database>,
        posts_dir: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
    ) -> Self {
        let repos = Repositories {
            posts: PostRepository::new(Arc::clone(&db), posts_dir),
            images: ImageRepository::new(Arc::clone(&db), images_dir),
        };
        Self {
            db,
            repos: Arc::new(repos),
        }
    }

    /// Open the database at `path` (running migrations) and build the store
    pub fn open(
        path: impl Into<PathBuf>,
        posts_dir: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let db = Arc::new(Database::open(path)?);
        Ok(Self::new(db, posts_dir, images_dir))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn posts(&self) -> &PostRepository {
        &self.repos.posts
    }

    pub fn images(&self) -> &ImageRepository {
        &self.repos.images
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repositories) -> Result<T> + Send + 'static,
    {
        let repos = Arc::clone(&self.repos);
        tokio::task::spawn_blocking(move || f(&repos)).await?
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn save_post(&self, post: &Post) -> Result<()> {
        let post = post.clone();
        self.blocking(move |r| r.posts.save_post(&post, None)).await
    }

    async fn get_post(&self, id: &str) -> Result<Post> {
        let id = id.to_string();
        self.blocking(move |r| r.posts.get_post(&id)).await
    }

    async fn publish(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.blocking(move |r| r.posts.publish(&id, None)).await
    }

    async fn unpublish(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.blocking(move |r| r.posts.unpublish(&id, None)).await
    }

    async fn latest_updated_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.blocking(|r| r.posts.latest_updated_time()).await
    }

    async fn save_image(&self, image: &Image) -> Result<bool> {
        let image = image.clone();
        self.blocking(move |r| r.images.save_image(&image, None)).await
    }

    async fn get_image(&self, path: &str) -> Result<Image> {
        let path = path.to_string();
        self.blocking(move |r| r.images.get_image(&path)).await
    }

    async fn delete_image(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.blocking(move |r| r.images.delete_image(&path, None)).await
    }

    async fn list_published_posts(&self, limit: i64, offset: i64) -> Result<Vec<Post>> {
        self.blocking(move |r| r.posts.list_published(limit, offset)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> SqliteContentStore {
        SqliteContentStore::open(
            tmp.path().join("blog.db"),
            tmp.path().join("posts"),
            tmp.path().join("images"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_post_lifecycle_through_trait() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let at = Utc::now();

        store
            .save_post(&Post::new("007", at, at).with_title("Bond").with_html("<p>x</p>"))
            .await
            .unwrap();
        store.publish("007").await.unwrap();

        let listed = store.list_published_posts(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Bond");
        assert!(tmp.path().join("posts").join("007.html").is_file());

        store.unpublish("007").await.unwrap();
        assert!(store.list_published_posts(10, 0).await.unwrap().is_empty());
        assert!(store.latest_updated_time().await.unwrap().unwrap() > at);
    }

    #[tokio::test]
    async fn test_concurrent_saves_share_connection() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let at = Utc::now();
                let id = format!("{:03}", i);
                store.save_post(&Post::new(id, at, at).with_title("t")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            store.get_post(&format!("{:03}", i)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_image_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = store(&tmp).get_image("images/none.png").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
