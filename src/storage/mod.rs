//! Storage layer for mdblog
//!
//! Persists posts and images as database rows mirrored to files on disk.
//! The sync engine only sees the [`ContentStore`] trait; [`SqliteContentStore`]
//! is the production implementation.

pub mod db;
pub mod images;
pub mod posts;
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::content::{Image, Post};
use crate::error::{Error, Result};

pub use db::Database;
pub use images::ImageRepository;
pub use posts::PostRepository;
pub use sqlite::SqliteContentStore;

/// Persistence boundary used by the sync engine.
///
/// Every operation that touches both a row and a file is atomic: either both
/// reflect the new state or the row is left as it was.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn save_post(&self, post: &Post) -> Result<()>;

    /// `Error::PostNotFound` when no row exists
    async fn get_post(&self, id: &str) -> Result<Post>;

    async fn publish(&self, id: &str) -> Result<()>;

    async fn unpublish(&self, id: &str) -> Result<()>;

    /// High-water mark for catch-up sync; `None` when nothing is stored
    async fn latest_updated_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Returns whether anything was written
    async fn save_image(&self, image: &Image) -> Result<bool>;

    /// `Error::ImageNotFound` when no row exists
    async fn get_image(&self, path: &str) -> Result<Image>;

    async fn delete_image(&self, path: &str) -> Result<()>;

    async fn list_published_posts(&self, limit: i64, offset: i64) -> Result<Vec<Post>>;
}

/// Write a file in place, creating its directory first
pub(crate) fn write_artifact(path: &Path, content: &[u8]) -> Result<()> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    };

    write().map_err(|source| Error::FileWriteError {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove a file; a missing file is not an error
pub(crate) fn remove_artifact(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::FileRemoveError {
            path: path.to_path_buf(),
            source,
        }),
    }
}
