//! Post persistence
//!
//! A post is stored twice: as a row in `posts` and as its rendered HTML under
//! the posts directory. [`PostRepository::save_post`] writes the row first and
//! the file second inside one transaction, so a failed file write leaves the
//! row exactly as it was.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::db::Database;
use super::write_artifact;
use crate::content::Post;
use crate::error::{Error, Result};

/// Page size used when a listing asks for zero or fewer posts
pub const DEFAULT_PAGE_SIZE: i64 = 10;

const POST_COLUMNS: &str = "id, title, snippet, html_path, created_at, updated_at, published_at";

const UPSERT_POST: &str = "
    INSERT INTO posts (id, title, snippet, html_path, created_at, updated_at, published_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        snippet = excluded.snippet,
        html_path = excluded.html_path,
        updated_at = excluded.updated_at,
        published_at = COALESCE(excluded.published_at, posts.published_at)
";

/// Rows in `posts` plus their HTML files
#[derive(Debug)]
pub struct PostRepository {
    db: Arc<Database>,
    posts_dir: PathBuf,
}

impl PostRepository {
    pub fn new(db: Arc<Database>, posts_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            posts_dir: posts_dir.into(),
        }
    }

    pub fn posts_dir(&self) -> &Path {
        &self.posts_dir
    }

    /// Upsert the row and write the HTML file.
    ///
    /// `created_at` of an existing row is never overwritten, and a `None`
    /// `published_at` keeps whatever the row already has.
    pub fn save_post(&self, post: &Post, tx: Option<&Transaction<'_>>) -> Result<()> {
        let target = self.html_file(post)?;

        self.db.run_in_transaction(tx, |tx| {
            tx.execute(
                UPSERT_POST,
                params![
                    post.id,
                    post.title,
                    post.snippet,
                    post.html_path,
                    post.created_at,
                    post.updated_at,
                    post.published_at,
                ],
            )?;
            write_artifact(&target, &post.html_content)
        })?;

        tracing::debug!(id = %post.id, path = %target.display(), "post saved");
        Ok(())
    }

    /// Fetch a post by ID. The HTML body is not loaded.
    pub fn get_post(&self, id: &str) -> Result<Post> {
        self.db.with_connection(|conn| query_post(conn, id))
    }

    /// Mark a post as published, keeping the original publish time if it
    /// already had one
    pub fn publish(&self, id: &str, tx: Option<&Transaction<'_>>) -> Result<()> {
        self.db.run_in_transaction(tx, |tx| {
            let current = query_post(tx, id)?;
            let now = next_timestamp(current.updated_at);
            tx.execute(
                "UPDATE posts SET published_at = COALESCE(published_at, ?1), updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
    }

    /// Clear the publish time. Unknown IDs are ignored.
    pub fn unpublish(&self, id: &str, tx: Option<&Transaction<'_>>) -> Result<()> {
        self.db.run_in_transaction(tx, |tx| {
            let current = match query_post(tx, id) {
                Ok(post) => post,
                Err(Error::PostNotFound { .. }) => return Ok(()),
                Err(e) => return Err(e),
            };
            let now = next_timestamp(current.updated_at);
            tx.execute(
                "UPDATE posts SET published_at = NULL, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
    }

    /// Most recent `updated_at` across all posts, `None` for an empty table
    pub fn latest_updated_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.db.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT MAX(COALESCE(updated_at, created_at)) FROM posts",
                [],
                |row| row.get(0),
            )?)
        })
    }

    /// Published posts, newest publication first
    pub fn list_published(&self, limit: i64, offset: i64) -> Result<Vec<Post>> {
        let limit = if limit <= 0 { DEFAULT_PAGE_SIZE } else { limit };
        let offset = offset.max(0);

        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM posts
                 WHERE published_at IS NOT NULL
                 ORDER BY published_at DESC
                 LIMIT ?1 OFFSET ?2",
                POST_COLUMNS
            ))?;
            let posts = stmt
                .query_map(params![limit, offset], row_to_post)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(posts)
        })
    }

    fn html_file(&self, post: &Post) -> Result<PathBuf> {
        let name = Path::new(&post.html_path);
        let mut components = name.components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Ok(self.posts_dir.join(name)),
            _ => Err(Error::InvalidPath {
                path: post.html_path.clone(),
                reason: "html path must be a plain file name",
            }),
        }
    }
}

fn query_post(conn: &Connection, id: &str) -> Result<Post> {
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
        [id],
        row_to_post,
    )
    .optional()?
    .ok_or_else(|| Error::PostNotFound { id: id.to_string() })
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let created_at: DateTime<Utc> = row.get(4)?;
    let updated_at: Option<DateTime<Utc>> = row.get(5)?;

    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        snippet: row.get(2)?,
        html_path: row.get(3)?,
        html_content: Vec::new(),
        created_at,
        updated_at: updated_at.unwrap_or(created_at),
        published_at: row.get(6)?,
    })
}

/// Current time, forced strictly past `previous` so state changes always
/// advance `updated_at`
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
