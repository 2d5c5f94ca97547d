//! Image persistence
//!
//! Rows in `images` carry the content hash; the bytes are mirrored under the
//! images directory. Saving identical content at the same path is a no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::db::Database;
use super::{remove_artifact, write_artifact};
use crate::content::paths;
use crate::content::Image;
use crate::error::{Error, Result};

const UPSERT_IMAGE: &str = "
    INSERT INTO images (path, hash, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(path) DO UPDATE SET
        hash = excluded.hash,
        updated_at = excluded.updated_at
";

/// Rows in `images` plus their files
#[derive(Debug)]
pub struct ImageRepository {
    db: Arc<Database>,
    images_dir: PathBuf,
}

impl ImageRepository {
    pub fn new(db: Arc<Database>, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// On-disk location of an image
    pub fn file_path(&self, image_path: &str) -> Result<PathBuf> {
        paths::image_storage_path(&self.images_dir, image_path)
    }

    /// Upsert the row and write the file.
    ///
    /// Returns `false` without touching the row or the file when the stored
    /// hash matches and the file is present.
    pub fn save_image(&self, image: &Image, tx: Option<&Transaction<'_>>) -> Result<bool> {
        let target = self.file_path(&image.path)?;

        let written = self.db.run_in_transaction(tx, |tx| {
            if let Some(stored) = query_image(tx, &image.path)? {
                if stored.hash == image.hash && target.is_file() {
                    return Ok(false);
                }
            }

            tx.execute(
                UPSERT_IMAGE,
                params![image.path, image.hash, image.created_at, image.updated_at],
            )?;
            write_artifact(&target, &image.content)?;
            Ok(true)
        })?;

        if written {
            tracing::debug!(path = %image.path, hash = %image.hash, "image saved");
        }
        Ok(written)
    }

    /// Fetch image metadata by repository path. The bytes are not loaded.
    pub fn get_image(&self, path: &str) -> Result<Image> {
        self.db
            .with_connection(|conn| query_image(conn, path))?
            .ok_or_else(|| Error::ImageNotFound {
                path: path.to_string(),
            })
    }

    /// Delete the row, then the file. A file that is already gone is fine.
    pub fn delete_image(&self, path: &str, tx: Option<&Transaction<'_>>) -> Result<()> {
        let target = self.file_path(path)?;

        self.db.run_in_transaction(tx, |tx| {
            tx.execute("DELETE FROM images WHERE path = ?1", [path])?;
            remove_artifact(&target)
        })
    }
}

fn query_image(conn: &Connection, path: &str) -> Result<Option<Image>> {
    let image = conn
        .query_row(
            "SELECT path, hash, created_at, updated_at FROM images WHERE path = ?1",
            [path],
            |row| {
                let created_at: DateTime<Utc> = row.get(2)?;
                let updated_at: Option<DateTime<Utc>> = row.get(3)?;
                Ok(Image {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    content: Vec::new(),
                    created_at,
                    updated_at: updated_at.unwrap_or(created_at),
                })
            },
        )
        .optional()?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ImageRepository) {
        let tmp = TempDir::new().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let repo = ImageRepository::new(db, tmp.path().join("images"));
        (tmp, repo)
    }

    #[test]
    fn test_save_writes_nested_file() {
        let (_tmp, repo) = setup();
        let image = Image::new("images/2024/a.png", b"png".to_vec(), Utc::now());

        assert!(repo.save_image(&image, None).unwrap());

        let on_disk = std::fs::read(repo.images_dir().join("2024").join("a.png")).unwrap();
        assert_eq!(on_disk, b"png");
        assert_eq!(repo.get_image("images/2024/a.png").unwrap().hash, image.hash);
    }

    #[test]
    fn test_identical_content_is_not_rewritten() {
        let (_tmp, repo) = setup();
        let image = Image::new("images/a.png", b"png".to_vec(), Utc::now());
        repo.save_image(&image, None).unwrap();
        let stored = repo.get_image("images/a.png").unwrap();

        // Marker content only survives if the second save performs no write
        let file = repo.file_path("images/a.png").unwrap();
        std::fs::write(&file, b"marker").unwrap();

        let again = Image::new("images/a.png", b"png".to_vec(), Utc::now());
        assert!(!repo.save_image(&again, None).unwrap());

        assert_eq!(std::fs::read(&file).unwrap(), b"marker");
        assert_eq!(repo.get_image("images/a.png").unwrap(), stored);
    }

    #[test]
    fn test_changed_content_is_rewritten() {
        let (_tmp, repo) = setup();
        let first = Image::new("images/a.png", b"one".to_vec(), Utc::now());
        repo.save_image(&first, None).unwrap();

        let second = Image::new("images/a.png", b"two".to_vec(), Utc::now());
        assert!(repo.save_image(&second, None).unwrap());

        let stored = repo.get_image("images/a.png").unwrap();
        assert_eq!(stored.hash, second.hash);
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(std::fs::read(repo.file_path("images/a.png").unwrap()).unwrap(), b"two");
    }

    #[test]
    fn test_missing_file_is_restored() {
        let (_tmp, repo) = setup();
        let image = Image::new("images/a.png", b"png".to_vec(), Utc::now());
        repo.save_image(&image, None).unwrap();
        std::fs::remove_file(repo.file_path("images/a.png").unwrap()).unwrap();

        assert!(repo.save_image(&image, None).unwrap());
        assert!(repo.file_path("images/a.png").unwrap().is_file());
    }

    #[test]
    fn test_delete_image() {
        let (_tmp, repo) = setup();
        let image = Image::new("images/a.png", b"png".to_vec(), Utc::now());
        repo.save_image(&image, None).unwrap();

        repo.delete_image("images/a.png", None).unwrap();
        assert!(repo.get_image("images/a.png").unwrap_err().is_not_found());
        assert!(!repo.file_path("images/a.png").unwrap().exists());

        // Second delete finds neither row nor file
        repo.delete_image("images/a.png", None).unwrap();
    }

    #[test]
    fn test_insert_rolled_back_when_file_write_fails() {
        let (_tmp, repo) = setup();
        std::fs::create_dir_all(repo.file_path("images/a.png").unwrap()).unwrap();

        let image = Image::new("images/a.png", b"png".to_vec(), Utc::now());
        assert!(repo.save_image(&image, None).is_err());
        assert!(repo.get_image("images/a.png").unwrap_err().is_not_found());
    }
}
