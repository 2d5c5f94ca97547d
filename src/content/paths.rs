//! Classification of repository-relative paths
//!
//! The content repository is laid out as:
//!
//! ```text
//! /posts/
//!   001-hello-world.md
//!   042-second-post.md
//! /images/
//!   banner.png
//!   2024/diagram.svg
//! ```
//!
//! Anything else in the repository is ignored by the sync engine.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static POST_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^posts/(\d+)-.*\.md$").expect("post path pattern"));

static IMAGE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^images/.*\.(jpg|jpeg|png|gif|svg|webp|avif)$").expect("image path pattern")
});

/// Kind of content a path maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Post,
    Image,
}

impl ContentKind {
    /// Classify a path, returning `None` for paths the engine ignores
    pub fn classify(path: &str) -> Option<Self> {
        if is_post_file(path) {
            Some(Self::Post)
        } else if is_image_file(path) {
            Some(Self::Image)
        } else {
            None
        }
    }

    /// The stable identity a path stores under.
    ///
    /// Posts are keyed by their numeric ID, images by their full path.
    pub fn identity(self, path: &str) -> Option<&str> {
        match self {
            Self::Post => extract_post_id(path),
            Self::Image => is_image_file(path).then_some(path),
        }
    }
}

/// Check if a path is a post file: `posts/NNN-title.md` with one or more digits
pub fn is_post_file(path: &str) -> bool {
    POST_PATH.is_match(path)
}

/// Check if a path is an image under `images/` with a supported extension
pub fn is_image_file(path: &str) -> bool {
    IMAGE_PATH.is_match(path)
}

/// Extract the numeric post ID from a post path.
///
/// `"posts/001-my-post.md"` yields `Some("001")`; non-post paths yield `None`.
pub fn extract_post_id(path: &str) -> Option<&str> {
    POST_PATH
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Deterministic HTML filename for a post
pub fn html_filename(post_id: &str) -> String {
    format!("{}.html", post_id)
}

/// Where an image is mirrored on disk: `images/2024/a.png` lands at
/// `<images_dir>/2024/a.png`.
///
/// Rejects paths that would escape `images_dir`.
pub fn image_storage_path(images_dir: &Path, image_path: &str) -> Result<PathBuf> {
    let relative = image_path.strip_prefix("images/").ok_or_else(|| Error::InvalidPath {
        path: image_path.to_string(),
        reason: "not under images/",
    })?;

    if relative.is_empty() || relative.contains('\\') {
        return Err(Error::InvalidPath {
            path: image_path.to_string(),
            reason: "contains invalid characters",
        });
    }

    let relative = Path::new(relative);
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::InvalidPath {
            path: image_path.to_string(),
            reason: "contains path traversal components",
        });
    }

    Ok(images_dir.join(relative))
}
