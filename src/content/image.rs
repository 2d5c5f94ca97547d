//! Image representation

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// An image copied out of the content repository
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Full repository-relative path, e.g. `images/2024/diagram.svg`
    pub path: String,
    /// SHA-256 of `content`, lowercase hex
    pub hash: String,
    /// Raw bytes; empty when loaded from the database
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Image {
    /// Build an image from its bytes, hashing the content
    pub fn new(path: impl Into<String>, content: Vec<u8>, at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            hash: content_hash(&content),
            content,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Compute the SHA-256 hex digest used for change detection
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
