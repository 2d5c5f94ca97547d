//! Post representation
//!
//! A Post is created from a markdown file under `posts/`. The rendered HTML
//! is mirrored to the posts directory at `html_path`, and the row carries the
//! title, snippet and lifecycle timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::paths;

/// A blog post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Numeric ID taken from the source filename (`posts/042-x.md` -> `042`)
    pub id: String,

    pub title: String,

    pub snippet: String,

    /// HTML filename relative to the posts directory
    pub html_path: String,

    /// Rendered HTML; only populated on the write path
    #[serde(skip)]
    pub html_content: Vec<u8>,

    /// First time this ID was seen. Never changes once stored.
    pub created_at: DateTime<Utc>,

    /// Time of the most recent content or publish-state change
    pub updated_at: DateTime<Utc>,

    /// Set while the post is live on the main branch
    pub published_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Create an unpublished post with the given ID and timestamps
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            html_path: paths::html_filename(&id),
            id,
            title: String::new(),
            snippet: String::new(),
            html_content: Vec::new(),
            created_at,
            updated_at,
            published_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_html(mut self, html: impl Into<Vec<u8>>) -> Self {
        self.html_content = html.into();
        self
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}
