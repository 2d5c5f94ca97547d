//! mdblog - Git-Backed Markdown Blog
//!
//! Mirrors a markdown content repository into a queryable post store. Pushes
//! arrive over a webhook; each changed file is rendered, stored as a database
//! row plus a file on disk, and published when the change lands on the main
//! branch.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            mdblog                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐                        ┌─────────────────────┐ │
//! │  │  Webhook    │  push event            │  Catch-up sync      │ │
//! │  │  (axum)     │──────────┐   ┌─────────│  (startup / CLI)    │ │
//! │  └─────────────┘          ▼   ▼         └─────────────────────┘ │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                    Sync Service                             ││
//! │  │  analyzer: commits -> upserts / removals per path           ││
//! │  │  workers:  fetch -> render -> save -> publish               ││
//! │  └──────────────┬───────────────────────────────┬──────────────┘│
//! │                 │                               │               │
//! │                 ▼                               ▼               │
//! │  ┌─────────────────────────────┐  ┌───────────────────────────┐ │
//! │  │  Source Repository (git2)   │  │  Content Store            │ │
//! │  │  branches, commits, blobs   │  │  SQLite row + file, in    │ │
//! │  └─────────────────────────────┘  │  one transaction          │ │
//! │                                   └───────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod source;
pub mod storage;
pub mod sync;
pub mod webhook;

pub use config::Config;
pub use content::{CmarkRenderer, Image, MarkdownRenderer, Post};
pub use error::{Error, Result};
pub use source::{GitSourceRepository, SourceRepository};
pub use storage::{ContentStore, SqliteContentStore};
pub use sync::{PushEvent, SyncReport, SyncService};

use std::sync::Arc;

/// A fully wired blog: git source, SQLite store and sync service
pub struct Blog {
    config: Config,
    store: Arc<SqliteContentStore>,
    service: Arc<SyncService>,
}

impl Blog {
    /// Open the content repository and the store described by `config`
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let source = Arc::new(GitSourceRepository::open(
            &config.repository,
            config.remote.clone(),
        )?);
        let main_branch = match &config.main_branch {
            Some(branch) => branch.clone(),
            None => source.get_default_branch_name().await?,
        };

        let store = Arc::new(SqliteContentStore::open(
            &config.database,
            &config.posts_dir,
            &config.images_dir,
        )?);
        let renderer = Arc::new(CmarkRenderer::new(config.snippet_length));

        tracing::info!(
            repository = %source.repo_full_name(),
            main_branch = %main_branch,
            database = %config.database.display(),
            "blog opened"
        );

        let service = Arc::new(SyncService::new(
            source,
            store.clone(),
            renderer,
            main_branch,
            config.max_concurrency,
        ));

        Ok(Self {
            config,
            store,
            service,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteContentStore> {
        &self.store
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// HTTP routes for the webhook endpoint
    pub fn router(&self) -> Result<axum::Router> {
        let secret = self.config.require_webhook_secret()?;
        Ok(webhook::router(self.service.clone(), secret.as_bytes()))
    }

    /// Run a catch-up sync
    pub async fn sync(&self) -> Result<SyncReport> {
        self.service.sync_repository_changes().await
    }

    /// Stop background work and wait for it to drain
    pub async fn close(&self) {
        self.service.close().await;
    }
}
