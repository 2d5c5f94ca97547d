//! Per-file units of work
//!
//! Each function handles exactly one path. The cancellation token is checked
//! before every source fetch and every store call: I/O already started runs
//! to completion, nothing new starts once shutdown has begun.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::analyzer::PendingFile;
use crate::content::paths;
use crate::content::{Image, MarkdownRenderer, Post};
use crate::error::{Error, Result};
use crate::source::SourceRepository;
use crate::storage::ContentStore;

/// Shared collaborators handed to every unit of work
#[derive(Clone)]
pub struct WorkerContext {
    pub source: Arc<dyn SourceRepository>,
    pub store: Arc<dyn ContentStore>,
    pub renderer: Arc<dyn MarkdownRenderer>,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("repository", &self.source.repo_full_name())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// What a unit of work ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Saved,
    Published,
    Unchanged,
    Unpublished,
    Removed,
}

/// Fetch, render and store one post; publish it too when `publish` is set
pub async fn process_post(
    ctx: &WorkerContext,
    path: &str,
    pending: &PendingFile,
    publish: bool,
) -> Result<WorkOutcome> {
    let id = paths::extract_post_id(path).ok_or_else(|| Error::InvalidPath {
        path: path.to_string(),
        reason: "not a post file",
    })?;

    ctx.ensure_active()?;
    let markdown = ctx
        .source
        .get_file_contents(path, pending.content_ref())
        .await?;
    let rendered = ctx.renderer.render(&markdown)?;

    ctx.ensure_active()?;
    let created_at = match ctx.store.get_post(id).await {
        Ok(existing) => existing.created_at,
        Err(Error::PostNotFound { .. }) => pending.created_at(),
        Err(e) => return Err(e),
    };

    let post = Post::new(id, created_at, pending.updated_at())
        .with_title(rendered.title)
        .with_snippet(rendered.snippet)
        .with_html(rendered.html);

    ctx.ensure_active()?;
    ctx.store.save_post(&post).await?;
    tracing::info!(id, path, commit = %pending.content_ref(), "post saved");

    if !publish {
        return Ok(WorkOutcome::Saved);
    }

    ctx.ensure_active()?;
    ctx.store.publish(id).await?;
    tracing::info!(id, "post published");
    Ok(WorkOutcome::Published)
}

/// Fetch one image and store it unless the stored hash already matches
pub async fn process_image(
    ctx: &WorkerContext,
    path: &str,
    pending: &PendingFile,
) -> Result<WorkOutcome> {
    ctx.ensure_active()?;
    let content = ctx
        .source
        .get_file_contents(path, pending.content_ref())
        .await?;

    let mut image = Image::new(path, content, pending.updated_at());
    image.created_at = pending.created_at();

    ctx.ensure_active()?;
    match ctx.store.get_image(path).await {
        Ok(stored) if stored.hash == image.hash => {
            tracing::debug!(path, hash = %image.hash, "image unchanged");
            return Ok(WorkOutcome::Unchanged);
        }
        Ok(_) | Err(Error::ImageNotFound { .. }) => {}
        Err(e) => return Err(e),
    }

    ctx.ensure_active()?;
    if ctx.store.save_image(&image).await? {
        tracing::info!(path, hash = %image.hash, "image saved");
        Ok(WorkOutcome::Saved)
    } else {
        tracing::debug!(path, "image unchanged");
        Ok(WorkOutcome::Unchanged)
    }
}

pub async fn unpublish_post(ctx: &WorkerContext, id: &str) -> Result<WorkOutcome> {
    ctx.ensure_active()?;
    ctx.store.unpublish(id).await?;
    tracing::info!(id, "post unpublished");
    Ok(WorkOutcome::Unpublished)
}

pub async fn remove_image(ctx: &WorkerContext, path: &str) -> Result<WorkOutcome> {
    ctx.ensure_active()?;
    ctx.store.delete_image(path).await?;
    tracing::info!(path, "image removed");
    Ok(WorkOutcome::Removed)
}
