//! Error types for mdblog
//!
//! Provides structured error types with context for better debugging.
//! Not-found outcomes are typed so callers can tell a missing row apart
//! from a storage or transport failure.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for mdblog operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Content Errors
    // ==========================================================================
    #[error("Post '{id}' not found")]
    PostNotFound { id: String },

    #[error("Image '{path}' not found")]
    ImageNotFound { path: String },

    #[error("Invalid content path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    // ==========================================================================
    // Source Repository Errors
    // ==========================================================================
    #[error("Source repository operation failed: {message}")]
    Source {
        message: String,
        #[source]
        source: Option<git2::Error>,
    },

    #[error("File '{path}' does not exist at '{reference}'")]
    FileNotFound { path: String, reference: String },

    // ==========================================================================
    // Render Errors
    // ==========================================================================
    #[error("Failed to render markdown: {message}")]
    Render { message: String },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    #[error("Database operation failed: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Failed to roll back transaction after '{cause}': {source}")]
    Rollback {
        cause: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    FileRemoveError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    // ==========================================================================
    // Sync Errors
    // ==========================================================================
    #[error("Work cancelled")]
    Cancelled,

    #[error("Sync service is shutting down")]
    ShuttingDown,

    #[error("Background task failed: {message}")]
    Task { message: String },

    // ==========================================================================
    // Webhook Errors
    // ==========================================================================
    #[error("Webhook signature is missing or invalid")]
    InvalidSignature,

    #[error("Invalid webhook payload: {message}")]
    InvalidPayload { message: String },

    #[error("Push for repository '{actual}' does not match '{expected}'")]
    RepositoryMismatch { expected: String, actual: String },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    // ==========================================================================
    // IO & Serialization Errors
    // ==========================================================================
    #[error("IO error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {message}")]
    YamlParseError { message: String },

    #[error("Failed to parse JSON: {message}")]
    JsonParseError { message: String },

    // ==========================================================================
    // Catch-all
    // ==========================================================================
    #[error("{0}")]
    Other(String),
}

/// Result type alias for mdblog operations
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io { source: err }
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Source {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::YamlParseError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParseError {
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task {
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Returns true for the typed "row does not exist" outcomes
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PostNotFound { .. } | Error::ImageNotFound { .. })
    }

    /// Returns true if the error only reflects a shutdown in progress
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::ShuttingDown)
    }
}
