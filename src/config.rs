//! Service configuration
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! file (or none at all) yields a working local setup. The CLI layers flag
//! and environment overrides on top.
//!
//! ```yaml
//! repository: /srv/blog-content
//! database: /var/lib/mdblog/blog.db
//! posts_dir: /var/www/posts
//! images_dir: /var/www/images
//! main_branch: main
//! max_concurrency: 8
//! listen: 0.0.0.0:8080
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Local clone of the content repository
    pub repository: PathBuf,

    /// Remote whose tracking branches are synced alongside local ones
    pub remote: String,

    /// SQLite database file
    pub database: PathBuf,

    /// Where rendered post HTML is written
    pub posts_dir: PathBuf,

    /// Where images are mirrored
    pub images_dir: PathBuf,

    /// Branch whose changes publish; the repository default when unset
    pub main_branch: Option<String>,

    /// Upper bound on concurrently running workers per push
    pub max_concurrency: usize,

    pub listen: SocketAddr,

    /// Shared secret for webhook signatures
    pub webhook_secret: Option<String>,

    /// Characters kept in derived post snippets
    pub snippet_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: PathBuf::from("."),
            remote: "origin".to_string(),
            database: PathBuf::from("./mdblog.db"),
            posts_dir: PathBuf::from("./posts"),
            images_dir: PathBuf::from("./images"),
            main_branch: None,
            max_concurrency: 8,
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            webhook_secret: None,
            snippet_length: 200,
        }
    }
}

impl Config {
    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config {
                message: "max_concurrency must be at least 1".to_string(),
            });
        }
        if matches!(self.main_branch.as_deref(), Some(b) if b.trim().is_empty()) {
            return Err(Error::Config {
                message: "main_branch must not be empty".to_string(),
            });
        }
        if self.remote.trim().is_empty() {
            return Err(Error::Config {
                message: "remote must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The webhook secret, required to serve
    pub fn require_webhook_secret(&self) -> Result<&str> {
        match self.webhook_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(Error::Config {
                message: "WEBHOOK_SECRET is not set".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.listen.port(), 8080);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mdblog.yaml");
        std::fs::write(&path, "main_branch: trunk\nmax_concurrency: 2\nlisten: 127.0.0.1:9000\n")
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.main_branch.as_deref(), Some("trunk"));
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database, PathBuf::from("./mdblog.db"));
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(Config::from_yaml("max_concurency: 2").is_err());
        assert!(Config::load(Path::new("/nonexistent/mdblog.yaml")).is_err());

        let config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            main_branch: Some("  ".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_secret_required() {
        let mut config = Config::default();
        assert!(config.require_webhook_secret().is_err());
        config.webhook_secret = Some("s3cret".to_string());
        assert_eq!(config.require_webhook_secret().unwrap(), "s3cret");
    }
}
