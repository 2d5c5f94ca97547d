//! SQLite database handle
//!
//! # Transaction Model
//!
//! Every mutation that touches both a row and a file runs inside
//! [`Database::run_in_transaction`]. A caller that already holds a
//! transaction passes it in explicitly; the nested call then reuses it and
//! leaves commit/rollback to the outermost caller.
//!
//! The connection sits behind a mutex, so the handle is safe to share across
//! workers. Code running inside a transaction must use the transaction for
//! any further queries instead of calling back into the handle.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};

use crate::error::{Error, Result};

/// A single schema migration
struct Migration {
    version: i64,
    name: &'static str,
    up: &'static str,
}

/// Ordered list of migrations. Applied versions are recorded in `schema_migrations`.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_posts_table",
        up: "
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                snippet TEXT NOT NULL,
                html_path TEXT NOT NULL,
                updated_at TIMESTAMP,
                published_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_published_at
            ON posts(published_at DESC)
            WHERE published_at IS NOT NULL;
        ",
    },
    Migration {
        version: 2,
        name: "create_images_table",
        up: "
            CREATE TABLE IF NOT EXISTS images (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                updated_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_images_updated_at
            ON images(updated_at DESC);
        ",
    },
];

/// Shared handle to the SQLite database
#[derive(Debug)]
pub struct Database {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(Some(path), conn)
    }

    /// Open a private in-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::init(None, Connection::open_in_memory()?)
    }

    fn init(path: Option<PathBuf>, mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        run_migrations(&mut conn)?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a read or single-statement write against the connection
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside a transaction.
    ///
    /// With `ambient = Some(tx)` the work joins that transaction and nothing
    /// is committed or rolled back here. Otherwise a new transaction is
    /// opened, committed when `f` succeeds and rolled back when it fails.
    pub fn run_in_transaction<T>(
        &self,
        ambient: Option<&Transaction<'_>>,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        if let Some(tx) = ambient {
            return f(tx);
        }

        let mut conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let tx = conn.transaction()?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    return Err(Error::Rollback {
                        cause: err.to_string(),
                        source: rollback,
                    });
                }
                Err(err)
            }
        }
    }

    /// Highest applied migration version
    pub fn schema_version(&self) -> Result<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )?)
        })
    }
}

/// Apply every migration newer than the recorded schema version
fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up).map_err(|e| Error::Database {
            message: format!(
                "migration {} ({}) failed: {}",
                migration.version, migration.name, e
            ),
            source: Some(e),
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )?;
        tx.commit()?;
        tracing::debug!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(())
}
