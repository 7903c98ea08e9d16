pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("No analysis stored for hash {0}")]
    UnknownHash(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Durable hash → verdict store.
///
/// One connection behind one mutex: every read-modify-write runs under the
/// same lock, so upserts and feedback never interleave on a key.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Every statement runs in autocommit, so a holder that panicked cannot
    /// leave a half-applied write behind. A poisoned lock is taken over.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            log::warn!("Store lock was poisoned by a panicked holder; recovering");
            poisoned.into_inner()
        })
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock();
        // WAL mode for better concurrent read performance from other processes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::migrate(&conn)?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than this build (v{SCHEMA_VERSION})"
            )));
        }
        if version < 1 {
            Self::migrate_v1(conn)?;
        }
        if version < 2 {
            Self::migrate_v2(conn)?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: hash-keyed verdicts with a tri-state user label
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scans (
                hash        TEXT PRIMARY KEY,
                filename    TEXT NOT NULL,
                score       REAL NOT NULL,
                -- NULL = unset, 1 = valid, 0 = invalid
                user_val    INTEGER CHECK (user_val IS NULL OR user_val IN (0, 1))
            );
            ",
        )?;
        Ok(())
    }

    /// V2: quality score, status, verdict text and timestamps
    fn migrate_v2(conn: &Connection) -> Result<()> {
        let new_columns = [
            "quality_score REAL",
            "status TEXT NOT NULL DEFAULT 'ok'",
            "verdict TEXT",
            "analyzed_at TEXT",
            "labeled_at TEXT",
        ];

        for col in &new_columns {
            let sql = format!("ALTER TABLE scans ADD COLUMN {col}");
            match conn.execute(&sql, []) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, Some(msg)))
                    if err.code == rusqlite::ffi::ErrorCode::Unknown
                        && msg.contains("duplicate column") =>
                {
                    // Column already exists
                }
                Err(e) => return Err(e.into()),
            }
        }

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_scans_analyzed ON scans(analyzed_at);",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 2;
