//! SQLite-backed durable store shared by the queue and the content store.
//!
//! Every worker process opens its own connection to the same database
//! file. Coordination between processes happens only through conditional
//! updates executed inside `BEGIN IMMEDIATE` transactions; nothing is
//! locked in memory across processes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ContentId, InvalidUrl, ParseEnumError, TaskId};

use super::clock::{Clock, SystemClock};

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_items (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_url       TEXT NOT NULL UNIQUE,
    source              TEXT,
    platform            TEXT,
    content_type        TEXT NOT NULL,
    status              TEXT NOT NULL,
    checkout_owner      TEXT,
    checkout_expires_at INTEGER,
    metadata            TEXT NOT NULL DEFAULT '{}',
    attempt_count       INTEGER NOT NULL DEFAULT 0,
    last_error          TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL,
    CHECK ((checkout_owner IS NOT NULL) = (status IN ('checked_out', 'processing')))
);

CREATE INDEX IF NOT EXISTS idx_content_status ON content_items(status);

CREATE TABLE IF NOT EXISTS tasks (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type     TEXT NOT NULL,
    content_id    INTEGER NOT NULL REFERENCES content_items(id),
    payload       TEXT NOT NULL DEFAULT '{}',
    status        TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL,
    available_at  INTEGER NOT NULL,
    claimed_by    TEXT,
    claimed_at    INTEGER,
    last_error    TEXT,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_claimable ON tasks(status, available_at, id);
CREATE INDEX IF NOT EXISTS idx_tasks_content ON tasks(content_id, task_type);
"#;

/// Errors from the durable store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Content item not found: {0}")]
    ContentNotFound(ContentId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Checkout on content {content_id} no longer held by {worker_id}")]
    CheckoutLost {
        content_id: ContentId,
        worker_id: String,
    },

    #[error("Invalid stored value: {0}")]
    InvalidValue(#[from] ParseEnumError),

    #[error(transparent)]
    InvalidUrl(#[from] InvalidUrl),

    #[error("Invalid timestamp in store: {0}")]
    InvalidTimestamp(i64),

    #[error("Store connection lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handle to the durable store
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open with an explicit clock
    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), %journal_mode, "Opened store");

        Self::init(conn, clock, Some(path.to_path_buf()))
    }

    /// Private in-memory database (single connection only)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, clock, None)
    }

    fn init(
        conn: Connection,
        clock: Arc<dyn Clock>,
        path: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
            path,
        })
    }

    /// Path of the database file (None for in-memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a closure with exclusive use of this process's connection
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}

/// Store timestamps as epoch milliseconds
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
}

pub(crate) fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

/// `at + duration`, saturating at a century out
pub(crate) fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let ceiling = chrono::Duration::days(36_500);
    let delta = chrono::Duration::from_std(duration)
        .unwrap_or(ceiling)
        .min(ceiling);
    at.checked_add_signed(delta).unwrap_or(at + ceiling)
}

/// `at - duration`, saturating at a century back
pub(crate) fn sub_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let ceiling = chrono::Duration::days(36_500);
    let delta = chrono::Duration::from_std(duration)
        .unwrap_or(ceiling)
        .min(ceiling);
    at.checked_sub_signed(delta).unwrap_or(at - ceiling)
}
