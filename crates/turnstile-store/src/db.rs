//! Connection setup and schema shared by every table wrapper.
//!
//! Embeddings, the access log and the identity directory live in one SQLite
//! file. Each wrapper owns its own connection so the engine can hold them
//! independently.

use crate::error::StorageError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name    TEXT NOT NULL,
    last_name     TEXT NOT NULL,
    role          TEXT NOT NULL,
    age           INTEGER NOT NULL,
    registered_at TEXT NOT NULL,
    photo_count   INTEGER NOT NULL DEFAULT 0,
    active        INTEGER NOT NULL DEFAULT 1,
    UNIQUE(first_name, last_name)
);

CREATE TABLE IF NOT EXISTS embeddings (
    identity_id INTEGER NOT NULL,
    position    INTEGER NOT NULL,
    vector      BLOB NOT NULL,
    PRIMARY KEY (identity_id, position)
);

CREATE TABLE IF NOT EXISTS access_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER,
    recorded_at TEXT NOT NULL,
    kind        TEXT NOT NULL,
    confidence  REAL
);

CREATE INDEX IF NOT EXISTS idx_identities_active ON identities(active);
CREATE INDEX IF NOT EXISTS idx_access_log_recorded_at ON access_log(recorded_at);
CREATE INDEX IF NOT EXISTS idx_access_log_identity ON access_log(identity_id, kind);
";

/// Open (or create) the database file, creating its directory if needed.
pub(crate) fn open(path: &Path) -> Result<Connection, StorageError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| StorageError::DataDir {
            path: dir.display().to_string(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    init_schema(&conn)?;
    tracing::debug!(path = %path.display(), "database opened");
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection, StorageError> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
