//! Local persistence: the run ledger and atomic file writes.
//!
//! The ledger is a single `SQLite` file under the data directory:
//!
//! ```text
//! <data>/ledger.sqlite
//!   runs       # One row per harvester invocation
//!   outcomes   # One row per position visited by a run
//! ```

mod outcome;
mod run;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rusqlite::Connection;
use uuid::Uuid;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run already exists: {0}")]
    RunAlreadyExists(Uuid),

    #[error("corrupt ledger: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS runs (
        id          TEXT PRIMARY KEY,
        year        INTEGER NOT NULL,
        started_at  TEXT NOT NULL,
        status      TEXT NOT NULL,
        finished_at TEXT,
        published   INTEGER,
        failed      INTEGER,
        skipped     INTEGER
    );
    CREATE TABLE IF NOT EXISTS outcomes (
        id          INTEGER PRIMARY KEY,
        run_id      TEXT NOT NULL REFERENCES runs(id),
        position_id TEXT NOT NULL,
        outcome     TEXT NOT NULL,
        record_id   TEXT,
        scene_id    TEXT,
        stage       TEXT,
        reason      TEXT,
        recorded_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS outcomes_run ON outcomes (run_id);
    CREATE INDEX IF NOT EXISTS outcomes_position ON outcomes (position_id, outcome);
";

/// The run ledger.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens the ledger at `path`, creating the file and schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers never see a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn parse_timestamp(value: &str, column: &str) -> Result<jiff::Timestamp> {
    value
        .parse()
        .map_err(|e| StorageError::Corrupt(format!("invalid {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ledger.sqlite");

        Storage::open(&path).unwrap();

        assert!(path.is_file());
    }

    #[test]
    fn reopening_keeps_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.sqlite");

        Storage::open(&path).unwrap();
        Storage::open(&path).unwrap();
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tile.png");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("tile.png.tmp").exists());
    }
}
