//! Run storage: create, complete, and load harvest runs.

use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::model::{HarvestRun, RunStatus};

use super::{Result, Storage, StorageError, parse_timestamp};

impl Storage {
    /// Records the start of a run.
    pub fn create_run(&self, run: &HarvestRun) -> Result<()> {
        let (status, finished_at, counts) = serialize_status(&run.status);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO runs
                 (id, year, started_at, status, finished_at, published, failed, skipped)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run.id.to_string(),
                run.year,
                run.started_at.to_string(),
                status,
                finished_at,
                counts.map(|c| c.0),
                counts.map(|c| c.1),
                counts.map(|c| c.2),
            ],
        )?;
        if inserted == 0 {
            return Err(StorageError::RunAlreadyExists(run.id));
        }
        Ok(())
    }

    /// Updates a run's status.
    pub fn update_run(&self, run: &HarvestRun) -> Result<()> {
        let (status, finished_at, counts) = serialize_status(&run.status);
        let rows = self.conn.execute(
            "UPDATE runs
             SET status = ?1, finished_at = ?2, published = ?3, failed = ?4, skipped = ?5
             WHERE id = ?6",
            rusqlite::params![
                status,
                finished_at,
                counts.map(|c| c.0),
                counts.map(|c| c.1),
                counts.map(|c| c.2),
                run.id.to_string(),
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::RunNotFound(run.id));
        }
        Ok(())
    }

    /// The most recently started run for `year`, if any.
    pub fn last_run(&self, year: i16) -> Result<Option<HarvestRun>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM runs WHERE year = ?1 ORDER BY rowid DESC LIMIT 1",
                [year],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&id)
            .map_err(|e| StorageError::Corrupt(format!("invalid run id {id:?}: {e}")))?;
        self.load_run(id).map(Some)
    }

    pub fn load_run(&self, id: Uuid) -> Result<HarvestRun> {
        let row = self
            .conn
            .query_row(
                "SELECT year, started_at, status, finished_at, published, failed, skipped
                 FROM runs WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<u32>>(4)?,
                        row.get::<_, Option<u32>>(5)?,
                        row.get::<_, Option<u32>>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((year, started_at, status, finished_at, published, failed, skipped)) = row else {
            return Err(StorageError::RunNotFound(id));
        };

        let status = match status.as_str() {
            "running" => RunStatus::Running,
            "completed" => {
                let finished_at = finished_at.ok_or_else(|| {
                    StorageError::Corrupt("run is completed but finished_at is null".into())
                })?;
                RunStatus::Completed {
                    finished_at: parse_timestamp(&finished_at, "finished_at")?,
                    published: published.unwrap_or(0),
                    failed: failed.unwrap_or(0),
                    skipped: skipped.unwrap_or(0),
                }
            }
            other => {
                return Err(StorageError::Corrupt(format!("unknown run status: {other}")));
            }
        };

        Ok(HarvestRun {
            id,
            year,
            started_at: parse_timestamp(&started_at, "started_at")?,
            status,
        })
    }
}

type Counts = (u32, u32, u32);

/// Converts a `RunStatus` to column values for the runs table.
fn serialize_status(status: &RunStatus) -> (&'static str, Option<String>, Option<Counts>) {
    match status {
        RunStatus::Running => ("running", None, None),
        RunStatus::Completed {
            finished_at,
            published,
            failed,
            skipped,
        } => (
            "completed",
            Some(finished_at.to_string()),
            Some((*published, *failed, *skipped)),
        ),
    }
}
