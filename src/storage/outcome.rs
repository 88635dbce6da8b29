//! Outcome storage: what happened to each position in each run.

use std::collections::HashSet;

use uuid::Uuid;

use crate::model::{Outcome, RecordOutcome, Stage};

use super::{Result, Storage, StorageError, parse_timestamp};

impl Storage {
    /// Appends one position's outcome to a run.
    pub fn record_outcome(&self, outcome: &RecordOutcome) -> Result<()> {
        let (kind, record_id, scene_id, stage, reason) = match &outcome.outcome {
            Outcome::Published {
                record_id,
                scene_id,
            } => ("published", Some(record_id.as_str()), Some(scene_id.as_str()), None, None),
            Outcome::Failed { stage, reason } => {
                ("failed", None, None, Some(stage.as_str()), Some(reason.as_str()))
            }
            Outcome::Skipped => ("skipped", None, None, None, None),
        };

        let rows = self.conn.execute(
            "INSERT INTO outcomes
                 (run_id, position_id, outcome, record_id, scene_id, stage, reason, recorded_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
             WHERE EXISTS (SELECT 1 FROM runs WHERE id = ?1)",
            rusqlite::params![
                outcome.run_id.to_string(),
                &outcome.position_id,
                kind,
                record_id,
                scene_id,
                stage,
                reason,
                outcome.recorded_at.to_string(),
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::RunNotFound(outcome.run_id));
        }
        Ok(())
    }

    /// Loads a run's outcomes in the order they were recorded.
    pub fn load_outcomes(&self, run_id: Uuid) -> Result<Vec<RecordOutcome>> {
        let mut stmt = self.conn.prepare(
            "SELECT position_id, outcome, record_id, scene_id, stage, reason, recorded_at
             FROM outcomes WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([run_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut outcomes = Vec::new();
        for row in rows {
            let (position_id, kind, record_id, scene_id, stage, reason, recorded_at) = row?;
            outcomes.push(RecordOutcome {
                run_id,
                position_id,
                outcome: deserialize_outcome(&kind, record_id, scene_id, stage, reason)?,
                recorded_at: parse_timestamp(&recorded_at, "recorded_at")?,
            });
        }
        Ok(outcomes)
    }

    /// Every position id published by any run.
    pub fn published_position_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT position_id FROM outcomes WHERE outcome = 'published'")?;
        let ids: HashSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }
}

/// Reconstructs an `Outcome` from outcomes table column values.
fn deserialize_outcome(
    kind: &str,
    record_id: Option<String>,
    scene_id: Option<String>,
    stage: Option<String>,
    reason: Option<String>,
) -> Result<Outcome> {
    match kind {
        "published" => match (record_id, scene_id) {
            (Some(record_id), Some(scene_id)) => Ok(Outcome::Published {
                record_id,
                scene_id,
            }),
            _ => Err(StorageError::Corrupt(
                "published outcome without record or scene id".into(),
            )),
        },
        "failed" => {
            let stage = stage
                .as_deref()
                .and_then(Stage::parse)
                .ok_or_else(|| StorageError::Corrupt(format!("invalid failure stage: {stage:?}")))?;
            Ok(Outcome::Failed {
                stage,
                reason: reason.unwrap_or_default(),
            })
        }
        "skipped" => Ok(Outcome::Skipped),
        other => Err(StorageError::Corrupt(format!("unknown outcome: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;
    use tempfile::TempDir;

    use crate::model::{HarvestRun, RunStatus};

    fn test_storage() -> (TempDir, Storage, Uuid) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path().join("ledger.sqlite")).unwrap();
        let run = HarvestRun {
            id: Uuid::new_v4(),
            year: 2023,
            started_at: Timestamp::new(1_700_000_000, 0).unwrap(),
            status: RunStatus::Running,
        };
        storage.create_run(&run).unwrap();
        (dir, storage, run.id)
    }

    fn sample_outcome(run_id: Uuid, position_id: &str, second: i64, outcome: Outcome) -> RecordOutcome {
        RecordOutcome {
            run_id,
            position_id: position_id.into(),
            outcome,
            recorded_at: Timestamp::new(1_700_000_000 + second, 0).unwrap(),
        }
    }

    fn published(record_id: &str) -> Outcome {
        Outcome::Published {
            record_id: record_id.into(),
            scene_id: "S2A_T37UDQ".into(),
        }
    }

    #[test]
    fn outcomes_round_trip_in_order() {
        let (_dir, storage, run_id) = test_storage();
        let failed = Outcome::Failed {
            stage: Stage::Located,
            reason: "no imagery within ±30 days".into(),
        };

        storage
            .record_outcome(&sample_outcome(run_id, "b", 2, failed.clone()))
            .unwrap();
        storage
            .record_outcome(&sample_outcome(run_id, "a", 1, published("rec1")))
            .unwrap();
        storage
            .record_outcome(&sample_outcome(run_id, "c", 3, Outcome::Skipped))
            .unwrap();

        let outcomes = storage.load_outcomes(run_id).unwrap();
        let ids: Vec<_> = outcomes.iter().map(|o| o.position_id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
        assert_eq!(outcomes[0].outcome, failed);
        assert_eq!(outcomes[0].recorded_at, Timestamp::new(1_700_000_002, 0).unwrap());
        assert_eq!(outcomes[1].outcome, published("rec1"));
        assert_eq!(outcomes[2].outcome, Outcome::Skipped);
    }

    #[test]
    fn outcome_for_unknown_run_fails() {
        let (_dir, storage, _run_id) = test_storage();
        let err = storage
            .record_outcome(&sample_outcome(Uuid::new_v4(), "a", 0, Outcome::Skipped))
            .unwrap_err();

        assert!(matches!(err, StorageError::RunNotFound(_)));
    }

    #[test]
    fn published_ids_span_runs_and_ignore_failures() {
        let (_dir, storage, run_id) = test_storage();
        let second = HarvestRun {
            id: Uuid::new_v4(),
            year: 2023,
            started_at: Timestamp::new(1_700_100_000, 0).unwrap(),
            status: RunStatus::Running,
        };
        storage.create_run(&second).unwrap();

        storage
            .record_outcome(&sample_outcome(run_id, "a", 0, published("rec1")))
            .unwrap();
        storage
            .record_outcome(&sample_outcome(
                run_id,
                "b",
                1,
                Outcome::Failed {
                    stage: Stage::Published,
                    reason: "rate limited".into(),
                },
            ))
            .unwrap();
        storage
            .record_outcome(&sample_outcome(second.id, "c", 2, published("rec2")))
            .unwrap();

        let ids = storage.published_position_ids().unwrap();
        assert_eq!(ids, HashSet::from(["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn empty_ledger_has_no_published_ids() {
        let (_dir, storage, _run_id) = test_storage();
        assert!(storage.published_position_ids().unwrap().is_empty());
    }
}
