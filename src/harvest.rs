//! Harvest orchestration: one pass over a year's firing positions.
//!
//! Each position moves through `Filtered → Located → Fetched → Published`
//! on its own. A failure at any stage is logged, written to the ledger,
//! and the run moves on to the next position. Only an unavailable feed
//! stops a run.

use std::fmt;

use jiff::Timestamp;
use uuid::Uuid;

use crate::feed::{Feed, FeedCache, FeedError, FeedSource, firing_positions};
use crate::imagery::{ArchiveError, FetchError, Fetcher, Locator};
use crate::model::{
    FiringPosition, HarvestRecord, HarvestRun, Outcome, PublishedRecord, RecordOutcome, RunStatus,
    Stage,
};
use crate::publish::{PublishError, Publisher};
use crate::storage::{self, Storage};

/// Why a run or a single record did not make it.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// The only error that ends a run.
    #[error("cannot start harvest: {0}")]
    FeedUnavailable(#[source] FeedError),

    #[error("imagery search failed: {0}")]
    Locate(#[source] ArchiveError),

    #[error("no imagery within ±{max_window_days} days of {date}")]
    ImageryNotFound {
        date: jiff::civil::Date,
        max_window_days: i32,
    },

    #[error("imagery download failed: {0}")]
    ImageryDownload(#[source] FetchError),

    #[error("publish failed: {0}")]
    Publish(#[source] PublishError),
}

/// A record that stopped short of `stage`.
#[derive(Debug)]
pub struct RecordFailure {
    pub position_id: String,
    pub stage: Stage,
    pub error: HarvestError,
}

/// A failed record as reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRecord {
    pub position_id: String,
    pub stage: Stage,
    pub reason: String,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub published: Vec<PublishedRecord>,
    pub failed: Vec<FailedRecord>,
    pub skipped: Vec<String>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run {}: {} published, {} failed, {} skipped",
            self.run_id,
            self.published.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        for failure in &self.failed {
            write!(
                f,
                "\n  {}: not {}: {}",
                failure.position_id, failure.stage, failure.reason
            )?;
        }
        Ok(())
    }
}

/// The last run recorded for a year, with what it got through.
#[derive(Debug, Clone)]
pub struct PreviousRun {
    pub run: HarvestRun,
    pub outcomes: Vec<RecordOutcome>,
}

impl PreviousRun {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
            .count()
    }
}

/// Load the feed, mapping any failure to [`HarvestError::FeedUnavailable`].
pub fn load_feed(
    cache: &FeedCache,
    source: &dyn FeedSource,
    refresh: bool,
) -> Result<Feed, HarvestError> {
    cache
        .load(source, refresh)
        .map_err(HarvestError::FeedUnavailable)
}

/// Drives positions through the pipeline and keeps the ledger.
pub struct Harvester<'a> {
    locator: Locator<'a>,
    fetcher: Fetcher<'a>,
    publisher: Publisher<'a>,
    ledger: &'a Storage,
    max_window_days: i32,
}

impl<'a> Harvester<'a> {
    pub fn new(
        locator: Locator<'a>,
        fetcher: Fetcher<'a>,
        publisher: Publisher<'a>,
        ledger: &'a Storage,
        max_window_days: i32,
    ) -> Self {
        Self {
            locator,
            fetcher,
            publisher,
            ledger,
            max_window_days,
        }
    }

    /// Process every firing position of `year` in `feed`, strictly in order.
    ///
    /// Positions a previous run already published are skipped. Per-record
    /// failures are collected into the summary; only ledger errors around
    /// the run itself are returned.
    pub fn run(&self, feed: &Feed, year: i16) -> storage::Result<BatchSummary> {
        let mut run = HarvestRun {
            id: Uuid::new_v4(),
            year,
            started_at: Timestamp::now(),
            status: RunStatus::Running,
        };
        match self.previous_run(year) {
            Ok(Some(previous)) => report_previous(&previous),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not read previous run from ledger"),
        }

        self.ledger.create_run(&run)?;
        let mut done = self.ledger.published_position_ids()?;
        tracing::info!(run = %run.id, year, already_published = done.len(), "starting harvest");

        let mut summary = BatchSummary {
            run_id: run.id,
            published: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        for position in firing_positions(feed, year) {
            let outcome = if done.contains(&position.id) {
                tracing::debug!(position = %position.id, "already published, skipping");
                summary.skipped.push(position.id.clone());
                Outcome::Skipped
            } else {
                match self.process(&position) {
                    Ok(published) => {
                        tracing::info!(
                            position = %position.id,
                            record = %published.record_id,
                            scene = %published.scene_id,
                            "published"
                        );
                        done.insert(position.id.clone());
                        let outcome = Outcome::Published {
                            record_id: published.record_id.clone(),
                            scene_id: published.scene_id.clone(),
                        };
                        summary.published.push(published);
                        outcome
                    }
                    Err(failure) => {
                        let reason = failure.error.to_string();
                        tracing::warn!(
                            position = %failure.position_id,
                            stage = %failure.stage,
                            error = %reason,
                            "record failed"
                        );
                        summary.failed.push(FailedRecord {
                            position_id: failure.position_id,
                            stage: failure.stage,
                            reason: reason.clone(),
                        });
                        Outcome::Failed {
                            stage: failure.stage,
                            reason,
                        }
                    }
                }
            };
            self.remember(run.id, &position, outcome);
        }

        run.status = RunStatus::Completed {
            finished_at: Timestamp::now(),
            published: count(summary.published.len()),
            failed: count(summary.failed.len()),
            skipped: count(summary.skipped.len()),
        };
        self.ledger.update_run(&run)?;
        tracing::info!(
            run = %run.id,
            published = summary.published.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "harvest complete"
        );
        Ok(summary)
    }

    /// The most recent run for `year` and its recorded outcomes.
    pub fn previous_run(&self, year: i16) -> storage::Result<Option<PreviousRun>> {
        let Some(run) = self.ledger.last_run(year)? else {
            return Ok(None);
        };
        let outcomes = self.ledger.load_outcomes(run.id)?;
        Ok(Some(PreviousRun { run, outcomes }))
    }

    /// Take one position from `Filtered` to `Published`.
    pub fn process(&self, position: &FiringPosition) -> Result<PublishedRecord, RecordFailure> {
        let fail = |stage, error| RecordFailure {
            position_id: position.id.clone(),
            stage,
            error,
        };

        let imagery = self
            .locator
            .locate(position)
            .map_err(|e| fail(Stage::Located, HarvestError::Locate(e)))?
            .ok_or_else(|| {
                fail(
                    Stage::Located,
                    HarvestError::ImageryNotFound {
                        date: position.date,
                        max_window_days: self.max_window_days,
                    },
                )
            })?;
        tracing::debug!(
            position = %position.id,
            scene = %imagery.scene.id,
            delta_hours = imagery.delta.as_hours(),
            "located"
        );

        let tile = self
            .fetcher
            .fetch(&imagery)
            .map_err(|e| fail(Stage::Fetched, HarvestError::ImageryDownload(e)))?;

        let record = HarvestRecord {
            position: position.clone(),
            imagery,
            tiles: vec![tile],
        };
        self.publisher
            .publish(&record)
            .map_err(|e| fail(Stage::Published, HarvestError::Publish(e)))
    }

    /// Write an outcome to the ledger. A failed write is logged, not fatal.
    fn remember(&self, run_id: Uuid, position: &FiringPosition, outcome: Outcome) {
        let entry = RecordOutcome {
            run_id,
            position_id: position.id.clone(),
            outcome,
            recorded_at: Timestamp::now(),
        };
        if let Err(e) = self.ledger.record_outcome(&entry) {
            tracing::error!(position = %position.id, error = %e, "failed to record outcome");
        }
    }
}

fn report_previous(previous: &PreviousRun) {
    let run = &previous.run;
    match run.status {
        RunStatus::Running => tracing::warn!(
            run = %run.id,
            started = %run.started_at,
            recorded = previous.outcomes.len(),
            failed = previous.failed(),
            "previous run for this year did not finish"
        ),
        RunStatus::Completed {
            finished_at,
            published,
            failed,
            skipped,
        } => tracing::info!(
            run = %run.id,
            finished = %finished_at,
            published,
            failed,
            skipped,
            "previous run for this year"
        ),
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::feed::tests::{feature_json, feed_json};
    use crate::imagery::{
        FakeArchive, ImageryArchive, LocatorPolicy, TileSize, sample_position, sample_scene,
    };
    use crate::publish::{RecordStore, StoreError};
    use crate::publish::tests::{FakeStore, no_wait};

    /// Everything a harvester borrows, owned in one place.
    struct Fixture {
        dir: TempDir,
        archive: FakeArchive,
        store: FakeStore,
        ledger: Storage,
    }

    impl Fixture {
        fn new(archive: FakeArchive) -> Self {
            let dir = TempDir::new().unwrap();
            let ledger = Storage::open(dir.path().join("ledger.sqlite")).unwrap();
            Self {
                dir,
                archive,
                store: FakeStore::default(),
                ledger,
            }
        }

        fn harvester(&self) -> Harvester<'_> {
            harvester_with(&self.archive, &self.store, &self.ledger, &self.dir)
        }
    }

    fn harvester_with<'a>(
        archive: &'a dyn ImageryArchive,
        store: &'a dyn RecordStore,
        ledger: &'a Storage,
        dir: &TempDir,
    ) -> Harvester<'a> {
        let policy = LocatorPolicy::default();
        let max_window_days = policy.max_window_days;
        Harvester::new(
            Locator::new(archive, policy),
            Fetcher::new(archive, dir.path().join("tiles"), TileSize::default()).unwrap(),
            Publisher::new(store, no_wait()),
            ledger,
            max_window_days,
        )
    }

    /// Two 2023 positions and one from 2022, all firing positions.
    fn sample_feed() -> Feed {
        Feed::parse(&feed_json(vec![
            feature_json(1, "2023-04-12", "Russian Firing Positions", 37.8, 48.1),
            feature_json(2, "2023-09-01", "Russian Firing Positions", 37.8, 48.1),
            feature_json(3, "2022-04-12", "Russian Firing Positions", 37.8, 48.1),
        ]))
        .unwrap()
    }

    /// A single scene, two days after the first position.
    fn sample_archive() -> FakeArchive {
        FakeArchive::with(vec![sample_scene(
            "S2A_T37UDQ",
            "2023-04-14T08:40:00Z",
            Some(3.0),
        )])
    }

    #[test]
    fn end_to_end_publishes_matched_and_fails_unmatched() {
        let fx = Fixture::new(sample_archive());

        let summary = fx.harvester().run(&sample_feed(), 2023).unwrap();

        assert_eq!(summary.published.len(), 1);
        assert_eq!(summary.published[0].position_id, "1");
        assert_eq!(summary.published[0].scene_id, "S2A_T37UDQ");
        assert_eq!(
            summary.failed,
            vec![FailedRecord {
                position_id: "2".into(),
                stage: Stage::Located,
                reason: "no imagery within ±30 days of 2023-09-01".into(),
            }]
        );
        assert!(summary.skipped.is_empty());

        // The 2022 position never reached the store.
        let rows = fx.store.rows.borrow();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1["ID"], "1");
    }

    #[test]
    fn run_is_written_to_the_ledger() {
        let fx = Fixture::new(sample_archive());

        let summary = fx.harvester().run(&sample_feed(), 2023).unwrap();

        let run = fx.ledger.load_run(summary.run_id).unwrap();
        assert!(matches!(
            run.status,
            RunStatus::Completed {
                published: 1,
                failed: 1,
                skipped: 0,
                ..
            }
        ));
        let outcomes = fx.ledger.load_outcomes(summary.run_id).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].outcome, Outcome::Published { .. }));
        assert!(matches!(
            outcomes[1].outcome,
            Outcome::Failed {
                stage: Stage::Located,
                ..
            }
        ));
    }

    #[test]
    fn second_run_skips_published_positions() {
        let fx = Fixture::new(sample_archive());
        let feed = sample_feed();

        fx.harvester().run(&feed, 2023).unwrap();
        let second = fx.harvester().run(&feed, 2023).unwrap();

        assert_eq!(second.skipped, vec!["1".to_string()]);
        assert!(second.published.is_empty());
        assert_eq!(second.failed.len(), 1);
        assert_eq!(fx.store.create_calls.get(), 1);
    }

    #[test]
    fn previous_run_reports_the_last_one_for_the_year() {
        let fx = Fixture::new(sample_archive());
        assert!(fx.harvester().previous_run(2023).unwrap().is_none());

        let first = fx.harvester().run(&sample_feed(), 2023).unwrap();
        let previous = fx.harvester().previous_run(2023).unwrap().unwrap();

        assert_eq!(previous.run.id, first.run_id);
        assert_eq!(previous.outcomes.len(), 2);
        assert_eq!(previous.failed(), 1);
        assert!(fx.harvester().previous_run(2022).unwrap().is_none());
    }

    #[test]
    fn interrupted_previous_run_shows_as_running() {
        let fx = Fixture::new(sample_archive());
        let interrupted = HarvestRun {
            id: Uuid::new_v4(),
            year: 2023,
            started_at: Timestamp::now(),
            status: RunStatus::Running,
        };
        fx.ledger.create_run(&interrupted).unwrap();

        let previous = fx.harvester().previous_run(2023).unwrap().unwrap();
        assert_eq!(previous.run.status, RunStatus::Running);

        // A fresh run still goes ahead.
        let summary = fx.harvester().run(&sample_feed(), 2023).unwrap();
        assert_eq!(summary.published.len(), 1);
    }

    #[test]
    fn duplicate_feed_entries_publish_once() {
        let fx = Fixture::new(sample_archive());
        let feed = Feed::parse(&feed_json(vec![
            feature_json(1, "2023-04-12", "Russian Firing Positions", 37.8, 48.1),
            feature_json(1, "2023-04-12", "Russian Firing Positions", 37.8, 48.1),
        ]))
        .unwrap();

        let summary = fx.harvester().run(&feed, 2023).unwrap();

        assert_eq!(summary.published.len(), 1);
        assert_eq!(summary.skipped, vec!["1".to_string()]);
    }

    #[test]
    fn publish_failure_is_recorded_at_published_stage() {
        let fx = Fixture::new(sample_archive());
        fx.store
            .create_failures
            .borrow_mut()
            .push_back(StoreError::Rejected {
                status: 422,
                message: "INVALID_VALUE_FOR_COLUMN".into(),
            });

        let failure = fx
            .harvester()
            .process(&sample_position("1", jiff::civil::date(2023, 4, 12)))
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Published);
        assert!(matches!(failure.error, HarvestError::Publish(_)));
        assert!(fx.store.rows.borrow().is_empty());
    }

    #[test]
    fn archive_error_is_recorded_at_located_stage() {
        struct BrokenArchive;

        impl ImageryArchive for BrokenArchive {
            fn search(
                &self,
                _: &crate::imagery::SceneQuery,
            ) -> crate::imagery::Result<Vec<crate::model::Scene>> {
                Err(ArchiveError::Auth("bad credentials".into()))
            }

            fn download(
                &self,
                _: &crate::model::Scene,
                _: &crate::model::BoundingBox,
                _: TileSize,
            ) -> crate::imagery::Result<Vec<u8>> {
                unreachable!("nothing is located")
            }
        }

        let dir = TempDir::new().unwrap();
        let ledger = Storage::open(dir.path().join("ledger.sqlite")).unwrap();
        let store = FakeStore::default();
        let harvester = harvester_with(&BrokenArchive, &store, &ledger, &dir);

        let summary = harvester.run(&sample_feed(), 2023).unwrap();

        assert!(summary.published.is_empty());
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed.iter().all(|f| f.stage == Stage::Located));
        assert_eq!(store.create_calls.get(), 0);
    }

    #[test]
    fn empty_tile_is_recorded_at_fetched_stage() {
        struct BlankArchive(FakeArchive);

        impl ImageryArchive for BlankArchive {
            fn search(
                &self,
                query: &crate::imagery::SceneQuery,
            ) -> crate::imagery::Result<Vec<crate::model::Scene>> {
                self.0.search(query)
            }

            fn download(
                &self,
                _: &crate::model::Scene,
                _: &crate::model::BoundingBox,
                _: TileSize,
            ) -> crate::imagery::Result<Vec<u8>> {
                Ok(Vec::new())
            }
        }

        let dir = TempDir::new().unwrap();
        let ledger = Storage::open(dir.path().join("ledger.sqlite")).unwrap();
        let store = FakeStore::default();
        let archive = BlankArchive(sample_archive());
        let harvester = harvester_with(&archive, &store, &ledger, &dir);

        let failure = harvester
            .process(&sample_position("1", jiff::civil::date(2023, 4, 12)))
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Fetched);
        assert!(matches!(
            failure.error,
            HarvestError::ImageryDownload(FetchError::Empty { .. })
        ));
        assert_eq!(store.create_calls.get(), 0);
    }

    #[test]
    fn summary_lists_failures() {
        let summary = BatchSummary {
            run_id: Uuid::nil(),
            published: Vec::new(),
            failed: vec![FailedRecord {
                position_id: "42".into(),
                stage: Stage::Fetched,
                reason: "imagery download failed: timed out".into(),
            }],
            skipped: vec!["7".into()],
        };

        assert_eq!(
            summary.to_string(),
            "Run 00000000-0000-0000-0000-000000000000: 0 published, 1 failed, 1 skipped\n  \
             42: not fetched: imagery download failed: timed out"
        );
    }
}
