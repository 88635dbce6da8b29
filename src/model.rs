//! Core data model for the harvester.
//!
//! Positions come in from the feed, scenes come back from the imagery
//! archive, and records go out to the store. Runs and outcomes are what
//! the local ledger remembers between invocations.

mod imagery;
mod position;
mod record;
mod run;

pub use imagery::{BoundingBox, ImageryMatch, Scene, Tile};
pub use position::{DEFAULT_SOURCE, FiringPosition, PositionDetails};
pub use record::{HarvestRecord, PublishedRecord};
pub use run::{HarvestRun, Outcome, RecordOutcome, RunStatus, Stage};
