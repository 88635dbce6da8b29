//! Harvest records: what gets written to the record store.

use serde::{Deserialize, Serialize};

use super::{FiringPosition, ImageryMatch, Tile};

/// A firing position joined with its imagery, ready to publish.
///
/// Only constructed once tiles are on disk, so a record never
/// exists without imagery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRecord {
    pub position: FiringPosition,
    pub imagery: ImageryMatch,
    pub tiles: Vec<Tile>,
}

/// A record that made it into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRecord {
    pub position_id: String,
    pub record_id: String,
    pub scene_id: String,
}
