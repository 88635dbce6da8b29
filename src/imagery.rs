//! Satellite imagery: finding the nearest scene and downloading its tiles.
//!
//! The archive itself sits behind [`ImageryArchive`], which only knows
//! how to search a catalog and render a tile. Matching policy lives in
//! [`Locator`], local tile storage in [`Fetcher`].

mod copernicus;
mod fetcher;
mod locator;

use jiff::civil::Date;
use serde::Deserialize;

use crate::model::{BoundingBox, Scene};

pub use copernicus::Copernicus;
pub use fetcher::{FetchError, Fetcher};
pub use locator::{Locator, LocatorPolicy};

#[cfg(test)]
pub(crate) use locator::tests::{FakeArchive, sample_position, sample_scene};

/// Errors from talking to the imagery archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected archive response: {0}")]
    UnexpectedContent(String),

    #[error("invalid search: {0}")]
    InvalidQuery(String),
}

pub type Result<T> = core::result::Result<T, ArchiveError>;

/// A catalog search: scenes over an area within a date range.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneQuery {
    pub area: BoundingBox,

    /// First day of the window, inclusive.
    pub from: Date,

    /// Last day of the window, inclusive.
    pub to: Date,

    /// Upper bound on cloud cover, in percent.
    pub max_cloud_cover: Option<f64>,
}

/// Output raster dimensions, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl Default for TileSize {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

/// An imagery archive with a searchable catalog.
pub trait ImageryArchive {
    /// Scenes matching the query, in the archive's own order.
    fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>>;

    /// Render `area` from `scene` as a PNG tile.
    fn download(&self, scene: &Scene, area: &BoundingBox, size: TileSize) -> Result<Vec<u8>>;
}
