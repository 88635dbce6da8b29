//! Imagery types: scenes, search areas, and matches.

use std::path::PathBuf;

use geo::{BoundingRect, Coord, Destination, Geometry, Haversine, Intersects, Point, Rect};
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

/// An axis-aligned WGS84 bounding box, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Wsen", into = "Wsen")]
pub struct BoundingBox(Rect);

impl BoundingBox {
    pub fn from_wsen(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self(Rect::new(
            Coord { x: west, y: south },
            Coord { x: east, y: north },
        ))
    }

    /// A box reaching `buffer_km` from a point in each cardinal direction,
    /// measured along great circles.
    ///
    /// A buffer that would cross a pole or the antimeridian is clamped to
    /// the edge of the coordinate range.
    pub fn around(longitude: f64, latitude: f64, buffer_km: f64) -> Self {
        let origin = Point::new(longitude, latitude);
        let meters = buffer_km * 1000.0;
        let toward = |bearing: f64| Haversine.destination(origin, bearing, meters);

        let north = toward(0.0).y();
        let south = toward(180.0).y();
        let east = toward(90.0).x();
        let west = toward(270.0).x();

        Self::from_wsen(
            if (-180.0..=longitude).contains(&west) { west } else { -180.0 },
            if (-90.0..=latitude).contains(&south) { south } else { -90.0 },
            if (longitude..=180.0).contains(&east) { east } else { 180.0 },
            if (latitude..=90.0).contains(&north) { north } else { 90.0 },
        )
    }

    /// Bounding box of a footprint geometry; `None` for an empty one.
    pub fn enclosing(geometry: &Geometry) -> Option<Self> {
        geometry.bounding_rect().map(Self)
    }

    /// Whether the two boxes share any area (touching edges count).
    pub fn intersects(&self, other: &Self) -> bool {
        self.0.intersects(&other.0)
    }

    pub fn center(&self) -> (f64, f64) {
        self.0.center().x_y()
    }

    pub fn west(&self) -> f64 {
        self.0.min().x
    }

    pub fn south(&self) -> f64 {
        self.0.min().y
    }

    pub fn east(&self) -> f64 {
        self.0.max().x
    }

    pub fn north(&self) -> f64 {
        self.0.max().y
    }

    /// `[west, south, east, north]`, the order catalog APIs expect.
    pub fn to_array(&self) -> [f64; 4] {
        [self.west(), self.south(), self.east(), self.north()]
    }
}

/// Serialized form of a [`BoundingBox`].
#[derive(Serialize, Deserialize)]
struct Wsen {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl From<Wsen> for BoundingBox {
    fn from(b: Wsen) -> Self {
        Self::from_wsen(b.west, b.south, b.east, b.north)
    }
}

impl From<BoundingBox> for Wsen {
    fn from(b: BoundingBox) -> Self {
        Self {
            west: b.west(),
            south: b.south(),
            east: b.east(),
            north: b.north(),
        }
    }
}

/// One catalog entry in the imagery archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub acquired_at: Timestamp,
    pub footprint: BoundingBox,

    /// Cloud cover percentage, when the archive reports it.
    pub cloud_cover: Option<f64>,
}

/// The scene chosen for a firing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageryMatch {
    pub scene: Scene,

    /// The area around the position that tiles are cut from.
    pub area: BoundingBox,

    /// Absolute distance between acquisition and the report anchor.
    pub delta: SignedDuration,

    /// Half-width, in days, of the search window that produced the match.
    pub window_days: i32,
}

/// A tile on local disk, cut from a matched scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub scene_id: String,
    pub path: PathBuf,
}
