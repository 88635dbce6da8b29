//! The position feed: fetching, caching, and filtering.
//!
//! The feed is a GeoJSON `FeatureCollection` published over HTTP. It is
//! fetched through a [`FeedSource`], persisted by the [`FeedCache`], and
//! narrowed to one year's firing positions by [`firing_positions`].

mod cache;
mod filter;

use std::io;

use jiff::civil::Date;
use reqwest::blocking::Client;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

use crate::model::{DEFAULT_SOURCE, FiringPosition, PositionDetails};

pub use cache::FeedCache;
pub use filter::firing_positions;

/// Errors from fetching, caching, or parsing the feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// No network copy and no cached copy: nothing to process.
    #[error("feed unavailable from {url}: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed server answered {status}")]
    Status { status: u16 },

    #[error("feed is not a GeoJSON FeatureCollection: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, FeedError>;

/// Where raw feed bytes come from.
pub trait FeedSource {
    /// Identifies the feed, used to tell cache entries apart.
    fn url(&self) -> &str;

    /// Fetch the raw feed body.
    fn fetch(&self) -> Result<Vec<u8>>;
}

/// The feed served over HTTP.
pub struct HttpFeed {
    client: Client,
    url: String,
}

impl HttpFeed {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl FeedSource for HttpFeed {
    fn url(&self) -> &str {
        &self.url
    }

    fn fetch(&self) -> Result<Vec<u8>> {
        tracing::debug!(url = %self.url, "fetching feed");
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

// ── GeoJSON shapes ──

/// A parsed feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Feed {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default, deserialize_with = "readable_features")]
    pub features: Vec<Feature>,
}

impl Feed {
    /// Parse a raw feed body, rejecting anything but a `FeatureCollection`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let feed: Self = serde_json::from_slice(bytes)?;
        if feed.kind != "FeatureCollection" {
            return Err(FeedError::Parse(serde::de::Error::custom(format!(
                "unexpected GeoJSON type '{}'",
                feed.kind
            ))));
        }
        Ok(feed)
    }
}

/// One GeoJSON feature as published by the feed.
///
/// Parts that don't have the expected shape read as absent, so one odd
/// feature never spoils the collection.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default, deserialize_with = "lenient")]
    pub geometry: Option<Geometry>,

    #[serde(default, deserialize_with = "lenient")]
    pub properties: Option<Properties>,
}

/// Feature geometry. Only points are meaningful here.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: Vec<f64>,
    },
    #[serde(other)]
    Other,
}

/// Report fields carried in each feature's `properties`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Properties {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient")]
    pub verified_date: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub categories: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub geoloc_url: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub country: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub province: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub city: Option<String>,
    pub violence_level: Option<Value>,
    pub civ_cas: Option<Value>,
}

impl Feature {
    /// The date part of `verifiedDate`, if present and well-formed.
    pub fn date(&self) -> Option<Date> {
        let raw = self.properties.as_ref()?.verified_date.as_deref()?;
        raw.split('T').next()?.trim().parse().ok()
    }

    /// Point coordinates as `(longitude, latitude)`.
    pub fn point(&self) -> Option<(f64, f64)> {
        match self.geometry.as_ref()? {
            Geometry::Point { coordinates } if coordinates.len() >= 2 => {
                let (lon, lat) = (coordinates[0], coordinates[1]);
                (lon.is_finite() && lat.is_finite()).then_some((lon, lat))
            }
            _ => None,
        }
    }

    pub fn categories(&self) -> &[String] {
        self.properties
            .as_ref()
            .and_then(|p| p.categories.as_deref())
            .unwrap_or_default()
    }

    /// Build a position from this feature.
    ///
    /// Returns `None` when the feature has no usable date or point.
    /// Features without an `id` get one derived from date and location.
    pub fn to_position(&self) -> Option<FiringPosition> {
        let date = self.date()?;
        let (longitude, latitude) = self.point()?;
        let props = self.properties.clone().unwrap_or_default();

        let id = props
            .id
            .as_ref()
            .and_then(scalar_to_string)
            .unwrap_or_else(|| format!("{date}@{longitude:.6},{latitude:.6}"));

        Some(FiringPosition {
            id,
            date,
            category: props.kind,
            categories: props.categories.unwrap_or_default(),
            description: props.description,
            source: DEFAULT_SOURCE.to_string(),
            longitude,
            latitude,
            url: props.url,
            details: PositionDetails {
                geolocation_url: props.geoloc_url,
                status: props.status,
                country: props.country,
                province: props.province,
                city: props.city,
                violence_level: props.violence_level.as_ref().and_then(scalar_to_string),
                civilian_casualties: props.civ_cas.as_ref().and_then(truthy),
            },
        })
    }
}

/// Deserialize `features`, dropping entries that aren't feature objects.
fn readable_features<'de, D>(deserializer: D) -> core::result::Result<Vec<Feature>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(feature) => Some(feature),
            Err(e) => {
                tracing::debug!(index, error = %e, "skipping unreadable feature");
                None
            }
        })
        .collect())
}

/// Read a value of the expected type, or `None` when it has another shape.
fn lenient<'de, D, T>(deserializer: D) -> core::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Strings pass through; numbers are formatted; anything else is absent.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Loose boolean reading of a feed flag.
fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            Some(!matches!(s.as_str(), "" | "0" | "false" | "no"))
        }
        _ => None,
    }
}
