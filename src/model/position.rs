//! Firing positions: point reports read from the feed.

use jiff::civil::Date;
use serde::{Deserialize, Serialize};

/// Source label written to every published record.
pub const DEFAULT_SOURCE: &str = "CIR";

/// A single reported firing position.
///
/// Immutable once read from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiringPosition {
    /// Feed identifier, stringified when the feed carries a number.
    pub id: String,

    /// Verification date of the report.
    pub date: Date,

    /// The feed's `type` field.
    pub category: Option<String>,

    /// Every category label attached to the report.
    pub categories: Vec<String>,

    pub description: Option<String>,

    /// Who produced the report.
    pub source: String,

    pub longitude: f64,
    pub latitude: f64,

    /// Link to the original footage or post.
    pub url: Option<String>,

    /// Supplementary report fields, passed through to the store when present.
    pub details: PositionDetails,
}

/// Optional report fields beyond the core position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDetails {
    pub geolocation_url: Option<String>,
    pub status: Option<String>,
    pub country: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub violence_level: Option<String>,
    pub civilian_casualties: Option<bool>,
}
