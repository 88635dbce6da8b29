//! Harvester configuration.
//!
//! Credentials and per-deployment values come from the environment (a
//! `.env` file in the working directory is honoured). Policy knobs come
//! from an optional TOML file, `~/.tile-harvester/config.toml` unless
//! `HARVEST_CONFIG` names another one. Command-line values beat the
//! environment, which beats the file, which beats the built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use jiff::SignedDuration;
use serde::Deserialize;

use crate::imagery::{LocatorPolicy, TileSize};
use crate::publish::RetryPolicy;

pub const DEFAULT_FEED_URL: &str = "https://eyesonrussia.org/events.geojson";
pub const DEFAULT_TABLE: &str = "Firing Positions";
pub const DEFAULT_YEAR: i16 = 2023;
pub const DEFAULT_DATA_DIR: &str = "data";

/// Years the harvester accepts, from the command line or `HARVEST_YEAR`.
pub const YEAR_RANGE: std::ops::RangeInclusive<i16> = 1900..=2100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {}: {reason}", path.display())]
    Settings { path: PathBuf, reason: String },
}

pub type Result<T> = core::result::Result<T, ConfigError>;

/// Tunables read from the TOML settings file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Settings {
    pub feed_url: String,

    /// A cached feed older than this is fetched again.
    pub feed_max_age_hours: u32,

    pub data_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub locator: LocatorPolicy,
    pub tile: TileSize,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            feed_max_age_hours: 24,
            data_dir: None,
            http_timeout_secs: 60,
            locator: LocatorPolicy::default(),
            tile: TileSize::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn parse(contents: &str) -> core::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Read settings from `path`.
    ///
    /// A missing file yields the defaults unless `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Settings {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        Self::parse(&contents).map_err(|e| ConfigError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The default settings path: `~/.tile-harvester/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tile-harvester").join("config.toml"))
    }

    pub fn feed_max_age(&self) -> SignedDuration {
        SignedDuration::from_hours(i64::from(self.feed_max_age_hours))
    }
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub copernicus_user: String,
    pub copernicus_password: String,
    pub airtable_api_key: String,
    pub airtable_base_id: String,
    pub airtable_table: String,
    pub year: i16,
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl Config {
    /// Load from the process environment and the settings file.
    pub fn load(year: Option<i16>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let lookup = |name: &str| std::env::var(name).ok();

        let settings = match lookup("HARVEST_CONFIG") {
            Some(path) if !path.trim().is_empty() => Settings::load(Path::new(&path), true)?,
            _ => match Settings::default_path() {
                Some(path) => Settings::load(&path, false)?,
                None => Settings::default(),
            },
        };

        Self::resolve(lookup, settings, year)
    }

    /// Combine environment values (via `lookup`), file settings, and a
    /// command-line year.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        settings: Settings,
        year: Option<i16>,
    ) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let year = match year {
            Some(year) => year,
            None => match var("HARVEST_YEAR") {
                Some(value) => parse_year(&value)?,
                None => DEFAULT_YEAR,
            },
        };

        let data_dir = var("HARVEST_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| settings.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Ok(Self {
            copernicus_user: required("COPERNICUS_USER")?,
            copernicus_password: required("COPERNICUS_PASSWORD")?,
            airtable_api_key: required("AIRTABLE_API_KEY")?,
            airtable_base_id: required("AIRTABLE_BASE_ID")?,
            airtable_table: var("AIRTABLE_TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            year,
            data_dir,
            settings,
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.data_dir.join("tiles")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.sqlite")
    }

    /// Log which secrets were picked up without revealing them.
    pub fn log_keys(&self) {
        tracing::info!("config loaded:");
        tracing::info!("  COPERNICUS_USER: {}", preview(&self.copernicus_user));
        tracing::info!("  AIRTABLE_API_KEY: {}", preview(&self.airtable_api_key));
        tracing::info!("  AIRTABLE_BASE_ID: {}", self.airtable_base_id);
        tracing::info!("  AIRTABLE_TABLE_NAME: {}", self.airtable_table);
        tracing::info!("  year: {}, data dir: {}", self.year, self.data_dir.display());
    }
}

/// The first few characters of a secret and its length.
fn preview(val: &str) -> String {
    let head: String = val.chars().take(4).collect();
    format!("{head}...({} chars)", val.chars().count())
}

fn parse_year(value: &str) -> Result<i16> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "HARVEST_YEAR",
        value: value.to_string(),
        reason,
    };
    let year: i16 = value.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    if !YEAR_RANGE.contains(&year) {
        return Err(invalid(format!(
            "must be between {} and {}",
            YEAR_RANGE.start(),
            YEAR_RANGE.end()
        )));
    }
    Ok(year)
}
