//! CLI interface for the harvester.
//!
//! One command, one pass: load the feed, then locate, fetch, and publish
//! imagery for every firing position reported in the chosen year.

use clap::Parser;

use crate::config::{Config, YEAR_RANGE};
use crate::feed::{FeedCache, HttpFeed};
use crate::harvest::{self, Harvester};
use crate::imagery::{Copernicus, Fetcher, Locator};
use crate::publish::{Airtable, Publisher};
use crate::storage::Storage;
use crate::{http, logging};

/// Harvest satellite imagery for reported firing positions.
#[derive(Debug, Parser)]
#[command(name = "tile-harvester", version, after_long_help = ENV_HELP)]
pub struct Cli {
    /// Year to harvest. Overrides `HARVEST_YEAR`; defaults to 2023.
    #[arg(value_parser = clap::value_parser!(i16)
        .range(i64::from(*YEAR_RANGE.start())..=i64::from(*YEAR_RANGE.end())))]
    pub year: Option<i16>,

    /// Fetch the feed even if the cached copy is still fresh.
    #[arg(long)]
    pub refresh_feed: bool,
}

const ENV_HELP: &str = r"Environment (a .env file is read if present):
  COPERNICUS_USER, COPERNICUS_PASSWORD   Copernicus Data Space login
  AIRTABLE_API_KEY, AIRTABLE_BASE_ID     Airtable credentials
  AIRTABLE_TABLE_NAME                    Target table (default: Firing Positions)
  HARVEST_YEAR                           Year to harvest (default: 2023)
  HARVEST_DATA_DIR                       Cache, tiles, logs, ledger (default: ./data)
  HARVEST_CONFIG                         TOML settings file
                                         (default: ~/.tile-harvester/config.toml)";

/// Run the CLI, returning an error message on failure.
///
/// Individual records failing is not an error; the summary says which.
pub fn run() -> Result<(), String> {
    let cli = Cli::parse();

    let config = Config::load(cli.year).map_err(|e| format!("configuration: {e}"))?;
    let log_path = logging::init(&config.logs_dir())
        .map_err(|e| format!("failed to set up logging in {}: {e}", config.logs_dir().display()))?;
    config.log_keys();

    let ledger = Storage::open(config.ledger_path())
        .map_err(|e| format!("failed to open ledger {}: {e}", config.ledger_path().display()))?;
    let client = http::client(config.settings.http_timeout_secs)
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;

    let cache = FeedCache::new(config.cache_dir(), config.settings.feed_max_age())
        .map_err(|e| format!("failed to open feed cache: {e}"))?;
    let source = HttpFeed::new(client.clone(), &config.settings.feed_url);
    let feed = harvest::load_feed(&cache, &source, cli.refresh_feed).map_err(|e| e.to_string())?;
    tracing::info!(features = feed.features.len(), "feed loaded");

    let archive = Copernicus::new(
        client.clone(),
        &config.copernicus_user,
        &config.copernicus_password,
    );
    let store = Airtable::new(
        client,
        &config.airtable_api_key,
        &config.airtable_base_id,
        &config.airtable_table,
    );

    let policy = config.settings.locator.clone();
    let max_window_days = policy.max_window_days;
    let fetcher = Fetcher::new(&archive, config.tiles_dir(), config.settings.tile)
        .map_err(|e| format!("failed to create tile directory: {e}"))?;
    let harvester = Harvester::new(
        Locator::new(&archive, policy),
        fetcher,
        Publisher::new(&store, config.settings.retry.clone()),
        &ledger,
        max_window_days,
    );

    let summary = harvester
        .run(&feed, config.year)
        .map_err(|e| format!("ledger error: {e}"))?;

    println!("{summary}");
    eprintln!("Full log: {}", log_path.display());
    Ok(())
}
