//! Log setup: a human-readable stream on stderr and a per-run log file.
//!
//! Stderr honours `RUST_LOG` (default `tile_harvester=info`). The file
//! always records this crate at debug level, without colours.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use jiff::Zoned;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "tile_harvester=info";
const FILE_FILTER: &str = "warn,tile_harvester=debug";

/// Install the global subscriber and return the log file's path.
pub fn init(log_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(&Zoned::now()));
    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;

    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(io::stderr)
                .with_filter(stderr_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new(FILE_FILTER)),
        )
        .try_init()
        .map_err(io::Error::other)?;

    Ok(path)
}

/// `harvest_YYYYMMDD_HHMMSS.log` for the given local time.
fn log_file_name(now: &Zoned) -> String {
    now.strftime("harvest_%Y%m%d_%H%M%S.log").to_string()
}
