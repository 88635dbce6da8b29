//! On-disk feed cache.
//!
//! The raw feed body is kept zstd-compressed next to a small JSON sidecar:
//!
//! ```text
//! <cache>/
//!   events.geojson.zst   # Raw feed body, compressed
//!   events.meta.json     # Source URL, fetch time, size, SHA-256
//! ```

use std::{fs, path::PathBuf};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::write_atomic;

use super::{Feed, FeedError, FeedSource, Result};

const BODY_FILE: &str = "events.geojson.zst";
const META_FILE: &str = "events.meta.json";
const ZSTD_LEVEL: i32 = 3;

/// Sidecar describing the cached body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheMeta {
    url: String,
    fetched_at: Timestamp,
    bytes: u64,
    sha256: String,
}

/// Feed cache rooted at a directory.
pub struct FeedCache {
    dir: PathBuf,
    max_age: SignedDuration,
}

impl FeedCache {
    /// Creates a cache in `dir`, treating entries older than `max_age` as stale.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(dir: impl Into<PathBuf>, max_age: SignedDuration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_age })
    }

    /// Returns the feed, fetching from `source` only when needed.
    ///
    /// A fresh cache entry for the same URL is used as-is unless `refresh`
    /// is set. When fetching fails, any readable cache entry is used
    /// instead (with a warning); without one the feed is unavailable.
    pub fn load(&self, source: &dyn FeedSource, refresh: bool) -> Result<Feed> {
        self.load_at(source, refresh, Timestamp::now())
    }

    fn load_at(&self, source: &dyn FeedSource, refresh: bool, now: Timestamp) -> Result<Feed> {
        let meta = self.read_meta();
        let fresh = !refresh
            && meta.as_ref().is_some_and(|m| {
                m.url == source.url() && now.duration_since(m.fetched_at) <= self.max_age
            });

        if fresh {
            match self.read_body() {
                Ok(feed) => {
                    tracing::info!(
                        features = feed.features.len(),
                        "using cached feed"
                    );
                    return Ok(feed);
                }
                Err(e) => tracing::warn!(error = %e, "cached feed unreadable, refetching"),
            }
        }

        match self.refresh_from(source, now, meta.as_ref()) {
            Ok(feed) => Ok(feed),
            Err(fetch_err) => match self.read_body() {
                Ok(feed) => {
                    tracing::warn!(
                        url = source.url(),
                        error = %fetch_err,
                        fetched_at = ?meta.map(|m| m.fetched_at),
                        "feed fetch failed, falling back to cached copy"
                    );
                    Ok(feed)
                }
                Err(_) => Err(FeedError::Unavailable {
                    url: source.url().to_string(),
                    reason: fetch_err.to_string(),
                }),
            },
        }
    }

    /// Fetch, validate, and persist a new copy of the feed.
    ///
    /// The body is parsed before anything is written, so a broken
    /// response never replaces a good cache entry.
    fn refresh_from(
        &self,
        source: &dyn FeedSource,
        now: Timestamp,
        previous: Option<&CacheMeta>,
    ) -> Result<Feed> {
        let body = source.fetch()?;
        let feed = Feed::parse(&body)?;

        let sha256 = hex::encode(Sha256::digest(&body));
        let unchanged = previous.is_some_and(|m| m.sha256 == sha256);

        let compressed = zstd::encode_all(body.as_slice(), ZSTD_LEVEL)?;
        write_atomic(&self.dir.join(BODY_FILE), &compressed)?;

        let meta = CacheMeta {
            url: source.url().to_string(),
            fetched_at: now,
            bytes: body.len() as u64,
            sha256,
        };
        write_atomic(
            &self.dir.join(META_FILE),
            serde_json::to_string_pretty(&meta)?.as_bytes(),
        )?;

        tracing::info!(
            url = source.url(),
            features = feed.features.len(),
            bytes = meta.bytes,
            sha256 = %meta.sha256,
            unchanged,
            "fetched feed"
        );
        Ok(feed)
    }

    fn read_meta(&self) -> Option<CacheMeta> {
        let json = fs::read_to_string(self.dir.join(META_FILE)).ok()?;
        serde_json::from_str(&json).ok()
    }

    fn read_body(&self) -> Result<Feed> {
        let file = fs::File::open(self.dir.join(BODY_FILE))?;
        let body = zstd::decode_all(file)?;
        Feed::parse(&body)
    }
}
