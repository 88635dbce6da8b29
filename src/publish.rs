//! Record publishing: harvest records to rows in the record store.
//!
//! A row is created from the record's fields, then each tile is attached.
//! If an attachment fails the row is deleted again, so the store never
//! holds a record without its imagery.

mod airtable;
mod fields;
mod retry;

use std::{fs, io, path::PathBuf, time::Duration};

use serde_json::{Map, Value};

use crate::model::{HarvestRecord, PublishedRecord, Tile};

pub use airtable::Airtable;
pub use fields::{ATTACHMENT_FIELD, record_fields};
pub use retry::{RetryPolicy, with_retry, with_retry_if};

/// Errors from a single record store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rate limited by record store")]
    RateLimited { retry_after: Option<Duration> },

    #[error("record store unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Validation, schema, or auth failure: retrying won't help.
    #[error("record store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid record store request: {0}")]
    InvalidRequest(String),

    /// The store accepted the call but its answer made no sense.
    #[error("unreadable record store response: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl StoreError {
    /// Whether the same request might succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Transport(_)
        )
    }

    /// Whether the store certainly did not act on the request, so sending
    /// it again cannot repeat a side effect.
    ///
    /// A 5xx or a timeout may arrive after the store already committed.
    pub fn is_unprocessed(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// Errors from publishing a whole record.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{0}")]
    Rejected(StoreError),

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: usize, source: StoreError },

    #[error("failed to read tile {}: {source}", path.display())]
    Tile { path: PathBuf, source: io::Error },

    #[error("record has no tiles to attach")]
    NoTiles,
}

/// A file to attach to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A tabular store that accepts new rows with attachments.
pub trait RecordStore {
    /// Create a row and return its identifier.
    fn create(&self, fields: &Map<String, Value>) -> Result<String, StoreError>;

    /// Attach a file to `field` of an existing row.
    fn attach(&self, record_id: &str, field: &str, attachment: &Attachment)
    -> Result<(), StoreError>;

    fn delete(&self, record_id: &str) -> Result<(), StoreError>;
}

/// Writes harvest records to a [`RecordStore`].
pub struct Publisher<'a> {
    store: &'a dyn RecordStore,
    retry: RetryPolicy,
}

impl<'a> Publisher<'a> {
    pub fn new(store: &'a dyn RecordStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Publish `record` as one new row with its tiles attached.
    ///
    /// Tiles are read before anything is sent, and a row whose
    /// attachments fail is deleted again.
    pub fn publish(&self, record: &HarvestRecord) -> Result<PublishedRecord, PublishError> {
        if record.tiles.is_empty() {
            return Err(PublishError::NoTiles);
        }
        let attachments = record
            .tiles
            .iter()
            .map(|tile| read_attachment(record, tile))
            .collect::<Result<Vec<_>, _>>()?;

        let fields = record_fields(record);
        // Creating twice would leave an orphan row, so only resend when the
        // first attempt never reached the store.
        let record_id = with_retry_if(
            &self.retry,
            "create row",
            StoreError::is_unprocessed,
            || self.store.create(&fields),
        )
        .inspect_err(|e| {
            tracing::warn!(
                position = %record.position.id,
                error = %e,
                "row creation failed or is unconfirmed"
            );
        })?;

        for attachment in &attachments {
            let attached = with_retry(&self.retry, "attach tile", || {
                self.store.attach(&record_id, ATTACHMENT_FIELD, attachment)
            });
            if let Err(e) = attached {
                self.roll_back(&record_id);
                return Err(e);
            }
        }

        tracing::debug!(
            position = %record.position.id,
            record = %record_id,
            tiles = attachments.len(),
            "published record"
        );
        Ok(PublishedRecord {
            position_id: record.position.id.clone(),
            record_id,
            scene_id: record.imagery.scene.id.clone(),
        })
    }

    fn roll_back(&self, record_id: &str) {
        match with_retry(&self.retry, "delete row", || self.store.delete(record_id)) {
            Ok(()) => tracing::info!(record = %record_id, "removed partially published row"),
            Err(e) => tracing::error!(
                record = %record_id,
                error = %e,
                "failed to remove partially published row"
            ),
        }
    }
}

fn read_attachment(record: &HarvestRecord, tile: &Tile) -> Result<Attachment, PublishError> {
    let bytes = fs::read(&tile.path).map_err(|source| PublishError::Tile {
        path: tile.path.clone(),
        source,
    })?;
    let day = record
        .imagery
        .scene
        .acquired_at
        .to_zoned(jiff::tz::TimeZone::UTC)
        .date();
    Ok(Attachment {
        filename: format!("Sentinel-2 {day} {}.png", record.position.id),
        content_type: "image/png".to_string(),
        bytes,
    })
}
