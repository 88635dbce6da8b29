//! Imagery fetcher: matched scenes to tiles on disk.
//!
//! Tiles live at a path derived from the scene and the search area:
//!
//! ```text
//! <tiles>/<scene id>/<lon>_<lat>.png
//! ```
//!
//! A tile already on disk is never downloaded again.

use std::{fs, io, path::PathBuf};

use crate::model::{ImageryMatch, Tile};
use crate::storage::write_atomic;

use super::{ArchiveError, ImageryArchive, TileSize};

/// Errors from downloading or storing a tile.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("archive returned an empty tile for scene {scene_id}")]
    Empty { scene_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Downloads tiles into a local directory.
pub struct Fetcher<'a> {
    archive: &'a dyn ImageryArchive,
    dir: PathBuf,
    size: TileSize,
}

impl<'a> Fetcher<'a> {
    /// Creates a fetcher storing tiles under `dir`.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(
        archive: &'a dyn ImageryArchive,
        dir: impl Into<PathBuf>,
        size: TileSize,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { archive, dir, size })
    }

    /// Ensure the tile for `imagery` is on disk and return it.
    pub fn fetch(&self, imagery: &ImageryMatch) -> Result<Tile, FetchError> {
        let path = self.tile_path(imagery);
        let scene_id = imagery.scene.id.clone();

        if path.is_file() && fs::metadata(&path)?.len() > 0 {
            tracing::debug!(scene = %scene_id, path = %path.display(), "tile already on disk");
            return Ok(Tile { scene_id, path });
        }

        let bytes = self
            .archive
            .download(&imagery.scene, &imagery.area, self.size)?;
        if bytes.is_empty() {
            return Err(FetchError::Empty { scene_id });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, &bytes)?;

        tracing::info!(
            scene = %scene_id,
            path = %path.display(),
            bytes = bytes.len(),
            "downloaded tile"
        );
        Ok(Tile { scene_id, path })
    }

    /// Deterministic location of the tile for `imagery`.
    pub fn tile_path(&self, imagery: &ImageryMatch) -> PathBuf {
        let (lon, lat) = imagery.area.center();
        self.dir
            .join(sanitize(&imagery.scene.id))
            .join(format!(
                "{lon:.6}_{lat:.6}_{}x{}.png",
                self.size.width, self.size.height
            ))
    }
}

/// Make a scene identifier safe to use as a single path component.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        format!("scene_{cleaned}")
    } else {
        cleaned
    }
}
