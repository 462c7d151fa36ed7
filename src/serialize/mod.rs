//! Tile persistence: the `{out}/{z}/{x}/{y}.terrain` layout with gzip
//! compression and crash-safe renames, plus the `layer.json` sidecar.

mod layer;

pub use layer::{write_layer_json, LayerDescription};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::trace;
use once_cell::sync::Lazy;

use crate::error::TerrainResult;
use crate::grid::TileCoordinate;

/// Serializing a tile either wrote it or skipped an existing file in
/// resume mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeOutcome {
    Written,
    Skipped,
}

/// Directory creation is checked-then-done; one process-wide mutex keeps
/// concurrent workers from racing the check.
static MKDIR: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TileSerializer {
    out_dir: PathBuf,
    resume: bool,
}

impl TileSerializer {
    pub fn new<P: Into<PathBuf>>(out_dir: P, resume: bool) -> Self {
        Self { out_dir: out_dir.into(), resume }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// The on-disk path of one tile.
    pub fn tile_path(&self, coord: &TileCoordinate) -> PathBuf {
        self.out_dir
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.terrain", coord.y))
    }

    /// Whether serialization would skip this tile (resume mode, file
    /// already present). Callers use this to avoid producing the tile at
    /// all.
    pub fn would_skip(&self, coord: &TileCoordinate) -> bool {
        self.resume && self.tile_path(coord).exists()
    }

    /// Gzip `payload` to `{z}/{x}/{y}.terrain`, writing through a `.tmp`
    /// sibling and renaming into place.
    pub fn serialize(
        &self,
        coord: &TileCoordinate,
        payload: &[u8],
    ) -> TerrainResult<SerializeOutcome> {
        let path = self.tile_path(coord);
        if self.resume && path.exists() {
            trace!("skipping existing tile {coord}");
            return Ok(SerializeOutcome::Skipped);
        }

        {
            let _guard = MKDIR.lock().unwrap();
            let parent = path.parent().expect("tile path has a parent");
            if !parent.is_dir() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("terrain.tmp");
        {
            let file = fs::File::create(&tmp)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(payload)?;
            encoder.finish()?;
        }
        fs::rename(&tmp, &path)?;
        trace!("wrote tile {coord}");

        Ok(SerializeOutcome::Written)
    }
}
