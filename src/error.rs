//! Central error handling for the tile pipeline.
//!
//! Module-local errors (`RasterError`, `GeoError`) fold into `TerrainError`
//! so callers above the tiler see a single error surface.

use crate::geo::GeoError;
use crate::raster::RasterError;

#[derive(thiserror::Error, Debug)]
pub enum TerrainError {
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("the source dataset has no spatial reference system assigned")]
    MissingSrs,

    #[error("invalid zoom range: start zoom {start} is less than end zoom {end}")]
    InvalidZoomRange { start: u8, end: u8 },

    #[error("invalid heightfield size {0}: expected 2^n + 1")]
    InvalidHeightfieldSize(usize),

    #[error("invalid tile size {0}: must be at least 2")]
    InvalidTileSize(u32),

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TerrainError {
    pub fn encode<T: ToString>(msg: T) -> Self {
        TerrainError::Encode(msg.to_string())
    }
}

/// Result type alias for pipeline operations.
pub type TerrainResult<T> = Result<T, TerrainError>;
