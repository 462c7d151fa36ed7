//! terratile: compile a georeferenced DTM raster into a pyramid of Cesium
//! terrain tiles.
//!
//! The pipeline maps a source raster onto a TMS tiling grid (Global Geodetic
//! or Global Mercator), extracts a reprojected, resampled height window for
//! every tile coordinate that overlaps the raster, and encodes each window
//! either as a heightmap-1.0 tile (65x65 quantized heights) or as a
//! quantized-mesh-1.0 tile (an irregular triangle mesh produced by a
//! chunked-LOD simplification of the height grid). Tiles land on disk as
//! gzipped `{z}/{x}/{y}.terrain` files.

pub mod error;
pub mod geo;
pub mod geometry;
pub mod grid;
pub mod heightfield;
pub mod pipeline;
pub mod raster;
pub mod serialize;
pub mod tile;
pub mod tiler;

pub use error::{TerrainError, TerrainResult};
pub use grid::{Grid, GridIterator, TileCoordinate};
