//! The tiler: binds a grid profile to a raster dataset, derives the dataset
//! bounds in the grid CRS and the maximum zoom, and materializes per-tile
//! height windows.

mod heightmap;
mod mesh;

pub use heightmap::HeightmapTiler;
pub use mesh::MeshTiler;

use std::sync::Arc;

use glam::DVec2;
use once_cell::sync::Lazy;
use std::sync::Mutex;

use crate::error::{TerrainError, TerrainResult};
use crate::geo::CrsTransform;
use crate::geometry::{CrsBounds, TileBounds};
use crate::grid::{Grid, TileCoordinate};
use crate::raster::{
    GeoTransform, RasterDataset, RasterError, ResampleAlg, TileReader, DEFAULT_MAX_WINDOW_PIXELS,
};
use crate::tile::ChildTiles;

/// Options governing window extraction.
#[derive(Debug, Clone)]
pub struct TilerOptions {
    /// Resampling kernel used by the warp.
    pub resample: ResampleAlg,
    /// Transform approximation error in source pixels; 0 forces exact
    /// per-pixel transforms.
    pub error_threshold: f64,
    /// Memory limit for one window read, in bytes; 0 uses the default.
    pub warp_memory_limit: f64,
}

impl Default for TilerOptions {
    fn default() -> Self {
        Self { resample: ResampleAlg::Average, error_threshold: 0.125, warp_memory_limit: 0.0 }
    }
}

/// Transformed bounds can give slightly different results on different
/// threads unless construction is serialized.
static CONSTRUCTION: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct Tiler {
    dataset: Arc<dyn RasterDataset>,
    grid: Grid,
    options: TilerOptions,
    bounds: CrsBounds,
    resolution: f64,
    requires_reprojection: bool,
}

impl std::fmt::Debug for Tiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tiler")
            .field("grid", &self.grid)
            .field("options", &self.options)
            .field("bounds", &self.bounds)
            .field("resolution", &self.resolution)
            .field("requires_reprojection", &self.requires_reprojection)
            .finish_non_exhaustive()
    }
}

impl Tiler {
    pub fn new(
        dataset: Arc<dyn RasterDataset>,
        grid: Grid,
        options: TilerOptions,
    ) -> TerrainResult<Self> {
        let _guard = CONSTRUCTION.lock().unwrap();

        let gt = dataset.geo_transform();
        let (raster_w, raster_h) = dataset.size();
        let src_bounds = CrsBounds::new(
            gt.0[0],
            gt.0[3] + raster_h as f64 * gt.0[5],
            gt.0[0] + raster_w as f64 * gt.0[1],
            gt.0[3],
        )?;

        let src_srs = dataset.srs().ok_or(TerrainError::MissingSrs)?;

        let (bounds, resolution, requires_reprojection) = if src_srs != grid.srs() {
            let transform = CrsTransform::new(src_srs, grid.srs())?;

            // Transform the four corners and take the axis-aligned envelope.
            let corners = [
                src_bounds.lower_left(),
                src_bounds.upper_right(),
                src_bounds.lower_right(),
                src_bounds.upper_left(),
            ];
            let mut min = DVec2::splat(f64::INFINITY);
            let mut max = DVec2::splat(f64::NEG_INFINITY);
            for corner in corners {
                let p = transform.apply(corner).map_err(TerrainError::Geo)?;
                min = min.min(p);
                max = max.max(p);
            }
            let bounds = CrsBounds::new(min.x, min.y, max.x, max.y)?;
            let resolution = bounds.width() / raster_w as f64;
            (bounds, resolution, true)
        } else {
            (src_bounds, gt.pixel_width().abs(), false)
        };

        Ok(Self { dataset, grid, options, bounds, resolution, requires_reprojection })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn dataset(&self) -> &Arc<dyn RasterDataset> {
        &self.dataset
    }

    pub fn options(&self) -> &TilerOptions {
        &self.options
    }

    /// The dataset extent in the grid CRS.
    pub fn bounds(&self) -> &CrsBounds {
        &self.bounds
    }

    /// The dataset cell resolution in the grid CRS.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn requires_reprojection(&self) -> bool {
        self.requires_reprojection
    }

    /// The deepest zoom whose resolution is at least as fine as the dataset.
    pub fn max_zoom(&self) -> u8 {
        self.grid.zoom_for_resolution(self.resolution)
    }

    pub fn lower_left_tile(&self, zoom: u8) -> TileCoordinate {
        self.grid.crs_to_tile(self.bounds.lower_left(), zoom)
    }

    pub fn upper_right_tile(&self, zoom: u8) -> TileCoordinate {
        self.grid.crs_to_tile(self.bounds.upper_right(), zoom)
    }

    /// The dataset's covered tile rectangle at a zoom level.
    pub fn tile_bounds_for_zoom(&self, zoom: u8) -> TileBounds {
        let ll = self.lower_left_tile(zoom);
        let ur = self.upper_right_tile(zoom);
        TileBounds::ordered(ll.x, ll.y, ur.x, ur.y)
    }

    /// A window reader for one worker. Each worker owns its reader so the
    /// synthetic overview chain is never shared across threads.
    pub fn make_reader(&self) -> TerrainResult<TileReader> {
        let to_source = if self.requires_reprojection {
            let src_srs = self.dataset.srs().ok_or(TerrainError::MissingSrs)?;
            Some(CrsTransform::new(self.grid.srs(), src_srs)?)
        } else {
            None
        };
        let max_window_pixels = if self.options.warp_memory_limit > 0.0 {
            ((self.options.warp_memory_limit / std::mem::size_of::<f32>() as f64) as u64).max(1024)
        } else {
            DEFAULT_MAX_WINDOW_PIXELS
        };
        Ok(TileReader::new(
            self.dataset.clone(),
            to_source,
            self.options.resample,
            self.options.error_threshold,
            max_window_pixels,
        ))
    }

    /// Destination geotransform for a tile window with the one-pixel west
    /// and south overlap the heightmap layout demands: the window origin is
    /// shifted one pixel west and one pixel down from the tile's north-west
    /// corner, so sample centres land on a lattice shared with the
    /// neighbouring tiles. A tile's east column repeats in its east
    /// neighbour's west column and its north row in its north neighbour's
    /// south row.
    pub fn overlapped_tile_transform(&self, coord: &TileCoordinate) -> GeoTransform {
        let tile = self.grid.tile_bounds(coord);
        let resolution = tile.width() / (self.grid.tile_size() - 1) as f64;
        GeoTransform::north_up(tile.min_x() - resolution, tile.max_y() - resolution, resolution)
    }

    /// Read the height window backing one tile. The reader's synthetic
    /// overview chain is reset afterwards.
    pub fn read_tile_heights(
        &self,
        reader: &mut TileReader,
        coord: &TileCoordinate,
    ) -> Result<Vec<f32>, RasterError> {
        let gt = self.overlapped_tile_transform(coord);
        let size = self.grid.tile_size();
        let window = reader.read_window(&gt, size, size);
        reader.reset_overviews();
        window
    }

    /// Child-presence flags: which quadrants of the tile the dataset
    /// extends into. Zero at the maximum zoom.
    pub fn child_flags(&self, coord: &TileCoordinate) -> ChildTiles {
        let mut children = ChildTiles::none();
        if coord.zoom == self.max_zoom() {
            return children;
        }
        let tile = self.grid.tile_bounds(coord);
        if !self.bounds.overlaps(&tile) {
            return children;
        }
        if self.bounds.overlaps(&tile.sw()) {
            children.set_sw();
        }
        if self.bounds.overlaps(&tile.nw()) {
            children.set_nw();
        }
        if self.bounds.overlaps(&tile.ne()) {
            children.set_ne();
        }
        if self.bounds.overlaps(&tile.se()) {
            children.set_se();
        }
        children
    }
}
