//! The TMS tiling grid: profiles, coordinate algebra, and tile enumeration.
//!
//! Tile axes follow the TMS convention: `x` increases eastward, `y`
//! increases northward, `y = 0` is the southernmost row.

mod iterator;

pub use iterator::GridIterator;

use glam::DVec2;

use crate::error::{TerrainError, TerrainResult};
use crate::geo::{Srs, MERCATOR_ORIGIN_SHIFT};
use crate::geometry::{CrsBounds, CrsPoint, PixelPoint, TileBounds};

/// Identifies one tile: a zoom level and a column/row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// An immutable TMS profile: the mapping between CRS, pixel, and tile
/// coordinates at every zoom level.
#[derive(Debug, Clone)]
pub struct Grid {
    tile_size: u32,
    extent: CrsBounds,
    srs: Srs,
    root_tiles: u16,
    zoom_factor: f64,
    initial_resolution: f64,
    x_origin_shift: f64,
    y_origin_shift: f64,
}

impl Grid {
    pub fn new(
        tile_size: u32,
        extent: CrsBounds,
        srs: Srs,
        root_tiles: u16,
        zoom_factor: f64,
    ) -> TerrainResult<Self> {
        if tile_size < 2 {
            return Err(TerrainError::InvalidTileSize(tile_size));
        }
        Ok(Self {
            tile_size,
            extent,
            srs,
            root_tiles,
            zoom_factor,
            initial_resolution: extent.width() / root_tiles as f64 / tile_size as f64,
            x_origin_shift: extent.width() / 2.0,
            y_origin_shift: extent.height() / 2.0,
        })
    }

    /// The TMS Global Geodetic profile over `[-180, -90, 180, 90]`.
    ///
    /// The TMS-compatible flavour has two root tiles side by side at zoom 0;
    /// the non-compatible one has a single root tile.
    pub fn global_geodetic(tile_size: u32, tms_compatible: bool) -> TerrainResult<Self> {
        Grid::new(
            tile_size,
            CrsBounds::ordered(-180.0, -90.0, 180.0, 90.0),
            Srs::WGS84,
            if tms_compatible { 2 } else { 1 },
            2.0,
        )
    }

    /// The TMS Global Mercator profile in EPSG:3857.
    pub fn global_mercator(tile_size: u32) -> TerrainResult<Self> {
        Grid::new(
            tile_size,
            CrsBounds::ordered(
                -MERCATOR_ORIGIN_SHIFT,
                -MERCATOR_ORIGIN_SHIFT,
                MERCATOR_ORIGIN_SHIFT,
                MERCATOR_ORIGIN_SHIFT,
            ),
            Srs::WEB_MERCATOR,
            1,
            2.0,
        )
    }

    /// The resolution (CRS units per pixel) at a zoom level.
    pub fn resolution(&self, zoom: u8) -> f64 {
        self.initial_resolution / self.zoom_factor.powi(zoom as i32)
    }

    /// The zoom level whose resolution is at most `resolution`, rounding up
    /// when the requested resolution falls between levels.
    pub fn zoom_for_resolution(&self, resolution: f64) -> u8 {
        let exact = (self.initial_resolution.ln() - resolution.ln()) / self.zoom_factor.ln();
        // A resolution that is exactly a level's must not round up a level;
        // the log quotient carries a few ulps of noise.
        let zoom = (exact - 1e-9).ceil();
        zoom.max(0.0) as u8
    }

    /// The tile whose floored pixel contains `pixel`; the east/north edge of
    /// a tile belongs to the next tile over.
    pub fn pixels_to_tile(&self, pixel: PixelPoint) -> (u32, u32) {
        (
            (pixel.x / self.tile_size as f64).floor() as u32,
            (pixel.y / self.tile_size as f64).floor() as u32,
        )
    }

    pub fn pixels_to_crs(&self, pixel: PixelPoint, zoom: u8) -> CrsPoint {
        let res = self.resolution(zoom);
        DVec2::new(
            pixel.x * res - self.x_origin_shift,
            pixel.y * res - self.y_origin_shift,
        )
    }

    pub fn crs_to_pixels(&self, coord: CrsPoint, zoom: u8) -> PixelPoint {
        let res = self.resolution(zoom);
        DVec2::new(
            (self.x_origin_shift + coord.x) / res,
            (self.y_origin_shift + coord.y) / res,
        )
    }

    pub fn crs_to_tile(&self, coord: CrsPoint, zoom: u8) -> TileCoordinate {
        let (x, y) = self.pixels_to_tile(self.crs_to_pixels(coord, zoom));
        TileCoordinate::new(zoom, x, y)
    }

    /// The CRS extent of one tile.
    pub fn tile_bounds(&self, coord: &TileCoordinate) -> CrsBounds {
        let ts = self.tile_size as f64;
        let lower_left = self.pixels_to_crs(
            DVec2::new(coord.x as f64 * ts, coord.y as f64 * ts),
            coord.zoom,
        );
        let upper_right = self.pixels_to_crs(
            DVec2::new((coord.x + 1) as f64 * ts, (coord.y + 1) as f64 * ts),
            coord.zoom,
        );
        CrsBounds::ordered(lower_left.x, lower_left.y, upper_right.x, upper_right.y)
    }

    /// The grid extent in tile coordinates at a zoom level.
    pub fn tile_extent(&self, zoom: u8) -> TileBounds {
        let ll = self.crs_to_tile(self.extent.lower_left(), zoom);
        let ur = self.crs_to_tile(self.extent.upper_right(), zoom);
        TileBounds::ordered(ll.x, ll.y, ur.x, ur.y)
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn extent(&self) -> &CrsBounds {
        &self.extent
    }

    pub fn srs(&self) -> Srs {
        self.srs
    }

    pub fn root_tiles(&self) -> u16 {
        self.root_tiles
    }
}
