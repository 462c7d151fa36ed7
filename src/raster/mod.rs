//! Raster access: the narrow dataset interface the tiler consumes, a native
//! GeoTIFF implementation of it, and the window extraction machinery that
//! turns a destination geotransform into a resampled block of heights.

mod error;
mod geotiff;
mod memory;
mod overview;
mod window;

pub use error::RasterError;
pub use geotiff::GeoTiffDataset;
pub use memory::InMemoryDataset;
pub use overview::select_overview;
pub use window::{TileReader, DEFAULT_NODATA};

use crate::geo::Srs;

/// The default limit on source pixels materialized for one window read.
/// Reads larger than this trip the overview escalation path.
pub const DEFAULT_MAX_WINDOW_PIXELS: u64 = 1 << 24;

/// An affine geotransform `(x0, a, b, y0, d, e)`: pixel `(px, py)` maps to
/// `(x0 + px*a + py*b, y0 + px*d + py*e)`. North-up rasters have
/// `b = d = 0` and `e < 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// A north-up transform with square pixels of size `resolution`.
    pub fn north_up(origin_x: f64, origin_y: f64, resolution: f64) -> Self {
        GeoTransform([origin_x, resolution, 0.0, origin_y, 0.0, -resolution])
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    pub fn pixel_width(&self) -> f64 {
        self.0[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.0[5]
    }

    /// Map pixel coordinates to CRS coordinates.
    pub fn apply(&self, px: f64, py: f64) -> (f64, f64) {
        let g = &self.0;
        (g[0] + px * g[1] + py * g[2], g[3] + px * g[4] + py * g[5])
    }

    /// The inverse transform (CRS to pixel), or `None` when singular.
    pub fn invert(&self) -> Option<GeoTransform> {
        let g = &self.0;
        let det = g[1] * g[5] - g[2] * g[4];
        if det.abs() < f64::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = g[5] * inv_det;
        let b = -g[2] * inv_det;
        let d = -g[4] * inv_det;
        let e = g[1] * inv_det;
        Some(GeoTransform([
            -(g[0] * a + g[3] * b),
            a,
            b,
            -(g[0] * d + g[3] * e),
            d,
            e,
        ]))
    }
}

/// Warp resampling kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleAlg {
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
}

impl Default for ResampleAlg {
    fn default() -> Self {
        ResampleAlg::Average
    }
}

impl std::str::FromStr for ResampleAlg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResampleAlg::Nearest),
            "bilinear" => Ok(ResampleAlg::Bilinear),
            "cubic" => Ok(ResampleAlg::Cubic),
            "cubicspline" => Ok(ResampleAlg::CubicSpline),
            "lanczos" => Ok(ResampleAlg::Lanczos),
            "average" => Ok(ResampleAlg::Average),
            "mode" => Ok(ResampleAlg::Mode),
            other => Err(format!(
                "unknown resampling algorithm '{other}' \
                 (expected nearest, bilinear, cubic, cubicspline, lanczos, average, mode)"
            )),
        }
    }
}

/// The narrow raster interface consumed by the tiler: georeferencing plus
/// region reads at the full resolution or any embedded overview level.
pub trait RasterDataset: Send + Sync {
    /// Full-resolution raster size in pixels.
    fn size(&self) -> (u32, u32);

    fn geo_transform(&self) -> GeoTransform;

    /// The dataset SRS, if one is assigned.
    fn srs(&self) -> Option<Srs>;

    /// The nodata value of the height band, if one is assigned.
    fn nodata(&self) -> Option<f64>;

    /// Sizes of the embedded reduced-resolution levels, finest first. Empty
    /// when the source carries no overviews.
    fn overview_sizes(&self) -> Vec<(u32, u32)>;

    /// Read a rectangular region of `level` (0 = full resolution, `n > 0` =
    /// `overview_sizes()[n - 1]`) as row-major, top-to-bottom `f32` heights.
    fn read_region(
        &self,
        level: usize,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<f32>, RasterError>;

    /// Size of a level addressed as in [`RasterDataset::read_region`].
    fn level_size(&self, level: usize) -> (u32, u32) {
        if level == 0 {
            self.size()
        } else {
            self.overview_sizes()[level - 1]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geotransform_round_trip() {
        let gt = GeoTransform::north_up(-180.0, 90.0, 0.1);
        let inv = gt.invert().unwrap();
        let (x, y) = gt.apply(12.5, 40.25);
        let (px, py) = inv.apply(x, y);
        assert!((px - 12.5).abs() < 1e-9);
        assert!((py - 40.25).abs() < 1e-9);
    }

    #[test]
    fn rotated_geotransform_inverts() {
        let gt = GeoTransform([10.0, 0.5, 0.2, 20.0, -0.1, -0.5]);
        let inv = gt.invert().unwrap();
        let (x, y) = gt.apply(3.0, 7.0);
        let (px, py) = inv.apply(x, y);
        assert!((px - 3.0).abs() < 1e-9);
        assert!((py - 7.0).abs() < 1e-9);
    }

    #[test]
    fn resample_parse() {
        assert_eq!("average".parse::<ResampleAlg>().unwrap(), ResampleAlg::Average);
        assert!("bicubic".parse::<ResampleAlg>().is_err());
    }
}
