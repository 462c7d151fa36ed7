//! Destination-window extraction.
//!
//! A window read maps every destination pixel centre through the destination
//! geotransform, the (optional) CRS transform into the dataset SRS, and the
//! inverse source geotransform, then samples the source with the requested
//! kernel. Reads that would materialize more source pixels than the budget
//! escalate through the overview chain.

use std::sync::Arc;

use glam::DVec2;
use log::debug;

use super::overview::{select_overview, SyntheticChain};
use super::{GeoTransform, RasterDataset, RasterError, ResampleAlg};
use crate::geo::CrsTransform;

/// Height assigned to destination pixels with no source coverage when the
/// dataset carries no nodata value of its own.
pub const DEFAULT_NODATA: f64 = -32768.0;

/// Margin of source pixels around the mapped footprint, sized for the widest
/// kernel (lanczos, 6 taps).
const KERNEL_MARGIN: f64 = 4.0;

enum ActiveLevel {
    /// Dataset level addressing: 0 = full resolution, n = overview n-1.
    Native(usize),
    Synthetic(usize),
}

/// Per-worker window reader over a shared dataset.
pub struct TileReader {
    dataset: Arc<dyn RasterDataset>,
    /// Grid CRS to dataset CRS, when the two differ.
    to_source: Option<CrsTransform>,
    resample: ResampleAlg,
    error_threshold: f64,
    max_window_pixels: u64,
    chain: SyntheticChain,
}

impl TileReader {
    pub fn new(
        dataset: Arc<dyn RasterDataset>,
        to_source: Option<CrsTransform>,
        resample: ResampleAlg,
        error_threshold: f64,
        max_window_pixels: u64,
    ) -> Self {
        let chain = SyntheticChain::new(dataset.clone(), max_window_pixels);
        Self { dataset, to_source, resample, error_threshold, max_window_pixels, chain }
    }

    /// Drop any synthetic overviews built for the previous tile.
    pub fn reset_overviews(&mut self) {
        self.chain.reset();
    }

    /// Materialize a `width` x `height` window of heights addressed by
    /// `dst_geo_transform`, row-major, top to bottom.
    pub fn read_window(
        &mut self,
        dst_geo_transform: &GeoTransform,
        width: u32,
        height: u32,
    ) -> Result<Vec<f32>, RasterError> {
        let nodata = self.dataset.nodata().unwrap_or(DEFAULT_NODATA) as f32;
        let inv_src = self.dataset.geo_transform().invert().ok_or_else(|| {
            RasterError::MissingGeoreference("source geotransform is singular".into())
        })?;

        let src_px = self.map_window(dst_geo_transform, width, height, &inv_src)?;

        // Footprint of the window in full-resolution source pixels.
        let (full_w, full_h) = self.dataset.size();
        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for p in &src_px {
            min = min.min(*p);
            max = max.max(*p);
        }
        if !min.x.is_finite() {
            return Ok(vec![nodata; width as usize * height as usize]);
        }
        min -= DVec2::splat(KERNEL_MARGIN);
        max += DVec2::splat(KERNEL_MARGIN);

        // No intersection with the source at all.
        if max.x < 0.0 || max.y < 0.0 || min.x > full_w as f64 || min.y > full_h as f64 {
            return Ok(vec![nodata; width as usize * height as usize]);
        }

        // The suggested warp ratio: source pixels consumed per produced pixel.
        let target_ratio = (max.x - min.x - 2.0 * KERNEL_MARGIN) / width as f64;

        let (level, level_w, level_h) = self.choose_level(min, max, target_ratio)?;
        let scale_x = full_w as f64 / level_w as f64;
        let scale_y = full_h as f64 / level_h as f64;

        // Region of the level covering the footprint.
        let rx0 = ((min.x / scale_x).floor().max(0.0)) as u32;
        let ry0 = ((min.y / scale_y).floor().max(0.0)) as u32;
        let rx1 = ((max.x / scale_x).ceil().min(level_w as f64)) as u32;
        let ry1 = ((max.y / scale_y).ceil().min(level_h as f64)) as u32;
        if rx1 <= rx0 || ry1 <= ry0 {
            return Ok(vec![nodata; width as usize * height as usize]);
        }
        let (rw, rh) = (rx1 - rx0, ry1 - ry0);

        let region = match level {
            ActiveLevel::Native(idx) => self.dataset.read_region(idx, rx0, ry0, rw, rh)?,
            ActiveLevel::Synthetic(idx) => self.chain.read_region(idx, rx0, ry0, rw, rh)?,
        };

        // Half-extents of a destination pixel's source footprint, in level
        // pixels; drives the area kernels.
        let hx = (target_ratio / scale_x / 2.0).max(0.0);
        let hy = ((max.y - min.y - 2.0 * KERNEL_MARGIN) / height as f64 / scale_y / 2.0).max(0.0);

        let mut out = Vec::with_capacity(width as usize * height as usize);
        for p in &src_px {
            let lx = p.x / scale_x;
            let ly = p.y / scale_y;
            if !lx.is_finite() || lx < 0.0 || lx >= level_w as f64 || ly < 0.0 || ly >= level_h as f64
            {
                out.push(nodata);
                continue;
            }
            let local = DVec2::new(lx - rx0 as f64, ly - ry0 as f64);
            out.push(sample(&region, rw, rh, local, hx, hy, self.resample, nodata));
        }
        Ok(out)
    }

    /// Map every destination pixel centre into full-resolution source pixel
    /// coordinates, linearizing rows when the approximation error allows.
    fn map_window(
        &self,
        dst_gt: &GeoTransform,
        width: u32,
        height: u32,
        inv_src: &GeoTransform,
    ) -> Result<Vec<DVec2>, RasterError> {
        let exact = |px: f64, py: f64| -> Result<DVec2, RasterError> {
            let (dx, dy) = dst_gt.apply(px, py);
            let p = match &self.to_source {
                Some(t) => t
                    .apply(DVec2::new(dx, dy))
                    .map_err(|e| RasterError::ReadFailed(format!("reprojection failed: {e}")))?,
                None => DVec2::new(dx, dy),
            };
            let (sx, sy) = inv_src.apply(p.x, p.y);
            Ok(DVec2::new(sx, sy))
        };

        let mut out = Vec::with_capacity(width as usize * height as usize);
        let approximate = self.to_source.is_some() && self.error_threshold > 0.0 && width >= 3;

        for j in 0..height {
            let py = j as f64 + 0.5;
            if approximate {
                let first = exact(0.5, py)?;
                let last = exact(width as f64 - 0.5, py)?;
                let mid_exact = exact(width as f64 / 2.0, py)?;
                let mid_lerp = (first + last) * 0.5;
                if (mid_exact - mid_lerp).length() <= self.error_threshold {
                    let step = (last - first) / (width as f64 - 1.0);
                    for i in 0..width {
                        out.push(first + step * i as f64);
                    }
                    continue;
                }
            }
            for i in 0..width {
                out.push(exact(i as f64 + 0.5, py)?);
            }
        }
        Ok(out)
    }

    /// Choose the level to read: the best-matching embedded overview, or a
    /// synthetic level when the region would exceed the read budget.
    fn choose_level(
        &mut self,
        min: DVec2,
        max: DVec2,
        target_ratio: f64,
    ) -> Result<(ActiveLevel, u32, u32), RasterError> {
        let (full_w, full_h) = self.dataset.size();
        let overview_sizes = self.dataset.overview_sizes();
        let widths: Vec<u32> = overview_sizes.iter().map(|(w, _)| *w).collect();

        let selected = select_overview(full_w, &widths, target_ratio);
        let mut native: Vec<(usize, u32, u32)> = Vec::new();
        match selected {
            Some(i) => {
                // The chosen overview, then every coarser one as fallback.
                for (k, (w, h)) in overview_sizes.iter().enumerate().skip(i) {
                    native.push((k + 1, *w, *h));
                }
            }
            None => {
                native.push((0, full_w, full_h));
                for (k, (w, h)) in overview_sizes.iter().enumerate() {
                    native.push((k + 1, *w, *h));
                }
            }
        }

        let region_pixels = |lw: u32, lh: u32| -> u64 {
            let sx = full_w as f64 / lw as f64;
            let sy = full_h as f64 / lh as f64;
            let w = ((max.x - min.x) / sx).ceil().max(1.0).min(lw as f64);
            let h = ((max.y - min.y) / sy).ceil().max(1.0).min(lh as f64);
            w as u64 * h as u64
        };

        for (idx, w, h) in &native {
            if region_pixels(*w, *h) <= self.max_window_pixels {
                return Ok((ActiveLevel::Native(*idx), *w, *h));
            }
        }

        // Every embedded level busts the budget: the read has failed once,
        // recover by extending the synthetic chain until the region fits.
        debug!(
            "window footprint exceeds {} px at every embedded level, \
             escalating to synthetic overviews",
            self.max_window_pixels
        );
        for idx in 0..self.chain.len() {
            let (w, h) = self.chain.level_size(idx);
            if region_pixels(w, h) <= self.max_window_pixels {
                return Ok((ActiveLevel::Synthetic(idx), w, h));
            }
        }
        loop {
            if !self.chain.extend()? {
                return Err(RasterError::WindowTooLarge {
                    pixels: region_pixels(full_w, full_h),
                    limit: self.max_window_pixels,
                });
            }
            let idx = self.chain.len() - 1;
            let (w, h) = self.chain.level_size(idx);
            if region_pixels(w, h) <= self.max_window_pixels {
                return Ok((ActiveLevel::Synthetic(idx), w, h));
            }
        }
    }
}

fn is_invalid(v: f32, nodata: f32) -> bool {
    v.is_nan() || v == nodata
}

fn fetch(buf: &[f32], w: u32, h: u32, x: i64, y: i64) -> f32 {
    let cx = x.clamp(0, w as i64 - 1) as usize;
    let cy = y.clamp(0, h as i64 - 1) as usize;
    buf[cy * w as usize + cx]
}

/// Sample the region buffer at continuous pixel coordinates `p` (cell `i`
/// covers `[i, i+1)`, its centre is `i + 0.5`).
fn sample(
    buf: &[f32],
    w: u32,
    h: u32,
    p: DVec2,
    hx: f64,
    hy: f64,
    alg: ResampleAlg,
    nodata: f32,
) -> f32 {
    match alg {
        ResampleAlg::Nearest => fetch(buf, w, h, p.x.floor() as i64, p.y.floor() as i64),
        ResampleAlg::Bilinear => sample_kernel(buf, w, h, p, nodata, 1, |d| {
            let d = d.abs();
            if d < 1.0 {
                1.0 - d
            } else {
                0.0
            }
        }),
        ResampleAlg::Cubic => sample_kernel(buf, w, h, p, nodata, 2, cubic_weight),
        ResampleAlg::CubicSpline => sample_kernel(buf, w, h, p, nodata, 2, bspline_weight),
        ResampleAlg::Lanczos => sample_kernel(buf, w, h, p, nodata, 3, lanczos_weight),
        ResampleAlg::Average => sample_average(buf, w, h, p, hx, hy, nodata),
        ResampleAlg::Mode => sample_mode(buf, w, h, p, hx, hy, nodata),
    }
}

/// Separable point kernel with nodata-aware weight renormalization.
fn sample_kernel<F: Fn(f64) -> f64>(
    buf: &[f32],
    w: u32,
    h: u32,
    p: DVec2,
    nodata: f32,
    support: i64,
    weight: F,
) -> f32 {
    let fx = p.x - 0.5;
    let fy = p.y - 0.5;
    let ix = fx.floor() as i64;
    let iy = fy.floor() as i64;

    let mut sum = 0.0f64;
    let mut total = 0.0f64;
    for ty in (iy - support + 1)..=(iy + support) {
        let wy = weight(fy - ty as f64);
        if wy == 0.0 {
            continue;
        }
        for tx in (ix - support + 1)..=(ix + support) {
            let wx = weight(fx - tx as f64);
            if wx == 0.0 {
                continue;
            }
            let v = fetch(buf, w, h, tx, ty);
            if is_invalid(v, nodata) {
                continue;
            }
            sum += v as f64 * wx * wy;
            total += wx * wy;
        }
    }
    if total <= 0.0 {
        nodata
    } else {
        (sum / total) as f32
    }
}

/// Catmull-Rom cubic (the `cubic` kernel).
fn cubic_weight(d: f64) -> f64 {
    let d = d.abs();
    if d < 1.0 {
        1.5 * d * d * d - 2.5 * d * d + 1.0
    } else if d < 2.0 {
        -0.5 * d * d * d + 2.5 * d * d - 4.0 * d + 2.0
    } else {
        0.0
    }
}

/// Cubic B-spline (the `cubicspline` kernel).
fn bspline_weight(d: f64) -> f64 {
    let d = d.abs();
    if d < 1.0 {
        (4.0 + d * d * (3.0 * d - 6.0)) / 6.0
    } else if d < 2.0 {
        let t = 2.0 - d;
        t * t * t / 6.0
    } else {
        0.0
    }
}

fn lanczos_weight(d: f64) -> f64 {
    const A: f64 = 3.0;
    let d = d.abs();
    if d < 1e-12 {
        return 1.0;
    }
    if d >= A {
        return 0.0;
    }
    let pix = std::f64::consts::PI * d;
    A * pix.sin() * (pix / A).sin() / (pix * pix)
}

/// Area-weighted mean over the destination pixel's source footprint.
fn sample_average(buf: &[f32], w: u32, h: u32, p: DVec2, hx: f64, hy: f64, nodata: f32) -> f32 {
    if hx < 0.5 && hy < 0.5 {
        // Upsampling: the footprint sits inside one source pixel; behave
        // like bilinear so the output stays continuous.
        return sample(buf, w, h, p, 0.0, 0.0, ResampleAlg::Bilinear, nodata);
    }
    let x0 = p.x - hx.max(0.5);
    let x1 = p.x + hx.max(0.5);
    let y0 = p.y - hy.max(0.5);
    let y1 = p.y + hy.max(0.5);

    let mut sum = 0.0f64;
    let mut area = 0.0f64;
    for cy in y0.floor() as i64..y1.ceil() as i64 {
        let oy = (y1.min(cy as f64 + 1.0) - y0.max(cy as f64)).max(0.0);
        if oy == 0.0 {
            continue;
        }
        for cx in x0.floor() as i64..x1.ceil() as i64 {
            let ox = (x1.min(cx as f64 + 1.0) - x0.max(cx as f64)).max(0.0);
            if ox == 0.0 {
                continue;
            }
            if cx < 0 || cy < 0 || cx >= w as i64 || cy >= h as i64 {
                continue;
            }
            let v = buf[cy as usize * w as usize + cx as usize];
            if is_invalid(v, nodata) {
                continue;
            }
            sum += v as f64 * ox * oy;
            area += ox * oy;
        }
    }
    if area <= 0.0 {
        nodata
    } else {
        (sum / area) as f32
    }
}

/// Majority value over the footprint.
fn sample_mode(buf: &[f32], w: u32, h: u32, p: DVec2, hx: f64, hy: f64, nodata: f32) -> f32 {
    let x0 = (p.x - hx.max(0.5)).floor() as i64;
    let x1 = (p.x + hx.max(0.5)).ceil() as i64;
    let y0 = (p.y - hy.max(0.5)).floor() as i64;
    let y1 = (p.y + hy.max(0.5)).ceil() as i64;

    let mut counts: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
    for cy in y0..y1 {
        for cx in x0..x1 {
            if cx < 0 || cy < 0 || cx >= w as i64 || cy >= h as i64 {
                continue;
            }
            let v = buf[cy as usize * w as usize + cx as usize];
            if is_invalid(v, nodata) {
                continue;
            }
            *counts.entry(v.to_bits()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(bits, _)| f32::from_bits(bits))
        .unwrap_or(nodata)
}
