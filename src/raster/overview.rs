//! Overview selection and the on-demand synthetic overview chain.
//!
//! When a window read would downsample, the reader picks the embedded
//! overview whose downscale ratio sits just under the target ratio. When
//! even the coarsest embedded level would blow the read budget, the reader
//! extends a synthetic chain of 2x box-downsampled levels until the read
//! fits, and resets that chain between tiles.

use std::sync::Arc;

use log::debug;

use super::{RasterDataset, RasterError};

/// Pick the embedded overview for a downscale `target_ratio` (full-resolution
/// width over destination width): the last overview still finer than the
/// target. A ratio within 0.1 of the target selects that overview. `None`
/// means the full-resolution level.
pub fn select_overview(full_width: u32, overview_widths: &[u32], target_ratio: f64) -> Option<usize> {
    if overview_widths.is_empty() || target_ratio <= 1.0 {
        return None;
    }

    let n = overview_widths.len() as isize;
    let ratio_at = |i: isize| -> f64 {
        if i < 0 {
            1.0
        } else {
            full_width as f64 / overview_widths[i as usize] as f64
        }
    };

    let mut i: isize = -1;
    while i < n - 1 {
        let ratio = ratio_at(i);
        let next_ratio = ratio_at(i + 1);
        if ratio < target_ratio && next_ratio > target_ratio {
            break;
        }
        if (ratio - target_ratio).abs() < 0.1 {
            break;
        }
        i += 1;
    }

    if i >= 0 {
        Some(i as usize)
    } else {
        None
    }
}

/// One synthetic reduced-resolution level, materialized in memory.
struct SyntheticLevel {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

/// The per-reader chain of synthetic overviews, coarser than every level
/// embedded in the source.
pub struct SyntheticChain {
    dataset: Arc<dyn RasterDataset>,
    levels: Vec<SyntheticLevel>,
    max_window_pixels: u64,
}

impl SyntheticChain {
    pub fn new(dataset: Arc<dyn RasterDataset>, max_window_pixels: u64) -> Self {
        Self { dataset, levels: Vec::new(), max_window_pixels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_size(&self, idx: usize) -> (u32, u32) {
        (self.levels[idx].width, self.levels[idx].height)
    }

    /// Drop all synthetic levels (called between tiles).
    pub fn reset(&mut self) {
        if !self.levels.is_empty() {
            debug!("dropping {} synthetic overview level(s)", self.levels.len());
            self.levels.clear();
        }
    }

    /// Append one more 2x level. Returns `false` when the chain cannot be
    /// extended because the coarsest level is already tiny.
    pub fn extend(&mut self) -> Result<bool, RasterError> {
        let (src_w, src_h) = match self.levels.last() {
            Some(l) => (l.width, l.height),
            None => {
                // Seed from the coarsest level available in the source.
                let sizes = self.dataset.overview_sizes();
                let n = sizes.len();
                let (w, h) = sizes.last().copied().unwrap_or_else(|| self.dataset.size());
                let level = self.downsample_source(n, w, h)?;
                self.levels.push(level);
                return Ok(true);
            }
        };
        if src_w <= 4 || src_h <= 4 {
            return Ok(false);
        }
        let level = self.downsample_chain(src_w, src_h)?;
        self.levels.push(level);
        Ok(true)
    }

    pub fn read_region(
        &self,
        idx: usize,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<f32>, RasterError> {
        let level = self
            .levels
            .get(idx)
            .ok_or_else(|| RasterError::ReadFailed(format!("no synthetic level {idx}")))?;
        if x0 + width > level.width || y0 + height > level.height {
            return Err(RasterError::ReadFailed(format!(
                "region {x0},{y0} {width}x{height} outside synthetic level of {}x{}",
                level.width, level.height
            )));
        }
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in y0..y0 + height {
            let start = (y * level.width + x0) as usize;
            out.extend_from_slice(&level.data[start..start + width as usize]);
        }
        Ok(out)
    }

    /// Downsample a source level (dataset addressing) by 2, reading it in
    /// row blocks so a single read never exceeds the window budget.
    fn downsample_source(
        &self,
        src_level: usize,
        src_w: u32,
        src_h: u32,
    ) -> Result<SyntheticLevel, RasterError> {
        let w = (src_w / 2).max(1);
        let h = (src_h / 2).max(1);
        let mut data = vec![0f32; w as usize * h as usize];

        // Source rows per block read, kept within the window budget.
        let src_block_rows = ((self.max_window_pixels / src_w.max(1) as u64) as u32).max(2);
        let out_block_rows = (src_block_rows / 2).max(1);
        let mut y = 0u32;
        while y < h {
            let rows_out = out_block_rows.min(h - y);
            let src_y0 = y * 2;
            let src_rows = (rows_out * 2).min(src_h - src_y0);
            let block = self.dataset.read_region(src_level, 0, src_y0, src_w, src_rows)?;
            box_downsample(&block, src_w, src_rows, &mut data, w, y, rows_out);
            y += rows_out;
        }

        debug!("built synthetic overview {}x{} from level {}", w, h, src_level);
        Ok(SyntheticLevel { width: w, height: h, data })
    }

    /// Downsample the last chain level by 2.
    fn downsample_chain(&self, src_w: u32, src_h: u32) -> Result<SyntheticLevel, RasterError> {
        let src = self.levels.last().unwrap();
        let w = (src_w / 2).max(1);
        let h = (src_h / 2).max(1);
        let mut data = vec![0f32; w as usize * h as usize];
        box_downsample(&src.data, src_w, src_h, &mut data, w, 0, h);
        Ok(SyntheticLevel { width: w, height: h, data })
    }
}

/// 2x box filter of `src` (src_w x src_rows) into the rows `[dst_y0,
/// dst_y0 + dst_rows)` of `dst` (dst_w wide).
fn box_downsample(
    src: &[f32],
    src_w: u32,
    src_rows: u32,
    dst: &mut [f32],
    dst_w: u32,
    dst_y0: u32,
    dst_rows: u32,
) {
    for y in 0..dst_rows {
        for x in 0..dst_w {
            let mut sum = 0f64;
            let mut n = 0u32;
            for dy in 0..2u32 {
                for dx in 0..2u32 {
                    let sx = (x * 2 + dx).min(src_w - 1);
                    let sy = (y * 2 + dy).min(src_rows.saturating_sub(1));
                    sum += src[(sy * src_w + sx) as usize] as f64;
                    n += 1;
                }
            }
            dst[((dst_y0 + y) * dst_w + x) as usize] = (sum / n as f64) as f32;
        }
    }
}
