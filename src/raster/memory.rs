//! An in-memory raster dataset, used by the tests and by callers that
//! synthesize height data instead of reading it from a file.

use super::{GeoTransform, RasterDataset, RasterError};
use crate::geo::Srs;

pub struct InMemoryDataset {
    width: u32,
    height: u32,
    geo_transform: GeoTransform,
    srs: Option<Srs>,
    nodata: Option<f64>,
    data: Vec<f32>,
    overviews: Vec<(u32, u32, Vec<f32>)>,
}

impl InMemoryDataset {
    pub fn new(
        width: u32,
        height: u32,
        geo_transform: GeoTransform,
        srs: Option<Srs>,
        data: Vec<f32>,
    ) -> Self {
        assert_eq!(data.len(), width as usize * height as usize);
        Self { width, height, geo_transform, srs, nodata: None, data, overviews: Vec::new() }
    }

    /// Synthesize a dataset from a height function of pixel coordinates.
    pub fn from_fn<F: Fn(u32, u32) -> f32>(
        width: u32,
        height: u32,
        geo_transform: GeoTransform,
        srs: Option<Srs>,
        f: F,
    ) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, geo_transform, srs, data)
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Append a 2x box-downsampled overview level and return its size.
    pub fn build_overview(&mut self) -> (u32, u32) {
        let (src_w, src_h, src): (u32, u32, &[f32]) = match self.overviews.last() {
            Some((w, h, d)) => (*w, *h, d),
            None => (self.width, self.height, &self.data),
        };
        let w = (src_w / 2).max(1);
        let h = (src_h / 2).max(1);
        let mut data = Vec::with_capacity(w as usize * h as usize);
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0.0f64;
                let mut n = 0u32;
                for dy in 0..2u32 {
                    for dx in 0..2u32 {
                        let sx = (x * 2 + dx).min(src_w - 1);
                        let sy = (y * 2 + dy).min(src_h - 1);
                        sum += src[(sy * src_w + sx) as usize] as f64;
                        n += 1;
                    }
                }
                data.push((sum / n as f64) as f32);
            }
        }
        self.overviews.push((w, h, data));
        (w, h)
    }
}

impl RasterDataset for InMemoryDataset {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn geo_transform(&self) -> GeoTransform {
        self.geo_transform
    }

    fn srs(&self) -> Option<Srs> {
        self.srs
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn overview_sizes(&self) -> Vec<(u32, u32)> {
        self.overviews.iter().map(|(w, h, _)| (*w, *h)).collect()
    }

    fn read_region(
        &self,
        level: usize,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<f32>, RasterError> {
        let (w, h, data): (u32, u32, &[f32]) = if level == 0 {
            (self.width, self.height, &self.data)
        } else {
            let (w, h, d) = self
                .overviews
                .get(level - 1)
                .ok_or_else(|| RasterError::ReadFailed(format!("no overview level {level}")))?;
            (*w, *h, d)
        };
        if x0 + width > w || y0 + height > h {
            return Err(RasterError::ReadFailed(format!(
                "region {x0},{y0} {width}x{height} outside level of {w}x{h}"
            )));
        }
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in y0..y0 + height {
            let start = (y * w + x0) as usize;
            out.extend_from_slice(&data[start..start + width as usize]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_reads_match_source() {
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0);
        let ds = InMemoryDataset::from_fn(8, 8, gt, None, |x, y| (y * 8 + x) as f32);
        let region = ds.read_region(0, 2, 3, 3, 2).unwrap();
        assert_eq!(region, vec![26.0, 27.0, 28.0, 34.0, 35.0, 36.0]);
    }

    #[test]
    fn overview_halves_size() {
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0);
        let mut ds = InMemoryDataset::from_fn(8, 8, gt, None, |_, _| 4.0);
        assert_eq!(ds.build_overview(), (4, 4));
        assert_eq!(ds.build_overview(), (2, 2));
        let region = ds.read_region(2, 0, 0, 2, 2).unwrap();
        assert_eq!(region, vec![4.0; 4]);
    }
}
