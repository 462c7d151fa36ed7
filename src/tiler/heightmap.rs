//! Produces heightmap tiles from the raster.

use std::sync::Arc;

use crate::error::TerrainResult;
use crate::grid::{Grid, TileCoordinate};
use crate::raster::{RasterDataset, TileReader};
use crate::tile::HeightmapTile;

use super::{Tiler, TilerOptions};

pub struct HeightmapTiler {
    tiler: Tiler,
}

impl HeightmapTiler {
    pub fn new(
        dataset: Arc<dyn RasterDataset>,
        grid: Grid,
        options: TilerOptions,
    ) -> TerrainResult<Self> {
        Ok(Self { tiler: Tiler::new(dataset, grid, options)? })
    }

    pub fn tiler(&self) -> &Tiler {
        &self.tiler
    }

    /// Read, quantize, and flag one tile.
    pub fn create_tile(
        &self,
        reader: &mut TileReader,
        coord: TileCoordinate,
    ) -> TerrainResult<HeightmapTile> {
        let heights = self.tiler.read_tile_heights(reader, &coord)?;
        let mut tile = HeightmapTile::from_raster_heights(coord, &heights);
        tile.children = self.tiler.child_flags(&coord);
        Ok(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Srs;
    use crate::raster::{GeoTransform, InMemoryDataset};
    use crate::tile::TILE_SIZE;
    use crate::Grid;

    #[test]
    fn constant_dataset_quantizes_uniformly() {
        let gt = GeoTransform::north_up(0.0, 50.0, 10.0 / 1024.0);
        let ds = Arc::new(InMemoryDataset::from_fn(1024, 1024, gt, Some(Srs::WGS84), |_, _| {
            250.0
        }));
        let grid = Grid::global_geodetic(TILE_SIZE, true).unwrap();
        let tiler = HeightmapTiler::new(ds, grid, TilerOptions::default()).unwrap();
        let mut reader = tiler.tiler().make_reader().unwrap();

        // A tile strictly inside the dataset at a zoom coarser than max.
        let zoom = tiler.tiler().max_zoom() - 2;
        let coord = tiler.tiler().grid().crs_to_tile(glam::DVec2::new(5.0, 45.0), zoom);
        let tile = tiler.create_tile(&mut reader, coord).unwrap();

        let expected = ((250.0f64 + 1000.0) * 5.0) as u16;
        let inside = tile
            .heights
            .iter()
            .filter(|&&h| h == expected)
            .count();
        // The tile may clip the dataset edge; its interior must be exact.
        assert!(inside > tile.heights.len() / 2, "only {inside} cells matched");
        assert!(tile.children.has_any());
    }
}
