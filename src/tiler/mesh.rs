//! Produces quantized-mesh tiles: drives the chunker over the tile's height
//! window, matches seams with neighbouring tiles, and assembles the mesh.

use std::sync::Arc;

use log::debug;

use crate::error::TerrainResult;
use crate::geo::WGS84_SEMI_MAJOR_AXIS;
use crate::grid::{Grid, TileCoordinate};
use crate::heightfield::{Border, Heightfield};
use crate::raster::{RasterDataset, TileReader};
use crate::tile::{MeshTile, TileMeshBuilder};

use super::{Tiler, TilerOptions};

/// Default quality of terrain created from heightmaps.
const HEIGHTMAP_TERRAIN_QUALITY: f64 = 0.25;

/// Zoom levels at or below this get the silhouette-smoothing lattice and no
/// seam pass.
const SMOOTH_ZOOM_CUTOFF: u8 = 6;

pub struct MeshTiler {
    tiler: Tiler,
    mesh_quality_factor: f64,
}

impl MeshTiler {
    pub fn new(
        dataset: Arc<dyn RasterDataset>,
        grid: Grid,
        options: TilerOptions,
        mesh_quality_factor: f64,
    ) -> TerrainResult<Self> {
        Ok(Self { tiler: Tiler::new(dataset, grid, options)?, mesh_quality_factor })
    }

    pub fn tiler(&self) -> &Tiler {
        &self.tiler
    }

    /// The geometric error estimate for a heightmap-sourced mesh at level
    /// zero.
    pub fn level_zero_geometric_error(
        maximum_radius: f64,
        quality: f64,
        tile_width: u32,
        tiles_at_level_zero: u32,
    ) -> f64 {
        maximum_radius * 2.0 * std::f64::consts::PI * quality
            / (tile_width as f64 * tiles_at_level_zero as f64)
    }

    fn geometric_error(&self, zoom: u8) -> f64 {
        let grid = self.tiler.grid();
        let resolution_at_zero = grid.resolution(0);
        let tiles_at_zero =
            (grid.extent().width() / (grid.tile_size() as f64 * resolution_at_zero)) as u32;
        let level_zero = Self::level_zero_geometric_error(
            WGS84_SEMI_MAJOR_AXIS,
            HEIGHTMAP_TERRAIN_QUALITY * self.mesh_quality_factor,
            grid.tile_size(),
            tiles_at_zero,
        );
        level_zero / 2f64.powi(zoom as i32)
    }

    /// Read, simplify, and flag one tile.
    pub fn create_tile(
        &self,
        reader: &mut TileReader,
        coord: TileCoordinate,
    ) -> TerrainResult<MeshTile> {
        let grid = self.tiler.grid();
        let tile_size = grid.tile_size();

        let heights = self.tiler.read_tile_heights(reader, &coord)?;
        let mut heightfield = Heightfield::new(heights, tile_size as usize)?;

        let max_error = self.geometric_error(coord.zoom);
        heightfield.apply_geometric_error(max_error, coord.zoom <= SMOOTH_ZOOM_CUTOFF);

        // Mirror the activation state of neighbouring tiles along shared
        // borders so adjoining meshes stay crack free.
        if coord.zoom > SMOOTH_ZOOM_CUTOFF {
            let dataset_bounds = *self.tiler.bounds();
            for border in Border::ALL {
                let neighbor = match Heightfield::neighbor_coord(grid, &coord, border) {
                    Some(n) => n,
                    None => continue,
                };
                if !dataset_bounds.overlaps(&grid.tile_bounds(&neighbor)) {
                    continue;
                }
                debug!("seam matching {coord} against neighbour {neighbor}");
                let neighbor_heights = self.tiler.read_tile_heights(reader, &neighbor)?;
                let mut neighbor_field = Heightfield::new(neighbor_heights, tile_size as usize)?;
                neighbor_field.apply_geometric_error(max_error, false);
                heightfield.apply_border_activation(&neighbor_field, border);
            }
        }

        let tile_bounds = grid.tile_bounds(&coord);
        let mut tile = MeshTile::new(coord);
        {
            let mut builder =
                TileMeshBuilder::new(&tile_bounds, &mut tile.mesh, tile_size, tile_size);
            heightfield.generate_mesh(&mut builder, 0);
        }
        tile.children = self.tiler.child_flags(&coord);

        Ok(tile)
    }
}
