//! The shared-vertex triangle mesh and the strip consumer that builds one
//! from the chunker's output.

use std::collections::HashMap;

use glam::DVec3;

use super::ChildTiles;
use crate::geometry::{CrsBounds, CrsVertex};
use crate::grid::TileCoordinate;
use crate::heightfield::{Heightfield, StripSink};

/// An indexed triangle mesh in grid CRS coordinates, CCW winding.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<CrsVertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// A quantized-mesh terrain tile.
#[derive(Debug, Clone)]
pub struct MeshTile {
    pub coord: TileCoordinate,
    pub mesh: Mesh,
    pub children: ChildTiles,
}

impl MeshTile {
    pub fn new(coord: TileCoordinate) -> Self {
        Self { coord, mesh: Mesh::default(), children: ChildTiles::none() }
    }
}

/// Turns the chunker's strip into an indexed triangle list.
///
/// Every emitted vertex closes a triangle with the previous two; alternating
/// triangles swap their first two corners so the indexed list winds
/// uniformly. Degenerate window triples (corner turns in the strip) are
/// dropped.
pub struct TileMeshBuilder<'a> {
    mesh: &'a mut Mesh,
    min_x: f64,
    max_y: f64,
    cell_size_x: f64,
    cell_size_y: f64,
    index_map: HashMap<usize, u32>,
    window: [(i32, i32); 3],
    filled: usize,
    odd_order: bool,
}

impl<'a> TileMeshBuilder<'a> {
    pub fn new(bounds: &CrsBounds, mesh: &'a mut Mesh, tile_size_x: u32, tile_size_y: u32) -> Self {
        Self {
            mesh,
            min_x: bounds.min_x(),
            max_y: bounds.max_y(),
            cell_size_x: bounds.width() / (tile_size_x - 1) as f64,
            cell_size_y: bounds.height() / (tile_size_y - 1) as f64,
            index_map: HashMap::new(),
            window: [(-1, -1); 3],
            filled: 0,
            odd_order: false,
        }
    }

    fn append_vertex(&mut self, heightfield: &Heightfield, x: i32, y: i32) {
        let grid_index = heightfield.index_of(x, y);
        let iv = match self.index_map.get(&grid_index) {
            Some(&iv) => iv,
            None => {
                let iv = self.mesh.vertices.len() as u32;
                self.mesh.vertices.push(DVec3::new(
                    self.min_x + x as f64 * self.cell_size_x,
                    self.max_y - y as f64 * self.cell_size_y,
                    heightfield.height(x, y) as f64,
                ));
                self.index_map.insert(grid_index, iv);
                iv
            }
        };
        self.mesh.indices.push(iv);
    }
}

impl StripSink for TileMeshBuilder<'_> {
    fn clear(&mut self) {
        self.mesh.vertices.clear();
        self.mesh.indices.clear();
        self.index_map.clear();
        self.window = [(-1, -1); 3];
        self.filled = 0;
        self.odd_order = false;
    }

    fn emit_vertex(&mut self, heightfield: &Heightfield, x: i32, y: i32) {
        self.window[self.filled] = (x, y);
        self.filled += 1;

        if self.filled == 3 {
            self.odd_order = !self.odd_order;

            let [a, b, c] = self.window;
            if a != b && b != c && a != c {
                if self.odd_order {
                    self.append_vertex(heightfield, a.0, a.1);
                    self.append_vertex(heightfield, b.0, b.1);
                } else {
                    self.append_vertex(heightfield, b.0, b.1);
                    self.append_vertex(heightfield, a.0, a.1);
                }
                self.append_vertex(heightfield, c.0, c.1);
            }

            self.window[0] = self.window[1];
            self.window[1] = self.window[2];
            self.filled = 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_field() -> Heightfield {
        let mut hf = Heightfield::new(vec![500.0; 65 * 65], 65).unwrap();
        hf.apply_geometric_error(1.0, false);
        hf
    }

    #[test]
    fn flat_tile_meshes_to_two_triangles() {
        let mut hf = flat_field();
        let bounds = CrsBounds::ordered(0.0, 0.0, 1.0, 1.0);
        let mut mesh = Mesh::default();
        let mut builder = TileMeshBuilder::new(&bounds, &mut mesh, 65, 65);
        hf.generate_mesh(&mut builder, 0);

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        for idx in &mesh.indices {
            assert!((*idx as usize) < mesh.vertices.len());
        }
        // No degenerate triangles.
        for tri in mesh.indices.chunks_exact(3) {
            assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2]);
        }
        // All four tile corners present, heights carried through.
        for v in &mesh.vertices {
            assert!(v.x == 0.0 || v.x == 1.0);
            assert!(v.y == 0.0 || v.y == 1.0);
            assert_eq!(v.z, 500.0);
        }
    }

    #[test]
    fn bumpy_tile_triangulates_consistently() {
        let mut heights = vec![0.0f32; 65 * 65];
        for y in 0..65usize {
            for x in 0..65usize {
                heights[y * 65 + x] =
                    ((x as f32 * 0.37).sin() + (y as f32 * 0.23).cos()) * 800.0;
            }
        }
        let mut hf = Heightfield::new(heights, 65).unwrap();
        hf.apply_geometric_error(2.0, false);

        let bounds = CrsBounds::ordered(-5.0, 40.0, -4.0, 41.0);
        let mut mesh = Mesh::default();
        let mut builder = TileMeshBuilder::new(&bounds, &mut mesh, 65, 65);
        hf.generate_mesh(&mut builder, 0);

        assert!(mesh.triangle_count() > 2);
        assert_eq!(mesh.indices.len() % 3, 0);
        for tri in mesh.indices.chunks_exact(3) {
            assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2]);
            for &i in tri {
                assert!((i as usize) < mesh.vertices.len());
            }
        }
        // Signed area sums to the full tile: every grid cell is covered
        // exactly once with consistent orientation.
        let mut area = 0.0f64;
        for tri in mesh.indices.chunks_exact(3) {
            let a = mesh.vertices[tri[0] as usize];
            let b = mesh.vertices[tri[1] as usize];
            let c = mesh.vertices[tri[2] as usize];
            area += 0.5 * ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y));
        }
        assert!((area.abs() - 1.0).abs() < 1e-9, "covered area {area}");
    }
}
