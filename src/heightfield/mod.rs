//! Chunked-LOD labeling and strip emission over a square height grid.
//!
//! The algorithm is the Lindstrom-Koller BTT update refined by Ulrich's
//! chunked-LOD scheme: every vertex of a `(2^n + 1)^2` grid is labeled with
//! the smallest LOD level at which it must be retained to keep the
//! triangulated surface within a geometric error bound, activation levels
//! are propagated up the quadtree dependency graph, and a continuous
//! triangle strip is emitted for any target level by walking the four
//! triangular quadrants of the square counter-clockwise.

use crate::error::{TerrainError, TerrainResult};
use crate::grid::{Grid, TileCoordinate};

/// The four shared borders of a tile, in the order the seam pass visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    Left,
    Top,
    Right,
    Bottom,
}

impl Border {
    pub const ALL: [Border; 4] = [Border::Left, Border::Top, Border::Right, Border::Bottom];
}

/// Consumes vertices in triangle-strip order as the mesh generator walks the
/// grid.
pub trait StripSink {
    fn clear(&mut self);
    fn emit_vertex(&mut self, heightfield: &Heightfield, x: i32, y: i32);
}

/// A square grid of heights with a nibble-packed activation level per vertex.
///
/// Levels are packed two per byte: the even-`x` vertex occupies the low
/// nibble and the odd-`x` vertex the high nibble; `0x0F` means "not
/// activated".
pub struct Heightfield {
    heights: Vec<f32>,
    size: i32,
    log_size: i32,
    levels: Vec<u8>,
}

impl Heightfield {
    pub fn new(heights: Vec<f32>, size: usize) -> TerrainResult<Self> {
        if size < 3 || !(size - 1).is_power_of_two() || heights.len() != size * size {
            return Err(TerrainError::InvalidHeightfieldSize(size));
        }
        let log_size = (size - 1).trailing_zeros() as i32;
        let levels = vec![0xFF; size * (size + 1) / 2];
        Ok(Self { heights, size: size as i32, log_size, levels })
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    /// Row-major array index of a grid coordinate.
    pub fn index_of(&self, x: i32, y: i32) -> usize {
        (y * self.size + x) as usize
    }

    pub fn height(&self, x: i32, y: i32) -> f32 {
        self.heights[self.index_of(x, y)]
    }

    /// The activation level at a vertex, or -1 when not activated.
    pub fn get_level(&self, x: i32, y: i32) -> i32 {
        let byte = self.levels[self.level_index(x, y)];
        let nibble = if x & 1 != 0 { byte >> 4 } else { byte } & 0x0F;
        if nibble == 0x0F {
            -1
        } else {
            nibble as i32
        }
    }

    fn set_level(&mut self, x: i32, y: i32, new_level: i32) {
        let new_level = (new_level & 0x0F) as u8;
        let idx = self.level_index(x, y);
        let byte = self.levels[idx];
        self.levels[idx] = if x & 1 != 0 {
            (byte & 0x0F) | (new_level << 4)
        } else {
            (byte & 0xF0) | new_level
        };
    }

    /// Raise the activation level of a vertex; never lowers it.
    pub fn activate(&mut self, x: i32, y: i32, level: i32) {
        if level > self.get_level(x, y) {
            self.set_level(x, y, level);
        }
    }

    fn level_index(&self, x: i32, y: i32) -> usize {
        // Two vertices per byte along x.
        (y * ((self.size + 1) / 2) + x / 2) as usize
    }

    /// Label every vertex with its activation level for a maximum geometric
    /// error, then propagate levels up the quadtree dependency graph.
    pub fn apply_geometric_error(&mut self, max_error: f64, smooth_small_zooms: bool) {
        for byte in self.levels.iter_mut() {
            *byte = 0xFF;
        }

        // View-independent L-K style BTT update over the two triangles that
        // halve the square.
        let size = self.size - 1;
        self.update(max_error, 0, size, size, size, 0, 0);
        self.update(max_error, size, 0, 0, 0, size, size);

        // The corner verts always survive.
        self.activate(size, 0, 0);
        self.activate(0, 0, 0);
        self.activate(0, size, 0);
        self.activate(size, size, 0);

        // At small zooms a sparse lattice keeps the globe silhouette smooth.
        if smooth_small_zooms {
            let step = (size / 16).max(1);
            let mut x = 0;
            while x <= size {
                let mut y = 0;
                while y <= size {
                    if self.get_level(x, y) == -1 {
                        self.activate(x, y, 0);
                    }
                    y += step;
                }
                x += step;
            }
        }

        self.propagate_all();
    }

    /// The tile coordinate of the neighbour across `border`, when it exists
    /// within the grid.
    pub fn neighbor_coord(
        grid: &Grid,
        coord: &TileCoordinate,
        border: Border,
    ) -> Option<TileCoordinate> {
        let extent = grid.tile_extent(coord.zoom);
        match border {
            Border::Left => {
                (coord.x > 0).then(|| TileCoordinate::new(coord.zoom, coord.x - 1, coord.y))
            }
            Border::Top => (coord.y < extent.max_y())
                .then(|| TileCoordinate::new(coord.zoom, coord.x, coord.y + 1)),
            Border::Right => (coord.x < extent.max_x())
                .then(|| TileCoordinate::new(coord.zoom, coord.x + 1, coord.y)),
            Border::Bottom => {
                (coord.y > 0).then(|| TileCoordinate::new(coord.zoom, coord.x, coord.y - 1))
            }
        }
    }

    /// Mirror the activation state of the shared border of a labeled
    /// neighbour onto this field, then re-propagate.
    pub fn apply_border_activation(&mut self, neighbor: &Heightfield, border: Border) {
        let last = self.size - 1;
        match border {
            Border::Left => {
                for y in 0..self.size {
                    let level = neighbor.get_level(last, y);
                    if level != -1 {
                        self.activate(0, y, level);
                    }
                }
            }
            Border::Top => {
                for x in 0..self.size {
                    let level = neighbor.get_level(x, last);
                    if level != -1 {
                        self.activate(x, 0, level);
                    }
                }
            }
            Border::Right => {
                for y in 0..self.size {
                    let level = neighbor.get_level(0, y);
                    if level != -1 {
                        self.activate(last, y, level);
                    }
                }
            }
            Border::Bottom => {
                for x in 0..self.size {
                    let level = neighbor.get_level(x, 0);
                    if level != -1 {
                        self.activate(x, last, level);
                    }
                }
            }
        }

        self.propagate_all();
    }

    fn propagate_all(&mut self) {
        // Two passes with identical parameters; idempotent because
        // activation only ever raises levels.
        let center = self.size >> 1;
        for target in 0..self.log_size {
            self.propagate_activation_level(center, center, self.log_size - 1, target);
            self.propagate_activation_level(center, center, self.log_size - 1, target);
        }
    }

    /// Computes an error value for the base vertex of the given triangle and
    /// recurses to its children.
    fn update(
        &mut self,
        base_max_error: f64,
        ax: i32,
        ay: i32,
        rx: i32,
        ry: i32,
        lx: i32,
        ly: i32,
    ) -> bool {
        let mut activated = false;

        let dx = lx - rx;
        let dy = ly - ry;
        if dx.abs() <= 1 && dy.abs() <= 1 {
            // Pixel scale: no base vertex, no children.
            return false;
        }

        // The base vert sits midway between the left and right verts.
        let bx = rx + (dx >> 1);
        let by = ry + (dy >> 1);

        let height_b = self.height(bx, by) as f64;
        let height_l = self.height(lx, ly) as f64;
        let height_r = self.height(rx, ry) as f64;
        let error_b = (height_b - 0.5 * (height_l + height_r)).abs();

        if error_b >= base_max_error {
            // The mesh level above which this vertex must be included.
            let activation_level = (error_b / base_max_error).log2() + 0.5;
            self.activate(bx, by, activation_level.floor() as i32);
            activated = true;
        }

        self.update(base_max_error, bx, by, ax, ay, rx, ry); // base, apex, right
        self.update(base_max_error, bx, by, lx, ly, ax, ay); // base, left, apex

        activated
    }

    /// Quadtree descent that propagates child-centre levels to the square's
    /// edge midpoints and the edge midpoints to its centre. Must be called
    /// with successively increasing `target_level`.
    fn propagate_activation_level(&mut self, cx: i32, cy: i32, level: i32, target_level: i32) {
        let half_size = 1 << level;
        let quarter_size = half_size >> 1;

        if level > target_level {
            for j in 0..2 {
                for i in 0..2 {
                    self.propagate_activation_level(
                        cx - quarter_size + half_size * i,
                        cy - quarter_size + half_size * j,
                        level - 1,
                        target_level,
                    );
                }
            }
            return;
        }

        if level > 0 {
            // Child verts to edge verts.
            let mut lev = self.get_level(cx + quarter_size, cy - quarter_size); // ne
            self.activate(cx + half_size, cy, lev);
            self.activate(cx, cy - half_size, lev);

            lev = self.get_level(cx - quarter_size, cy - quarter_size); // nw
            self.activate(cx, cy - half_size, lev);
            self.activate(cx - half_size, cy, lev);

            lev = self.get_level(cx - quarter_size, cy + quarter_size); // sw
            self.activate(cx - half_size, cy, lev);
            self.activate(cx, cy + half_size, lev);

            lev = self.get_level(cx + quarter_size, cy + quarter_size); // se
            self.activate(cx, cy + half_size, lev);
            self.activate(cx + half_size, cy, lev);
        }

        // Edge verts to center.
        let e = self.get_level(cx + half_size, cy);
        self.activate(cx, cy, e);
        let n = self.get_level(cx, cy - half_size);
        self.activate(cx, cy, n);
        let s = self.get_level(cx, cy + half_size);
        self.activate(cx, cy, s);
        let w = self.get_level(cx - half_size, cy);
        self.activate(cx, cy, w);
    }

    /// Emit the continuous triangle strip covering every vertex active at
    /// `activation_level`.
    pub fn generate_mesh<S: StripSink>(&mut self, sink: &mut S, activation_level: i32) {
        let size = 1 << self.log_size;
        let half_size = size >> 1;

        // The corner verts must be active at the emitted level.
        self.activate(size, 0, activation_level);
        self.activate(0, 0, activation_level);
        self.activate(0, size, activation_level);
        self.activate(size, size, activation_level);

        sink.clear();
        self.generate_block(sink, activation_level, self.log_size, half_size, half_size);
    }

    /// Walk the four triangular quadrants counter-clockwise starting from
    /// the south-east corner, producing one continuous strip with corners
    /// turned via degenerate triangles. Paraphrased from Lindstrom et al.,
    /// SIGGRAPH '96.
    fn generate_block<S: StripSink>(
        &self,
        sink: &mut S,
        activation_level: i32,
        log_size: i32,
        cx: i32,
        cy: i32,
    ) {
        let hs = 1 << (log_size - 1);

        // Quadrant corner coordinates: se, ne, nw, sw.
        let q = [
            (cx + hs, cy + hs),
            (cx + hs, cy - hs),
            (cx - hs, cy - hs),
            (cx - hs, cy + hs),
        ];

        let mut state = GenState::new(activation_level);

        sink.emit_vertex(self, q[0].0, q[0].1);
        state.set_buffer(q[0].0, q[0].1);

        for i in 0..4 {
            if state.previous_level & 1 == 0 {
                // Turn a corner.
                state.ptr ^= 1;
            } else {
                // Jump via a degenerate triangle.
                let (x, y) = state.buffer[1 - state.ptr];
                sink.emit_vertex(self, x, y);
            }

            sink.emit_vertex(self, q[i].0, q[i].1);
            state.set_buffer(q[i].0, q[i].1);
            state.previous_level = 2 * log_size + 1;

            let r = q[(i + 1) & 3];
            self.generate_quadrant(sink, &mut state, q[i].0, q[i].1, cx, cy, r.0, r.1, 2 * log_size);
        }

        if !state.in_buffer(q[0].0, q[0].1) {
            // Finish off the strip.
            sink.emit_vertex(self, q[0].0, q[0].1);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn generate_quadrant<S: StripSink>(
        &self,
        sink: &mut S,
        state: &mut GenState,
        lx: i32,
        ly: i32,
        tx: i32,
        ty: i32,
        rx: i32,
        ry: i32,
        recursion_level: i32,
    ) {
        if recursion_level <= 0 {
            return;
        }

        if self.get_level(tx, ty) >= state.activation_level {
            let bx = (lx + rx) >> 1;
            let by = (ly + ry) >> 1;

            // Left half of the quadrant.
            self.generate_quadrant(sink, state, lx, ly, bx, by, tx, ty, recursion_level - 1);

            if !state.in_buffer(tx, ty) {
                if (recursion_level + state.previous_level) & 1 != 0 {
                    state.ptr ^= 1;
                } else {
                    let (x, y) = state.buffer[1 - state.ptr];
                    sink.emit_vertex(self, x, y);
                }
                sink.emit_vertex(self, tx, ty);
                state.set_buffer(tx, ty);
                state.previous_level = recursion_level;
            }

            // Right half of the quadrant.
            self.generate_quadrant(sink, state, tx, ty, bx, by, rx, ry, recursion_level - 1);
        }
    }
}

/// Strip-generation state: the last two emitted vertices and the recursion
/// parity that decides between corner turns and degenerate jumps.
struct GenState {
    buffer: [(i32, i32); 2],
    activation_level: i32,
    ptr: usize,
    previous_level: i32,
}

impl GenState {
    fn new(activation_level: i32) -> Self {
        Self { buffer: [(-1, -1); 2], activation_level, ptr: 0, previous_level: 0 }
    }

    fn in_buffer(&self, x: i32, y: i32) -> bool {
        self.buffer[0] == (x, y) || self.buffer[1] == (x, y)
    }

    fn set_buffer(&mut self, x: i32, y: i32) {
        self.buffer[self.ptr] = (x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        vertices: Vec<(i32, i32)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { vertices: Vec::new() }
        }
    }

    impl StripSink for RecordingSink {
        fn clear(&mut self) {
            self.vertices.clear();
        }

        fn emit_vertex(&mut self, _hf: &Heightfield, x: i32, y: i32) {
            self.vertices.push((x, y));
        }
    }

    fn constant_field(size: usize, value: f32) -> Heightfield {
        Heightfield::new(vec![value; size * size], size).unwrap()
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(Heightfield::new(vec![0.0; 64 * 64], 64).is_err());
        assert!(Heightfield::new(vec![0.0; 9], 4).is_err());
        assert!(Heightfield::new(vec![0.0; 65 * 65], 65).is_ok());
    }

    #[test]
    fn nibble_packing_round_trips() {
        let mut hf = constant_field(65, 0.0);
        assert_eq!(hf.get_level(10, 3), -1);
        hf.activate(10, 3, 5);
        hf.activate(11, 3, 9);
        assert_eq!(hf.get_level(10, 3), 5);
        assert_eq!(hf.get_level(11, 3), 9);
        // Activation never lowers a level.
        hf.activate(11, 3, 2);
        assert_eq!(hf.get_level(11, 3), 9);
    }

    #[test]
    fn constant_field_activates_only_corners() {
        let mut hf = constant_field(65, 500.0);
        hf.apply_geometric_error(1.0, false);
        let mut active = 0;
        for y in 0..65 {
            for x in 0..65 {
                if hf.get_level(x, y) >= 0 {
                    active += 1;
                    assert!(
                        (x == 0 || x == 64) && (y == 0 || y == 64),
                        "unexpected active vertex at ({x}, {y})"
                    );
                }
            }
        }
        assert_eq!(active, 4);
    }

    #[test]
    fn planar_ramp_activates_only_corners() {
        let mut heights = Vec::with_capacity(65 * 65);
        for _y in 0..65 {
            for x in 0..65 {
                heights.push(100.0 * x as f32);
            }
        }
        let mut hf = Heightfield::new(heights, 65).unwrap();
        hf.apply_geometric_error(1.0, false);
        let active = (0..65 * 65)
            .filter(|i| hf.get_level(i % 65, i / 65) >= 0)
            .count();
        assert_eq!(active, 4);
    }

    #[test]
    fn labeling_is_monotone_in_error() {
        let mut heights = Vec::with_capacity(65 * 65);
        for y in 0..65i32 {
            for x in 0..65i32 {
                let v = ((x as f32 / 7.0).sin() + (y as f32 / 5.0).cos()) * 300.0;
                heights.push(v);
            }
        }

        let mut coarse = Heightfield::new(heights.clone(), 65).unwrap();
        coarse.apply_geometric_error(50.0, false);
        let mut fine = Heightfield::new(heights, 65).unwrap();
        fine.apply_geometric_error(5.0, false);

        for y in 0..65 {
            for x in 0..65 {
                assert!(
                    coarse.get_level(x, y) <= fine.get_level(x, y),
                    "level at ({x}, {y}) grew with a larger error bound"
                );
            }
        }
    }

    #[test]
    fn smooth_small_zooms_activates_lattice() {
        let mut hf = constant_field(65, 0.0);
        hf.apply_geometric_error(1.0, true);
        for x in (0..=64).step_by(4) {
            for y in (0..=64).step_by(4) {
                assert!(hf.get_level(x, y) >= 0, "lattice vertex ({x}, {y}) inactive");
            }
        }
    }

    #[test]
    fn strip_for_flat_field_is_minimal() {
        let mut hf = constant_field(65, 500.0);
        hf.apply_geometric_error(1.0, false);
        let mut sink = RecordingSink::new();
        hf.generate_mesh(&mut sink, 0);
        // Strip touches only the four corners.
        for (x, y) in &sink.vertices {
            assert!((*x == 0 || *x == 64) && (*y == 0 || *y == 64));
        }
        assert!(sink.vertices.len() >= 4);
    }

    #[test]
    fn border_activation_copies_neighbor_edge() {
        let mut a = constant_field(65, 0.0);
        // A bumpy neighbour whose west border carries activations.
        let mut heights = vec![0.0f32; 65 * 65];
        for y in 0..65 {
            heights[y * 65 + 32] = 4000.0;
        }
        let mut b = Heightfield::new(heights, 65).unwrap();
        b.apply_geometric_error(1.0, false);

        a.apply_geometric_error(1.0, false);
        a.apply_border_activation(&b, Border::Right);
        for y in 0..65 {
            let nb = b.get_level(0, y);
            if nb != -1 {
                assert!(a.get_level(64, y) >= nb);
            }
        }
    }

    #[test]
    fn neighbor_coords_respect_grid_edges() {
        let grid = Grid::global_geodetic(65, true).unwrap();
        let corner = TileCoordinate::new(2, 0, 0);
        assert!(Heightfield::neighbor_coord(&grid, &corner, Border::Left).is_none());
        assert!(Heightfield::neighbor_coord(&grid, &corner, Border::Bottom).is_none());
        assert_eq!(
            Heightfield::neighbor_coord(&grid, &corner, Border::Right),
            Some(TileCoordinate::new(2, 1, 0))
        );
        assert_eq!(
            Heightfield::neighbor_coord(&grid, &corner, Border::Top),
            Some(TileCoordinate::new(2, 0, 1))
        );
    }
}
