//! Chunked-LOD behaviour over whole heightfields: the documented flat and
//! planar scenarios, labeling monotonicity, and mesh well-formedness.

use terratile::geometry::CrsBounds;
use terratile::heightfield::Heightfield;
use terratile::tile::{Mesh, TileMeshBuilder};

fn mesh_at_level_zero(heights: Vec<f32>, bounds: &CrsBounds) -> Mesh {
    let mut hf = Heightfield::new(heights, 65).unwrap();
    hf.apply_geometric_error(1.0, false);
    let mut mesh = Mesh::default();
    let mut builder = TileMeshBuilder::new(bounds, &mut mesh, 65, 65);
    hf.generate_mesh(&mut builder, 0);
    mesh
}

#[test]
fn constant_field_yields_two_triangles() {
    let bounds = CrsBounds::ordered(0.0, 0.0, 1.0, 1.0);
    let mesh = mesh_at_level_zero(vec![500.0; 65 * 65], &bounds);
    assert_eq!(mesh.vertices.len(), 4);
    assert_eq!(mesh.triangle_count(), 2);
}

#[test]
fn planar_ramp_yields_two_triangles() {
    let bounds = CrsBounds::ordered(0.0, 0.0, 1.0, 1.0);
    let mut heights = Vec::with_capacity(65 * 65);
    for _y in 0..65 {
        for x in 0..65 {
            heights.push(100.0 * x as f32);
        }
    }
    let mesh = mesh_at_level_zero(heights, &bounds);
    assert_eq!(mesh.vertices.len(), 4);
    assert_eq!(mesh.triangle_count(), 2);
}

fn bumpy_heights() -> Vec<f32> {
    let mut heights = Vec::with_capacity(65 * 65);
    for y in 0..65i32 {
        for x in 0..65i32 {
            let v = (x as f32 * 0.31).sin() * 900.0 + (y as f32 * 0.17).cos() * 600.0;
            heights.push(v);
        }
    }
    heights
}

#[test]
fn labeling_is_monotone_in_the_error_bound() {
    let heights = bumpy_heights();
    let errors = [2.0, 8.0, 32.0, 128.0];
    let mut fields: Vec<Heightfield> = Vec::new();
    for e in errors {
        let mut hf = Heightfield::new(heights.clone(), 65).unwrap();
        hf.apply_geometric_error(e, false);
        fields.push(hf);
    }
    // Larger error bounds never raise a vertex's activation level.
    for pair in fields.windows(2) {
        for y in 0..65 {
            for x in 0..65 {
                assert!(pair[1].get_level(x, y) <= pair[0].get_level(x, y));
            }
        }
    }
}

#[test]
fn corners_stay_active_after_labeling() {
    let mut hf = Heightfield::new(bumpy_heights(), 65).unwrap();
    hf.apply_geometric_error(10.0, false);
    for (x, y) in [(0, 0), (64, 0), (0, 64), (64, 64)] {
        assert!(hf.get_level(x, y) >= 0, "corner ({x}, {y}) inactive");
    }
}

#[test]
fn emitted_mesh_is_well_formed() {
    let bounds = CrsBounds::ordered(7.0, 44.0, 8.0, 45.0);
    let mesh = mesh_at_level_zero(bumpy_heights(), &bounds);

    assert!(mesh.triangle_count() > 2);
    assert_eq!(mesh.indices.len() % 3, 0);
    for tri in mesh.indices.chunks_exact(3) {
        for &i in tri {
            assert!((i as usize) < mesh.vertices.len(), "index out of range");
        }
        assert!(
            tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2],
            "degenerate triangle {tri:?}"
        );
    }
}

#[test]
fn finer_error_bounds_emit_denser_meshes() {
    let bounds = CrsBounds::ordered(0.0, 0.0, 1.0, 1.0);
    let mut counts = Vec::new();
    for e in [256.0, 32.0, 4.0] {
        let mut hf = Heightfield::new(bumpy_heights(), 65).unwrap();
        hf.apply_geometric_error(e, false);
        let mut mesh = Mesh::default();
        let mut builder = TileMeshBuilder::new(&bounds, &mut mesh, 65, 65);
        hf.generate_mesh(&mut builder, 0);
        counts.push(mesh.triangle_count());
    }
    assert!(counts[0] <= counts[1] && counts[1] <= counts[2], "{counts:?}");
}
