//! Wire-format round trips for both tile kinds.

use glam::DVec3;
use terratile::geo::Srs;
use terratile::geometry::CrsBounds;
use terratile::tile::{
    decode_quantized_mesh, encode_quantized_mesh, HeightmapTile, MeshTile, TILE_SIZE,
};
use terratile::TileCoordinate;

const CELLS: usize = (TILE_SIZE * TILE_SIZE) as usize;

#[test]
fn quantization_scenarios() {
    let coord = TileCoordinate::new(0, 0, 0);
    let tile =
        HeightmapTile::from_raster_heights(coord, &[vec![-1000.0f32; 1], vec![13107.0; CELLS - 1]].concat());
    assert_eq!(tile.heights[0], 0);
    // (13107 + 1000) * 5 = 70535 overflows u16 and clamps.
    assert_eq!(tile.heights[1], 65535);
}

#[test]
fn heightmap_gzip_round_trip() {
    let coord = TileCoordinate::new(9, 301, 122);
    let heights: Vec<f32> = (0..CELLS).map(|i| ((i * 37) % 9000) as f32 - 500.0).collect();
    let mut tile = HeightmapTile::from_raster_heights(coord, &heights);
    tile.children.set_se();
    tile.children.set_ne();

    let mut wire = Vec::new();
    tile.write(&mut wire).unwrap();
    let back = HeightmapTile::read(coord, wire.as_slice()).unwrap();

    assert_eq!(back.heights, tile.heights);
    assert_eq!(back.children, tile.children);
    assert_eq!(back.mask(), tile.mask());
}

fn grid_mesh_tile(n: u32) -> (MeshTile, CrsBounds) {
    // A regular (n+1)^2 vertex sheet over one degree square.
    let bounds = CrsBounds::ordered(6.0, 44.0, 7.0, 45.0);
    let mut tile = MeshTile::new(TileCoordinate::new(10, 500, 600));
    let step = 1.0 / n as f64;
    for j in 0..=n {
        for i in 0..=n {
            tile.mesh.vertices.push(DVec3::new(
                6.0 + i as f64 * step,
                44.0 + j as f64 * step,
                ((i * 13 + j * 7) % 800) as f64,
            ));
        }
    }
    for j in 0..n {
        for i in 0..n {
            let a = j * (n + 1) + i;
            let b = a + 1;
            let c = a + n + 1;
            let d = c + 1;
            tile.mesh.indices.extend_from_slice(&[a, b, d, a, d, c]);
        }
    }
    (tile, bounds)
}

#[test]
fn quantized_mesh_round_trip_within_one_unit() {
    let (tile, bounds) = grid_mesh_tile(8);
    let bytes = encode_quantized_mesh(&tile, &bounds, Srs::WGS84, false).unwrap();
    let decoded = decode_quantized_mesh(&bytes).unwrap();

    assert_eq!(decoded.indices.len(), tile.mesh.indices.len());
    assert_eq!(decoded.u.len(), tile.mesh.vertices.len());

    // The encoder may renumber vertices into first-use order, so compare
    // triangle by triangle: each decoded corner must quantize back to the
    // matching source corner within one unit per axis.
    let height_range = decoded.max_height as f64 - decoded.min_height as f64;
    for (slot, &src_index) in tile.mesh.indices.iter().enumerate() {
        let v = tile.mesh.vertices[src_index as usize];
        let k = decoded.indices[slot] as usize;
        let u = (v.x - bounds.min_x()) / bounds.width() * 32767.0;
        let vv = (v.y - bounds.min_y()) / bounds.height() * 32767.0;
        let h = (v.z - decoded.min_height as f64) / height_range * 32767.0;
        assert!((decoded.u[k] as f64 - u).abs() <= 1.0);
        assert!((decoded.v[k] as f64 - vv).abs() <= 1.0);
        assert!((decoded.height[k] as f64 - h).abs() <= 1.0);
    }
}

#[test]
fn quantized_mesh_edge_lists_cover_the_boundary() {
    let n = 8;
    let (tile, bounds) = grid_mesh_tile(n);
    let bytes = encode_quantized_mesh(&tile, &bounds, Srs::WGS84, false).unwrap();
    let decoded = decode_quantized_mesh(&bytes).unwrap();

    assert_eq!(decoded.west.len() as u32, n + 1);
    assert_eq!(decoded.south.len() as u32, n + 1);
    assert_eq!(decoded.east.len() as u32, n + 1);
    assert_eq!(decoded.north.len() as u32, n + 1);
    for &i in &decoded.west {
        assert_eq!(decoded.u[i as usize], 0);
    }
    for &i in &decoded.east {
        assert_eq!(decoded.u[i as usize], 32767);
    }
    for &i in &decoded.south {
        assert_eq!(decoded.v[i as usize], 0);
    }
    for &i in &decoded.north {
        assert_eq!(decoded.v[i as usize], 32767);
    }
}

#[test]
fn quantized_mesh_normals_point_away_from_earth() {
    let (tile, bounds) = grid_mesh_tile(4);
    let bytes = encode_quantized_mesh(&tile, &bounds, Srs::WGS84, true).unwrap();
    let decoded = decode_quantized_mesh(&bytes).unwrap();
    let normals = decoded.oct_normals.expect("normals present");
    assert_eq!(normals.len(), tile.mesh.vertices.len());

    // Decode the first oct normal and check it roughly opposes gravity: the
    // tile sits at ~44.5N, 6.5E, so the up vector has positive x and z.
    let n = normals[0];
    let px = n[0] as f64 / 255.0 * 2.0 - 1.0;
    let py = n[1] as f64 / 255.0 * 2.0 - 1.0;
    let pz = 1.0 - px.abs() - py.abs();
    assert!(pz > 0.0, "normal should be in the upper hemisphere");
}
