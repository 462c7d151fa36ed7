//! Crack-freedom across tile borders: adjacent mesh tiles share identical
//! edge vertices after seam matching.

use std::sync::Arc;

use glam::DVec2;
use terratile::geo::Srs;
use terratile::raster::{GeoTransform, InMemoryDataset};
use terratile::tile::TILE_SIZE;
use terratile::tiler::{MeshTiler, TilerOptions};
use terratile::{Grid, TileCoordinate};

fn hilly_dataset() -> Arc<InMemoryDataset> {
    // 10 degrees square, 2048 px across: native max zoom comfortably > 6.
    let gt = GeoTransform::north_up(0.0, 50.0, 10.0 / 2048.0);
    Arc::new(InMemoryDataset::from_fn(2048, 2048, gt, Some(Srs::WGS84), |x, y| {
        (x as f32 * 0.013).sin() * 700.0 + (y as f32 * 0.007).cos() * 900.0
    }))
}

fn edge_profile(
    tile: &terratile::tile::MeshTile,
    edge_x: f64,
    cell: f64,
) -> Vec<(i64, f64)> {
    let mut edge: Vec<(i64, f64)> = tile
        .mesh
        .vertices
        .iter()
        .filter(|v| (v.x - edge_x).abs() < cell * 1e-6)
        .map(|v| ((v.y / cell * 1024.0).round() as i64, v.z))
        .collect();
    edge.sort_by_key(|(y, _)| *y);
    edge.dedup_by_key(|(y, _)| *y);
    edge
}

#[test]
fn adjacent_mesh_tiles_share_edge_vertices() {
    let grid = Grid::global_geodetic(TILE_SIZE, true).unwrap();
    let tiler = MeshTiler::new(hilly_dataset(), grid, TilerOptions::default(), 1.0).unwrap();
    let mut reader = tiler.tiler().make_reader().unwrap();

    let zoom = 8u8;
    assert!(zoom > 6 && zoom <= tiler.tiler().max_zoom());
    let grid = tiler.tiler().grid();

    // Two horizontally adjacent tiles well inside the dataset.
    let left_coord = grid.crs_to_tile(DVec2::new(5.0, 45.0), zoom);
    let right_coord = TileCoordinate::new(zoom, left_coord.x + 1, left_coord.y);
    let left_bounds = grid.tile_bounds(&left_coord);
    let right_bounds = grid.tile_bounds(&right_coord);
    assert!(tiler.tiler().bounds().overlaps(&left_bounds));
    assert!(tiler.tiler().bounds().overlaps(&right_bounds));

    let left = tiler.create_tile(&mut reader, left_coord).unwrap();
    let right = tiler.create_tile(&mut reader, right_coord).unwrap();

    let cell = left_bounds.width() / (TILE_SIZE - 1) as f64;
    let left_edge = edge_profile(&left, left_bounds.max_x(), cell);
    let right_edge = edge_profile(&right, right_bounds.min_x(), cell);

    assert!(!left_edge.is_empty());
    assert_eq!(
        left_edge.len(),
        right_edge.len(),
        "edge vertex counts differ: {} vs {}",
        left_edge.len(),
        right_edge.len()
    );
    for ((ly, lz), (ry, rz)) in left_edge.iter().zip(right_edge.iter()) {
        assert_eq!(ly, ry, "edge vertex rows differ");
        assert!((lz - rz).abs() < 1e-2, "edge heights differ: {lz} vs {rz}");
    }
}

#[test]
fn vertically_adjacent_tiles_share_edge_vertices() {
    let grid = Grid::global_geodetic(TILE_SIZE, true).unwrap();
    let tiler = MeshTiler::new(hilly_dataset(), grid, TilerOptions::default(), 1.0).unwrap();
    let mut reader = tiler.tiler().make_reader().unwrap();

    let zoom = 8u8;
    let grid = tiler.tiler().grid();
    let lower_coord = grid.crs_to_tile(DVec2::new(4.0, 44.0), zoom);
    let upper_coord = TileCoordinate::new(zoom, lower_coord.x, lower_coord.y + 1);
    let lower_bounds = grid.tile_bounds(&lower_coord);
    let upper_bounds = grid.tile_bounds(&upper_coord);

    let lower = tiler.create_tile(&mut reader, lower_coord).unwrap();
    let upper = tiler.create_tile(&mut reader, upper_coord).unwrap();

    let cell = lower_bounds.width() / (TILE_SIZE - 1) as f64;
    let collect = |tile: &terratile::tile::MeshTile, edge_y: f64| {
        let mut edge: Vec<(i64, f64)> = tile
            .mesh
            .vertices
            .iter()
            .filter(|v| (v.y - edge_y).abs() < cell * 1e-6)
            .map(|v| ((v.x / cell * 1024.0).round() as i64, v.z))
            .collect();
        edge.sort_by_key(|(x, _)| *x);
        edge.dedup_by_key(|(x, _)| *x);
        edge
    };
    let lower_edge = collect(&lower, lower_bounds.max_y());
    let upper_edge = collect(&upper, upper_bounds.min_y());

    assert!(!lower_edge.is_empty());
    assert_eq!(lower_edge.len(), upper_edge.len());
    for ((lx, lz), (ux, uz)) in lower_edge.iter().zip(upper_edge.iter()) {
        assert_eq!(lx, ux);
        assert!((lz - uz).abs() < 1e-2);
    }
}
