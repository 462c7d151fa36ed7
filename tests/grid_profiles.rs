//! Grid profile algebra: resolution laws, round trips, and the documented
//! profile constants.

use glam::DVec2;
use terratile::geo::MERCATOR_ORIGIN_SHIFT;
use terratile::geometry::CrsBounds;
use terratile::{Grid, GridIterator, TileCoordinate};

#[test]
fn geodetic_profile_constants() {
    let grid = Grid::global_geodetic(256, true).unwrap();
    assert_eq!(grid.root_tiles(), 2);
    assert_eq!(grid.resolution(0), 360.0 / 2.0 / 256.0);
    assert_eq!(grid.resolution(0), 0.703125);
    assert_eq!(grid.resolution(1), 0.3515625);
    let t = grid.crs_to_tile(DVec2::new(0.0, 0.0), 1);
    assert_eq!((t.x, t.y), (2, 1));
}

#[test]
fn mercator_profile_constants() {
    let grid = Grid::global_mercator(256).unwrap();
    let shift = std::f64::consts::PI * 6378137.0;
    assert_eq!(MERCATOR_ORIGIN_SHIFT, shift);
    let b = grid.tile_bounds(&TileCoordinate::new(0, 0, 0));
    assert!((b.min_x() + shift).abs() < 1e-7);
    assert!((b.min_y() + shift).abs() < 1e-7);
    assert!((b.max_x() - shift).abs() < 1e-7);
    assert!((b.max_y() - shift).abs() < 1e-7);
}

#[test]
fn resolution_law_is_exact() {
    for grid in [Grid::global_geodetic(65, true).unwrap(), Grid::global_mercator(65).unwrap()] {
        for z in 0..22u8 {
            assert_eq!(grid.resolution(z + 1), grid.resolution(z) / 2.0);
        }
    }
}

#[test]
fn zoom_for_resolution_brackets() {
    let grid = Grid::global_mercator(256).unwrap();
    for z in 1..=22u8 {
        for factor in [1.0, 1.3, 1.9] {
            let r = grid.resolution(z) * factor;
            let picked = grid.zoom_for_resolution(r);
            assert!(grid.resolution(picked) <= r);
            if picked >= 1 {
                assert!(grid.resolution(picked - 1) > r);
            }
        }
    }
}

#[test]
fn crs_pixel_round_trip() {
    let grid = Grid::global_mercator(256).unwrap();
    let points = [
        DVec2::new(0.0, 0.0),
        DVec2::new(1_000_000.0, -2_000_000.0),
        DVec2::new(-MERCATOR_ORIGIN_SHIFT * 0.99, MERCATOR_ORIGIN_SHIFT * 0.5),
    ];
    for z in 0..=22u8 {
        let tolerance = 0.5 * grid.resolution(z);
        for p in points {
            let round = grid.pixels_to_crs(grid.crs_to_pixels(p, z), z);
            assert!((round.x - p.x).abs() <= tolerance);
            assert!((round.y - p.y).abs() <= tolerance);
        }
    }
}

#[test]
fn boundary_pixels_belong_to_the_next_tile() {
    let grid = Grid::global_geodetic(256, true).unwrap();
    // The shared edge between the west and east hemisphere tiles at zoom 0.
    let west = grid.crs_to_tile(DVec2::new(-0.001, 0.0), 0);
    let east = grid.crs_to_tile(DVec2::new(0.0, 0.0), 0);
    assert_eq!(west.x, 0);
    assert_eq!(east.x, 1);
}

#[test]
fn iterator_total_matches_enumeration() {
    let grid = Grid::global_geodetic(65, true).unwrap();
    let extent = CrsBounds::ordered(-33.0, 12.0, -21.0, 31.5);
    let iter = GridIterator::new(&grid, extent, 5, 1).unwrap();
    let total = iter.total_tiles();
    let count = GridIterator::new(&grid, extent, 5, 1).unwrap().count() as u64;
    assert_eq!(total, count);
}
