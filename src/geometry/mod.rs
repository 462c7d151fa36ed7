//! Geometry primitives shared by the grid and the tile encoders.

mod bounds;
mod sphere;

pub use bounds::{Bounds, CrsBounds, TileBounds};
pub use sphere::{BoundingBox, BoundingSphere};

/// A 2D coordinate in some coordinate reference system.
pub type CrsPoint = glam::DVec2;

/// A 3D vertex in CRS coordinates (x, y in the grid CRS, z in meters).
pub type CrsVertex = glam::DVec3;

/// A (possibly fractional) pixel location within a zoom level.
pub type PixelPoint = glam::DVec2;
