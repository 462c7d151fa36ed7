//! Spatial reference systems and coordinate transforms.
//!
//! The grid profiles only ever live in EPSG:4326 or EPSG:3857, so the
//! transform between those two is provided in closed form. Any other CRS
//! pair is routed through the PROJ library behind the `proj` cargo feature.

use glam::DVec2;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use thiserror::Error;

/// Error type for spatial reference operations.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("projection error: {0}")]
    Projection(String),

    #[error("invalid CRS: {0}")]
    InvalidCrs(String),

    #[error("unsupported CRS pair EPSG:{from} -> EPSG:{to} (proj feature not enabled)")]
    ProjNotAvailable { from: u32, to: u32 },
}

/// A spatial reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Srs {
    epsg: u32,
}

impl Srs {
    /// Geographic WGS84.
    pub const WGS84: Srs = Srs { epsg: 4326 };

    /// Spherical (web) Mercator.
    pub const WEB_MERCATOR: Srs = Srs { epsg: 3857 };

    pub fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// True for coordinate systems expressed in degrees.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, 4326 | 4269 | 4267)
    }

    pub fn authority_string(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

/// Semi-major axis of the WGS84 ellipsoid in meters.
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// Semi-minor axis of the WGS84 ellipsoid in meters.
pub const WGS84_SEMI_MINOR_AXIS: f64 = 6_356_752.314_245_179_3;

/// Half the equatorial circumference: the Mercator grid origin shift.
pub const MERCATOR_ORIGIN_SHIFT: f64 = std::f64::consts::PI * WGS84_SEMI_MAJOR_AXIS;

/// Transformer libraries are historically not re-entrant during
/// bootstrapping, so transformer creation is serialized process-wide.
static TRANSFORMER_INIT: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

enum TransformKind {
    Identity,
    GeodeticToMercator,
    MercatorToGeodetic,
    #[cfg(feature = "proj")]
    Proj(proj::Proj),
}

/// A point transform between two spatial reference systems.
pub struct CrsTransform {
    kind: TransformKind,
    from: Srs,
    to: Srs,
}

impl CrsTransform {
    pub fn new(from: Srs, to: Srs) -> Result<Self, GeoError> {
        let kind = match (from.epsg(), to.epsg()) {
            (a, b) if a == b => TransformKind::Identity,
            (4326, 3857) => TransformKind::GeodeticToMercator,
            (3857, 4326) => TransformKind::MercatorToGeodetic,
            #[cfg(feature = "proj")]
            (_, _) => {
                let _guard = TRANSFORMER_INIT.lock().unwrap();
                let p = proj::Proj::new_known_crs(
                    &from.authority_string(),
                    &to.authority_string(),
                    None,
                )
                .map_err(|e| GeoError::Projection(format!("failed to create transform: {e}")))?;
                TransformKind::Proj(p)
            }
            #[cfg(not(feature = "proj"))]
            (a, b) => {
                let _guard = TRANSFORMER_INIT.lock().unwrap();
                return Err(GeoError::ProjNotAvailable { from: a, to: b });
            }
        };
        Ok(Self { kind, from, to })
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, TransformKind::Identity)
    }

    pub fn from_srs(&self) -> Srs {
        self.from
    }

    pub fn to_srs(&self) -> Srs {
        self.to
    }

    pub fn apply(&self, p: DVec2) -> Result<DVec2, GeoError> {
        match &self.kind {
            TransformKind::Identity => Ok(p),
            TransformKind::GeodeticToMercator => Ok(geodetic_to_mercator(p)),
            TransformKind::MercatorToGeodetic => Ok(mercator_to_geodetic(p)),
            #[cfg(feature = "proj")]
            TransformKind::Proj(t) => {
                let (x, y) = t
                    .convert((p.x, p.y))
                    .map_err(|e| GeoError::Projection(format!(
                        "transform failed at ({}, {}): {e}",
                        p.x, p.y
                    )))?;
                Ok(DVec2::new(x, y))
            }
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Result<Self, GeoError> {
        CrsTransform::new(self.to, self.from)
    }
}

/// Longitude/latitude in degrees to spherical Mercator meters.
pub fn geodetic_to_mercator(p: DVec2) -> DVec2 {
    let x = p.x * MERCATOR_ORIGIN_SHIFT / 180.0;
    let y = ((90.0 + p.y) * std::f64::consts::PI / 360.0).tan().ln()
        / (std::f64::consts::PI / 180.0)
        * MERCATOR_ORIGIN_SHIFT
        / 180.0;
    DVec2::new(x, y)
}

/// Spherical Mercator meters to longitude/latitude in degrees.
pub fn mercator_to_geodetic(p: DVec2) -> DVec2 {
    let lon = p.x / MERCATOR_ORIGIN_SHIFT * 180.0;
    let lat = 180.0 / std::f64::consts::PI
        * (2.0 * ((p.y / MERCATOR_ORIGIN_SHIFT * std::f64::consts::PI).exp()).atan()
            - std::f64::consts::PI / 2.0);
    DVec2::new(lon, lat)
}

/// Geodetic longitude/latitude/height (degrees, meters) to earth-centered
/// earth-fixed coordinates on the WGS84 ellipsoid.
pub fn geodetic_to_ecef(lon_deg: f64, lat_deg: f64, height: f64) -> glam::DVec3 {
    // First eccentricity squared of the WGS84 ellipsoid.
    const E2: f64 = 0.006_694_379_990_197_584_8;

    let lon = lon_deg.to_radians();
    let lat = lat_deg.to_radians();
    let sin_lat = lat.sin();
    let n = WGS84_SEMI_MAJOR_AXIS / (1.0 - E2 * sin_lat * sin_lat).sqrt();

    glam::DVec3::new(
        (n + height) * lat.cos() * lon.cos(),
        (n + height) * lat.cos() * lon.sin(),
        (n * (1.0 - E2) + height) * sin_lat,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercator_round_trip() {
        let p = DVec2::new(138.7274, 35.3606);
        let m = geodetic_to_mercator(p);
        let back = mercator_to_geodetic(m);
        assert!((back.x - p.x).abs() < 1e-9);
        assert!((back.y - p.y).abs() < 1e-9);
    }

    #[test]
    fn mercator_extent_corners() {
        let m = geodetic_to_mercator(DVec2::new(180.0, 0.0));
        assert!((m.x - MERCATOR_ORIGIN_SHIFT).abs() < 1e-6);
        assert!(m.y.abs() < 1e-6);
    }

    #[test]
    fn identity_transform() {
        let t = CrsTransform::new(Srs::WGS84, Srs::WGS84).unwrap();
        assert!(t.is_identity());
        let p = DVec2::new(1.0, 2.0);
        assert_eq!(t.apply(p).unwrap(), p);
    }

    #[test]
    fn ecef_of_equator_prime_meridian() {
        let e = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert!((e.x - WGS84_SEMI_MAJOR_AXIS).abs() < 1e-6);
        assert!(e.y.abs() < 1e-6);
        assert!(e.z.abs() < 1e-6);
    }

    #[test]
    fn ecef_of_north_pole() {
        let e = geodetic_to_ecef(0.0, 90.0, 0.0);
        assert!(e.x.abs() < 1e-6);
        assert!((e.z - WGS84_SEMI_MINOR_AXIS).abs() < 1e-3);
    }
}
