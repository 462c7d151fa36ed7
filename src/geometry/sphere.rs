//! Bounding volumes over 3D point sets.

use glam::DVec3;

/// An axis-aligned box around a point set.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    pub fn from_points(points: &[DVec3]) -> Self {
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self { min, max }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }
}

/// A spherical bounding region defined by a center point and a radius.
#[derive(Debug, Clone, Copy)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    /// Ritter's two-pass bounding sphere, compared against the naive sphere
    /// around the min/max box center; the smaller of the two is kept.
    pub fn from_points(points: &[DVec3]) -> Self {
        assert!(!points.is_empty(), "bounding sphere of an empty point set");

        // Pass 1: the extreme point along each axis.
        let mut min_px = points[0];
        let mut min_py = points[0];
        let mut min_pz = points[0];
        let mut max_px = points[0];
        let mut max_py = points[0];
        let mut max_pz = points[0];

        for p in points {
            if p.x < min_px.x {
                min_px = *p;
            }
            if p.y < min_py.y {
                min_py = *p;
            }
            if p.z < min_pz.z {
                min_pz = *p;
            }
            if p.x > max_px.x {
                max_px = *p;
            }
            if p.y > max_py.y {
                max_py = *p;
            }
            if p.z > max_pz.z {
                max_pz = *p;
            }
        }

        // The axis pair with the largest span seeds the initial diameter.
        let x_span = (max_px - min_px).length_squared();
        let y_span = (max_py - min_py).length_squared();
        let z_span = (max_pz - min_pz).length_squared();

        let (mut d1, mut d2, mut max_span) = (min_px, max_px, x_span);
        if y_span > max_span {
            d1 = min_py;
            d2 = max_py;
            max_span = y_span;
        }
        if z_span > max_span {
            d1 = min_pz;
            d2 = max_pz;
        }

        let mut ritter_center = (d1 + d2) * 0.5;
        let mut radius_squared = (d2 - ritter_center).length_squared();
        let mut ritter_radius = radius_squared.sqrt();

        let min_box = DVec3::new(min_px.x, min_py.y, min_pz.z);
        let max_box = DVec3::new(max_px.x, max_py.y, max_pz.z);
        let naive_center = (min_box + max_box) * 0.5;
        let mut naive_radius: f64 = 0.0;

        // Pass 2: grow the Ritter sphere to cover stragglers.
        for p in points {
            naive_radius = naive_radius.max((*p - naive_center).length());

            let old_center_to_point_squared = (*p - ritter_center).length_squared();
            if old_center_to_point_squared > radius_squared {
                let old_center_to_point = old_center_to_point_squared.sqrt();
                ritter_radius = (ritter_radius + old_center_to_point) * 0.5;
                radius_squared = ritter_radius * ritter_radius;

                let old_to_new = old_center_to_point - ritter_radius;
                ritter_center =
                    (ritter_center * ritter_radius + *p * old_to_new) / old_center_to_point;
            }
        }

        if naive_radius < ritter_radius {
            Self { center: naive_center, radius: naive_radius }
        } else {
            Self { center: ritter_center, radius: ritter_radius }
        }
    }

    /// Whether the sphere covers `point` (with a small tolerance for FP noise).
    pub fn contains(&self, point: DVec3) -> bool {
        (point - self.center).length() <= self.radius * (1.0 + 1e-12) + 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_covers_all_points() {
        let points = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(5.0, 8.0, 0.0),
            DVec3::new(5.0, 4.0, 7.0),
            DVec3::new(-3.0, 2.0, 1.0),
        ];
        let sphere = BoundingSphere::from_points(&points);
        for p in &points {
            assert!(sphere.contains(*p), "{p:?} outside sphere {sphere:?}");
        }
    }

    #[test]
    fn sphere_of_collinear_points_is_tight() {
        let points = vec![
            DVec3::new(-1.0, 0.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
        ];
        let sphere = BoundingSphere::from_points(&points);
        assert!((sphere.radius - 1.0).abs() < 1e-12);
        assert!(sphere.center.length() < 1e-12);
    }

    #[test]
    fn bbox_center() {
        let points = vec![DVec3::new(0.0, 2.0, 4.0), DVec3::new(2.0, 6.0, 0.0)];
        let bb = BoundingBox::from_points(&points);
        assert_eq!(bb.center(), DVec3::new(1.0, 4.0, 2.0));
    }
}
