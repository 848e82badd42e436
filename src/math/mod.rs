pub mod ellipsoid;
pub mod projection;
pub mod sector;

pub use ellipsoid::Ellipsoid;
pub use projection::{GeographicProjection, MercatorProjection, Position, Wgs84Projection};
pub use sector::Sector;

use glam::{DMat4, DVec3, DVec4};

/// A ray with an origin and a (not necessarily normalized) direction.
#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Ray {
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self { origin, direction }
    }

    pub fn point_at(&self, t: f64) -> DVec3 {
        self.origin + t * self.direction
    }
}

/// A bounding sphere, used as the per-tile cull volume.
#[derive(Copy, Clone, Debug)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    /// A sphere around the centroid of `points` containing all of them.
    pub fn from_points(points: &[DVec3]) -> Self {
        assert!(!points.is_empty(), "bounding sphere of no points");

        let center = points.iter().sum::<DVec3>() / points.len() as f64;
        let radius = points
            .iter()
            .map(|point| point.distance(center))
            .fold(0.0, f64::max);

        Self { center, radius }
    }

    /// Distance from `point` to the sphere's surface, zero inside.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (self.center.distance(point) - self.radius).max(0.0)
    }
}

/// A view frustum as six inward-facing planes, extracted from a combined
/// view-projection matrix (Gribb/Hartmann).
#[derive(Copy, Clone, Debug)]
pub struct Frustum {
    planes: [DVec4; 6],
}

impl Frustum {
    pub fn from_view_projection(matrix: DMat4) -> Self {
        let row = |i| DVec4::new(
            matrix.x_axis[i],
            matrix.y_axis[i],
            matrix.z_axis[i],
            matrix.w_axis[i],
        );

        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r3 + r2, // near
            r3 - r2, // far
        ]
        .map(|plane| {
            let normal = DVec3::new(plane.x, plane.y, plane.z);
            plane / normal.length()
        });

        Self { planes }
    }

    /// Whether the sphere is at least partially inside the frustum.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes.iter().all(|plane| {
            let distance = plane.x * sphere.center.x
                + plane.y * sphere.center.y
                + plane.z * sphere.center.z
                + plane.w;
            distance >= -sphere.radius
        })
    }
}
