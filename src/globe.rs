use crate::math::{
    Ellipsoid, GeographicProjection, MercatorProjection, Position, Ray, Sector, Wgs84Projection,
};
use glam::{DMat4, DVec3};

/// An ellipsoid paired with the projection that maps geographic positions
/// onto it. All coordinate conversions in the crate go through a globe.
pub struct Globe {
    ellipsoid: Ellipsoid,
    projection: Box<dyn GeographicProjection>,
}

impl Globe {
    pub fn new(ellipsoid: Ellipsoid, projection: Box<dyn GeographicProjection>) -> Self {
        Self {
            ellipsoid,
            projection,
        }
    }

    /// An Earth globe with the WGS 84 ellipsoidal projection.
    pub fn wgs84() -> Self {
        Self::new(Ellipsoid::WGS84, Box::new(Wgs84Projection))
    }

    /// An Earth globe flattened onto the 2D Mercator plane.
    pub fn mercator() -> Self {
        Self::new(Ellipsoid::WGS84, Box::<MercatorProjection>::default())
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn projection(&self) -> &dyn GeographicProjection {
        self.projection.as_ref()
    }

    pub fn equatorial_radius(&self) -> f64 {
        self.ellipsoid.semi_major_axis
    }

    pub fn polar_radius(&self) -> f64 {
        self.ellipsoid.semi_minor_axis()
    }

    /// The sector beyond which the active projection is undefined, if any.
    pub fn projection_limits(&self) -> Option<Sector> {
        self.projection.projection_limits()
    }

    pub fn geographic_to_cartesian(&self, latitude: f64, longitude: f64, altitude: f64) -> DVec3 {
        self.projection
            .geographic_to_cartesian(&self.ellipsoid, latitude, longitude, altitude)
    }

    pub fn geographic_to_cartesian_normal(&self, latitude: f64, longitude: f64) -> DVec3 {
        self.projection
            .geographic_to_cartesian_normal(&self.ellipsoid, latitude, longitude)
    }

    pub fn geographic_to_cartesian_transform(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DMat4 {
        self.projection
            .geographic_to_cartesian_transform(&self.ellipsoid, latitude, longitude, altitude)
    }

    pub fn cartesian_to_geographic(&self, point: DVec3) -> Position {
        self.projection
            .cartesian_to_geographic(&self.ellipsoid, point)
    }

    /// The nearest positive-t intersection of a ray with the globe surface.
    pub fn intersect(&self, ray: Ray) -> Option<DVec3> {
        self.projection.intersect(&self.ellipsoid, ray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wgs84_globe_round_trips_through_the_transform_origin() {
        let globe = Globe::wgs84();

        let transform = globe.geographic_to_cartesian_transform(45.0, 45.0, 500.0);
        let origin = transform.w_axis.truncate();
        let position = globe.cartesian_to_geographic(origin);

        assert_relative_eq!(position.latitude, 45.0, epsilon = 1e-9);
        assert_relative_eq!(position.longitude, 45.0, epsilon = 1e-9);
        assert_relative_eq!(position.altitude, 500.0, epsilon = 1e-5);
    }

    #[test]
    fn mercator_globe_reports_projection_limits() {
        let globe = Globe::mercator();
        let limits = globe.projection_limits().unwrap();

        assert!(limits.max_latitude < 90.0);
        assert!(Globe::wgs84().projection_limits().is_none());
    }
}
