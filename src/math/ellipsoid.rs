use serde::{Deserialize, Serialize};

/// An ellipsoid of revolution, described by its equatorial radius and the
/// square of its eccentricity.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// The equatorial radius in meters.
    pub semi_major_axis: f64,
    /// The square of the ellipsoid's eccentricity.
    pub eccentricity_squared: f64,
}

impl Ellipsoid {
    /// The WGS 84 reference ellipsoid.
    pub const WGS84: Ellipsoid = Ellipsoid {
        semi_major_axis: 6_378_137.0,
        eccentricity_squared: 0.006_694_379_990_141_4,
    };

    /// A sphere with the WGS 84 equatorial radius.
    pub const SPHERE: Ellipsoid = Ellipsoid {
        semi_major_axis: 6_378_137.0,
        eccentricity_squared: 0.0,
    };

    /// The polar radius in meters.
    pub fn semi_minor_axis(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity_squared).sqrt()
    }

    /// The radius of curvature in the prime vertical at the given geodetic
    /// latitude (radians).
    pub fn prime_vertical_radius(&self, latitude: f64) -> f64 {
        let sin_lat = latitude.sin();
        self.semi_major_axis / (1.0 - self.eccentricity_squared * sin_lat * sin_lat).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wgs84_polar_radius() {
        assert_relative_eq!(
            Ellipsoid::WGS84.semi_minor_axis(),
            6_356_752.314,
            max_relative = 1e-6
        );
    }

    #[test]
    fn prime_vertical_radius_ranges_from_equator_to_pole() {
        let e = Ellipsoid::WGS84;

        assert_relative_eq!(e.prime_vertical_radius(0.0), e.semi_major_axis);

        // At the pole the prime vertical radius is a / sqrt(1 - e^2).
        let polar = e.semi_major_axis / (1.0 - e.eccentricity_squared).sqrt();
        assert_relative_eq!(
            e.prime_vertical_radius(std::f64::consts::FRAC_PI_2),
            polar,
            max_relative = 1e-12
        );
    }
}
