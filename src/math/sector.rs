use serde::{Deserialize, Serialize};

/// A rectangular region on the globe, bounded by minimum and maximum
/// latitude and longitude in degrees.
///
/// Row/column arithmetic throughout the crate treats the minimum latitude as
/// the southern edge, so a sector's first grid row lies on `min_latitude`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Sector {
    /// The entire globe.
    pub const FULL_SPHERE: Sector = Sector {
        min_latitude: -90.0,
        max_latitude: 90.0,
        min_longitude: -180.0,
        max_longitude: 180.0,
    };

    /// Creates a sector from its bounds in degrees.
    ///
    /// Panics if a minimum exceeds its maximum.
    pub fn new(min_latitude: f64, max_latitude: f64, min_longitude: f64, max_longitude: f64) -> Self {
        assert!(
            min_latitude <= max_latitude && min_longitude <= max_longitude,
            "sector minimum exceeds maximum"
        );

        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    pub fn delta_latitude(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn delta_longitude(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }

    pub fn centroid_latitude(&self) -> f64 {
        0.5 * (self.min_latitude + self.max_latitude)
    }

    pub fn centroid_longitude(&self) -> f64 {
        0.5 * (self.min_longitude + self.max_longitude)
    }

    /// Whether this sector spans the full 360 degrees of longitude.
    pub fn is_full_longitude(&self) -> bool {
        self.delta_longitude() >= 360.0 - 1e-9
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_latitude
            && latitude <= self.max_latitude
            && longitude >= self.min_longitude
            && longitude <= self.max_longitude
    }

    pub fn intersects(&self, other: &Sector) -> bool {
        self.min_latitude <= other.max_latitude
            && self.max_latitude >= other.min_latitude
            && self.min_longitude <= other.max_longitude
            && self.max_longitude >= other.min_longitude
    }

    /// The overlapping region of two sectors, or `None` when they are disjoint.
    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        if !self.intersects(other) {
            return None;
        }

        Some(Sector {
            min_latitude: self.min_latitude.max(other.min_latitude),
            max_latitude: self.max_latitude.min(other.max_latitude),
            min_longitude: self.min_longitude.max(other.min_longitude),
            max_longitude: self.max_longitude.min(other.max_longitude),
        })
    }

    /// The smallest sector containing both sectors.
    pub fn union(&self, other: &Sector) -> Sector {
        Sector {
            min_latitude: self.min_latitude.min(other.min_latitude),
            max_latitude: self.max_latitude.max(other.max_latitude),
            min_longitude: self.min_longitude.min(other.min_longitude),
            max_longitude: self.max_longitude.max(other.max_longitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_edge_inclusive() {
        let sector = Sector::new(-10.0, 10.0, 20.0, 40.0);

        assert!(sector.contains(0.0, 30.0));
        assert!(sector.contains(-10.0, 20.0));
        assert!(sector.contains(10.0, 40.0));
        assert!(!sector.contains(10.1, 30.0));
        assert!(!sector.contains(0.0, 40.1));
    }

    #[test]
    fn intersection_of_disjoint_sectors_is_none() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(20.0, 30.0, 0.0, 10.0);

        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn intersection_and_union_are_consistent() {
        let a = Sector::new(0.0, 20.0, 0.0, 20.0);
        let b = Sector::new(10.0, 30.0, -10.0, 10.0);

        let intersection = a.intersection(&b).unwrap();
        assert_eq!(intersection, Sector::new(10.0, 20.0, 0.0, 10.0));

        let union = a.union(&b);
        assert_eq!(union, Sector::new(0.0, 30.0, -10.0, 20.0));
    }

    #[test]
    fn full_sphere_wraps_longitude() {
        assert!(Sector::FULL_SPHERE.is_full_longitude());
        assert!(!Sector::new(-90.0, 90.0, -180.0, 179.0).is_full_longitude());
    }

    #[test]
    #[should_panic]
    fn inverted_bounds_are_rejected() {
        Sector::new(10.0, -10.0, 0.0, 0.0);
    }
}
