use crate::math::{Ellipsoid, Ray, Sector};
use glam::{DMat4, DVec3, DVec4};

/// A geographic position: latitude and longitude in degrees, altitude in
/// meters above the reference surface.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// Returns the grid coordinate for `index` of `count` samples spanning
/// `[min, max]`. The first and last sample are pinned exactly to the bounds,
/// so adjacent sectors sharing an edge produce bit-identical seam vertices.
pub(crate) fn grid_coordinate(min: f64, max: f64, index: usize, count: usize) -> f64 {
    if index == 0 {
        min
    } else if index == count - 1 {
        max
    } else {
        min + (max - min) * index as f64 / (count - 1) as f64
    }
}

/// The grid coordinate of a border-ring sample in a padded `count`-sample
/// grid. Ring samples duplicate the pinned edge positions of the interior
/// grid one ring in, which places the skirt directly below the tile edge.
fn border_coordinate(min: f64, max: f64, index: usize, count: usize) -> f64 {
    let inner = index.saturating_sub(1).min(count - 3);
    grid_coordinate(min, max, inner, count - 2)
}

/// The mapping between geographic and Cartesian coordinates for a globe.
///
/// Implementations are pure math over an [`Ellipsoid`]; the batch helpers
/// write origin-relative `f32` triples so vertex data stays small enough for
/// 32-bit GPU buffers at planetary scale.
pub trait GeographicProjection: Send + Sync {
    /// Converts a geographic position (degrees, meters) to Cartesian
    /// coordinates.
    fn geographic_to_cartesian(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DVec3;

    /// The outward unit surface normal at a geographic location.
    fn geographic_to_cartesian_normal(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
    ) -> DVec3;

    /// An orthonormal East/North/Up basis with the given position as origin,
    /// used to place tile-local geometry.
    fn geographic_to_cartesian_transform(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DMat4;

    /// Converts a Cartesian point back to a geographic position.
    fn cartesian_to_geographic(&self, ellipsoid: &Ellipsoid, point: DVec3) -> Position;

    /// The nearest positive-t intersection of a ray with the surface.
    fn intersect(&self, ellipsoid: &Ellipsoid, ray: Ray) -> Option<DVec3>;

    /// The sector beyond which this projection is undefined, if any. 2D
    /// projections clamp positions into these limits to avoid infinities.
    fn projection_limits(&self) -> Option<Sector> {
        None
    }

    /// Fills a regular lat/lon grid of vertices over `sector`, displaced by
    /// `heights` (scaled by `vertical_exaggeration`) and translated by
    /// `origin`. Vertices are written as f32 triples starting at `offset`
    /// floats into `out`, with `row_stride` floats between rows. The first
    /// and last row/column lie exactly on the sector edges.
    #[allow(clippy::too_many_arguments)]
    fn geographic_to_cartesian_grid(
        &self,
        ellipsoid: &Ellipsoid,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        heights: Option<&[f32]>,
        vertical_exaggeration: f64,
        origin: DVec3,
        out: &mut [f32],
        offset: usize,
        row_stride: usize,
    ) {
        assert!(num_lat >= 1 && num_lon >= 1, "empty vertex grid");
        if let Some(heights) = heights {
            assert!(
                heights.len() >= num_lat * num_lon,
                "height grid shorter than {num_lat}x{num_lon}"
            );
        }
        assert!(
            out.len() >= offset + (num_lat - 1) * row_stride + num_lon * 3,
            "vertex buffer too small"
        );

        for j in 0..num_lat {
            let latitude = grid_coordinate(sector.min_latitude, sector.max_latitude, j, num_lat);
            let row = offset + j * row_stride;

            for i in 0..num_lon {
                let longitude =
                    grid_coordinate(sector.min_longitude, sector.max_longitude, i, num_lon);
                let altitude = heights
                    .map_or(0.0, |heights| heights[j * num_lon + i] as f64)
                    * vertical_exaggeration;

                let point =
                    self.geographic_to_cartesian(ellipsoid, latitude, longitude, altitude) - origin;

                out[row + 3 * i] = point.x as f32;
                out[row + 3 * i + 1] = point.y as f32;
                out[row + 3 * i + 2] = point.z as f32;
            }
        }
    }

    /// Fills only the perimeter ring of a `num_lat` x `num_lon` vertex grid
    /// at a constant height (the skirt). Ring positions duplicate the pinned
    /// edge positions of the interior grid, so the skirt hangs directly below
    /// the tile edge.
    fn geographic_to_cartesian_border(
        &self,
        ellipsoid: &Ellipsoid,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        height: f32,
        origin: DVec3,
        out: &mut [f32],
    ) {
        assert!(num_lat >= 3 && num_lon >= 3, "border ring needs an interior");
        assert!(out.len() >= num_lat * num_lon * 3, "vertex buffer too small");

        let mut write = |j: usize, i: usize| {
            let latitude = border_coordinate(sector.min_latitude, sector.max_latitude, j, num_lat);
            let longitude =
                border_coordinate(sector.min_longitude, sector.max_longitude, i, num_lon);

            let point =
                self.geographic_to_cartesian(ellipsoid, latitude, longitude, height as f64)
                    - origin;

            let index = (j * num_lon + i) * 3;
            out[index] = point.x as f32;
            out[index + 1] = point.y as f32;
            out[index + 2] = point.z as f32;
        };

        for i in 0..num_lon {
            write(0, i);
            write(num_lat - 1, i);
        }
        for j in 1..num_lat - 1 {
            write(j, 0);
            write(j, num_lon - 1);
        }
    }
}

/// The WGS 84 ellipsoidal projection: the conventional Earth-centered,
/// Earth-fixed frame with X toward (0N, 0E), Y toward (0N, 90E) and Z toward
/// the north pole.
#[derive(Copy, Clone, Debug, Default)]
pub struct Wgs84Projection;

impl GeographicProjection for Wgs84Projection {
    fn geographic_to_cartesian(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DVec3 {
        let lat = latitude.to_radians();
        let lon = longitude.to_radians();

        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        let n = ellipsoid.prime_vertical_radius(lat);

        DVec3::new(
            (n + altitude) * cos_lat * cos_lon,
            (n + altitude) * cos_lat * sin_lon,
            (n * (1.0 - ellipsoid.eccentricity_squared) + altitude) * sin_lat,
        )
    }

    fn geographic_to_cartesian_normal(
        &self,
        _ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
    ) -> DVec3 {
        let lat = latitude.to_radians();
        let lon = longitude.to_radians();

        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();

        DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
    }

    fn geographic_to_cartesian_transform(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DMat4 {
        let lat = latitude.to_radians();
        let lon = longitude.to_radians();

        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();

        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
        let origin = self.geographic_to_cartesian(ellipsoid, latitude, longitude, altitude);

        DMat4::from_cols(
            DVec4::from((east, 0.0)),
            DVec4::from((north, 0.0)),
            DVec4::from((up, 0.0)),
            DVec4::from((origin, 1.0)),
        )
    }

    // Closed form according to H. Vermeille, "Direct transformation from
    // geocentric coordinates to geodetic coordinates", Journal of Geodesy 76
    // (2002). Exact at the poles; undefined only near the globe's center.
    fn cartesian_to_geographic(&self, ellipsoid: &Ellipsoid, point: DVec3) -> Position {
        let a = ellipsoid.semi_major_axis;
        let e2 = ellipsoid.eccentricity_squared;
        let e4 = e2 * e2;

        let xy2 = point.x * point.x + point.y * point.y;
        let p = xy2 / (a * a);
        let q = (1.0 - e2) * point.z * point.z / (a * a);
        let r = (p + q - e4) / 6.0;

        let s = e4 * p * q / (4.0 * r * r * r);
        let t = (1.0 + s + (s * (2.0 + s)).sqrt()).cbrt();
        let u = r * (1.0 + t + 1.0 / t);
        let v = (u * u + e4 * q).sqrt();
        let w = e2 * (u + v - q) / (2.0 * v);
        let k = (u + v + w * w).sqrt() - w;
        let d = k * xy2.sqrt() / (k + e2);

        let dist = (d * d + point.z * point.z).sqrt();

        Position {
            latitude: (2.0 * f64::atan2(point.z, d + dist)).to_degrees(),
            longitude: f64::atan2(point.y, point.x).to_degrees(),
            altitude: (k + e2 - 1.0) / k * dist,
        }
    }

    fn intersect(&self, ellipsoid: &Ellipsoid, ray: Ray) -> Option<DVec3> {
        let scale = DVec3::new(
            1.0 / ellipsoid.semi_major_axis,
            1.0 / ellipsoid.semi_major_axis,
            1.0 / ellipsoid.semi_minor_axis(),
        );

        let origin = ray.origin * scale;
        let direction = ray.direction * scale;

        let a = direction.dot(direction);
        let b = 2.0 * origin.dot(direction);
        let c = origin.dot(origin) - 1.0;

        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }

        let sqrt = discriminant.sqrt();
        let mut t = (-b - sqrt) / (2.0 * a);
        if t < 0.0 {
            t = (-b + sqrt) / (2.0 * a);
        }

        (t >= 0.0).then(|| ray.origin + t * ray.direction)
    }
}

/// A 2D Mercator projection over the ellipsoid's equatorial radius, with X
/// east, Y north and Z up. Latitudes are clamped into `projection_limits` to
/// keep the transform finite near the poles.
#[derive(Copy, Clone, Debug)]
pub struct MercatorProjection {
    limits: Sector,
}

impl MercatorProjection {
    /// The conventional web-Mercator latitude limit.
    pub const MAX_LATITUDE: f64 = 85.05;

    pub fn new(limits: Sector) -> Self {
        Self { limits }
    }
}

impl Default for MercatorProjection {
    fn default() -> Self {
        Self {
            limits: Sector::new(
                -Self::MAX_LATITUDE,
                Self::MAX_LATITUDE,
                -180.0,
                180.0,
            ),
        }
    }
}

impl GeographicProjection for MercatorProjection {
    fn geographic_to_cartesian(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DVec3 {
        let latitude = latitude.clamp(self.limits.min_latitude, self.limits.max_latitude);
        let longitude = longitude.clamp(self.limits.min_longitude, self.limits.max_longitude);
        let r = ellipsoid.semi_major_axis;

        DVec3::new(
            r * longitude.to_radians(),
            r * (std::f64::consts::FRAC_PI_4 + 0.5 * latitude.to_radians())
                .tan()
                .ln(),
            altitude,
        )
    }

    fn geographic_to_cartesian_normal(
        &self,
        _ellipsoid: &Ellipsoid,
        _latitude: f64,
        _longitude: f64,
    ) -> DVec3 {
        DVec3::Z
    }

    fn geographic_to_cartesian_transform(
        &self,
        ellipsoid: &Ellipsoid,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> DMat4 {
        let origin = self.geographic_to_cartesian(ellipsoid, latitude, longitude, altitude);
        DMat4::from_translation(origin)
    }

    fn cartesian_to_geographic(&self, ellipsoid: &Ellipsoid, point: DVec3) -> Position {
        let r = ellipsoid.semi_major_axis;

        Position {
            latitude: (2.0 * (point.y / r).exp().atan() - std::f64::consts::FRAC_PI_2)
                .to_degrees(),
            longitude: (point.x / r).to_degrees(),
            altitude: point.z,
        }
    }

    fn intersect(&self, _ellipsoid: &Ellipsoid, ray: Ray) -> Option<DVec3> {
        if ray.direction.z == 0.0 {
            return None;
        }

        let t = -ray.origin.z / ray.direction.z;
        (t >= 0.0).then(|| ray.origin + t * ray.direction)
    }

    fn projection_limits(&self) -> Option<Sector> {
        Some(self.limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;

    const WGS84: Ellipsoid = Ellipsoid::WGS84;

    #[test]
    fn round_trip_across_the_domain() {
        let projection = Wgs84Projection;
        let mut rng = rand::rng();

        for _ in 0..500 {
            let latitude = rng.random_range(-90.0..=90.0);
            let longitude = rng.random_range(-180.0..=180.0);
            let altitude = rng.random_range(-10_000.0..100_000.0);

            let point = projection.geographic_to_cartesian(&WGS84, latitude, longitude, altitude);
            let position = projection.cartesian_to_geographic(&WGS84, point);
            let round_trip = projection.geographic_to_cartesian(
                &WGS84,
                position.latitude,
                position.longitude,
                position.altitude,
            );

            assert!(
                point.distance(round_trip) < 1e-5,
                "round trip diverged at ({latitude}, {longitude}, {altitude})"
            );
            assert_relative_eq!(position.altitude, altitude, epsilon = 1e-4, max_relative = 1e-6);
        }
    }

    #[test]
    fn round_trip_at_poles_and_antimeridian() {
        let projection = Wgs84Projection;

        for (latitude, longitude) in [(90.0, 0.0), (-90.0, 45.0), (0.0, 180.0), (0.0, -180.0)] {
            let point = projection.geographic_to_cartesian(&WGS84, latitude, longitude, 1000.0);
            let position = projection.cartesian_to_geographic(&WGS84, point);

            assert_relative_eq!(position.latitude, latitude, epsilon = 1e-9);
            assert_relative_eq!(position.altitude, 1000.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn single_sample_grid_is_the_sector_corner() {
        let projection = Wgs84Projection;
        let sector = Sector::new(10.0, 20.0, 30.0, 40.0);
        let mut out = [0.0f32; 3];

        projection.geographic_to_cartesian_grid(
            &WGS84,
            &sector,
            1,
            1,
            None,
            1.0,
            DVec3::ZERO,
            &mut out,
            0,
            3,
        );

        let corner = projection.geographic_to_cartesian(&WGS84, 10.0, 30.0, 0.0);
        assert_relative_eq!(out[0] as f64, corner.x, max_relative = 1e-7);
        assert_relative_eq!(out[1] as f64, corner.y, max_relative = 1e-7);
        assert_relative_eq!(out[2] as f64, corner.z, max_relative = 1e-7);
    }

    #[test]
    fn adjacent_grids_share_seam_vertices_exactly() {
        let projection = Wgs84Projection;
        let west = Sector::new(0.0, 10.0, 0.0, 10.0);
        let east = Sector::new(0.0, 10.0, 10.0, 20.0);
        let origin = projection.geographic_to_cartesian(&WGS84, 5.0, 10.0, 0.0);

        let n = 7;
        let mut west_out = vec![0.0f32; n * n * 3];
        let mut east_out = vec![0.0f32; n * n * 3];

        projection.geographic_to_cartesian_grid(
            &WGS84, &west, n, n, None, 1.0, origin, &mut west_out, 0, n * 3,
        );
        projection.geographic_to_cartesian_grid(
            &WGS84, &east, n, n, None, 1.0, origin, &mut east_out, 0, n * 3,
        );

        // The west grid's last column must equal the east grid's first,
        // bitwise, or adjacent tiles crack along the seam.
        for j in 0..n {
            for c in 0..3 {
                assert_eq!(
                    west_out[(j * n + n - 1) * 3 + c].to_bits(),
                    east_out[j * n * 3 + c].to_bits()
                );
            }
        }
    }

    #[test]
    fn border_ring_duplicates_edge_positions() {
        let projection = Wgs84Projection;
        let sector = Sector::new(0.0, 10.0, 0.0, 10.0);
        let (rows, cols) = (6, 6);
        let mut out = vec![f32::NAN; rows * cols * 3];

        projection.geographic_to_cartesian_border(
            &WGS84,
            &sector,
            rows,
            cols,
            0.0,
            DVec3::ZERO,
            &mut out,
        );

        // Corner ring vertices collapse onto the sector corner.
        let corner = projection.geographic_to_cartesian(&WGS84, 0.0, 0.0, 0.0);
        assert_relative_eq!(out[0] as f64, corner.x, max_relative = 1e-7);
        assert_relative_eq!(out[3] as f64, corner.x, max_relative = 1e-7);

        // Interior is left untouched.
        assert!(out[(cols + 2) * 3].is_nan());
    }

    #[test]
    fn ray_hits_the_equator() {
        let projection = Wgs84Projection;
        let ray = Ray::new(DVec3::new(2.0 * WGS84.semi_major_axis, 0.0, 0.0), -DVec3::X);

        let hit = projection.intersect(&WGS84, ray).unwrap();
        assert_relative_eq!(hit.x, WGS84.semi_major_axis, max_relative = 1e-12);

        // A ray pointing away from the globe misses.
        let miss = Ray::new(DVec3::new(2.0 * WGS84.semi_major_axis, 0.0, 0.0), DVec3::X);
        assert!(projection.intersect(&WGS84, miss).is_none());
    }

    #[test]
    fn mercator_clamps_polar_latitudes() {
        let projection = MercatorProjection::default();

        let at_pole = projection.geographic_to_cartesian(&WGS84, 90.0, 0.0, 0.0);
        let at_limit =
            projection.geographic_to_cartesian(&WGS84, MercatorProjection::MAX_LATITUDE, 0.0, 0.0);

        assert!(at_pole.y.is_finite());
        assert_eq!(at_pole, at_limit);

        let position = projection.cartesian_to_geographic(&WGS84, at_limit);
        assert_relative_eq!(
            position.latitude,
            MercatorProjection::MAX_LATITUDE,
            max_relative = 1e-9
        );
    }
}
