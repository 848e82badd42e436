use crate::{
    math::{BoundingSphere, Ray, Sector},
    tile_matrix::TileCoord,
};
use glam::DVec3;
use std::sync::Arc;

/// One accepted tile of a tessellated frame: its raw height samples and the
/// origin-relative Cartesian vertex buffer derived from them.
///
/// Vertices are stored relative to [`TerrainTile::origin`] so the `f32`
/// buffer keeps sub-meter precision at planetary scale. The grid carries a
/// one-vertex border ring on every side (the skirt), so the interior samples
/// start at row 1, column 1.
pub struct TerrainTile {
    pub coord: TileCoord,
    pub sector: Sector,
    /// The reference point all vertices are relative to.
    pub origin: DVec3,
    /// Vertex rows in the buffer, including the border ring.
    pub num_lat: usize,
    /// Vertex columns in the buffer, including the border ring.
    pub num_lon: usize,
    /// Origin-relative vertex positions, `num_lat` x `num_lon` x 3 floats.
    pub vertices: Vec<f32>,
    /// Raw height samples the vertices were displaced by, row-major over the
    /// interior grid (without the border ring), row 0 south. Unexaggerated.
    pub heights: Vec<f32>,
    pub min_height: f32,
    pub max_height: f32,
    pub extent: BoundingSphere,
}

impl TerrainTile {
    /// The origin-relative vertex at grid position `(j, i)`, border included.
    fn vertex(&self, j: usize, i: usize) -> DVec3 {
        let index = (j * self.num_lon + i) * 3;

        DVec3::new(
            self.vertices[index] as f64,
            self.vertices[index + 1] as f64,
            self.vertices[index + 2] as f64,
        )
    }

    /// The vertex buffer as bytes, ready for GPU upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// The raw height samples as bytes, for height-texture upload.
    pub fn height_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.heights)
    }
}

/// The triangle-strip index buffer shared by every tile of a frame. All
/// tiles of a pyramid have the same vertex grid shape, so one strip serves
/// them all.
pub struct TileGeometry {
    pub num_lat: usize,
    pub num_lon: usize,
    pub indices: Vec<u32>,
}

impl TileGeometry {
    /// A row-by-row triangle strip over a `num_lat` x `num_lon` vertex grid,
    /// with two repeated indices bridging consecutive rows.
    pub fn new(num_lat: usize, num_lon: usize) -> Self {
        assert!(num_lat >= 2 && num_lon >= 2, "strip needs a 2x2 grid");

        let mut indices = Vec::with_capacity((num_lat - 1) * (2 * num_lon + 2));

        for j in 0..num_lat - 1 {
            if j > 0 {
                indices.push((j * num_lon + num_lon - 1) as u32);
                indices.push((j * num_lon) as u32);
            }
            for i in 0..num_lon {
                indices.push((j * num_lon + i) as u32);
                indices.push(((j + 1) * num_lon + i) as u32);
            }
        }

        Self {
            num_lat,
            num_lon,
            indices,
        }
    }

    /// The index buffer as bytes, ready for GPU upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// The tessellated surface of one frame: accepted tiles sorted front to back
/// by camera distance, plus the strip geometry they share. Rebuilt every
/// frame, never mutated.
pub struct Terrain {
    pub sector: Sector,
    tiles: Vec<Arc<TerrainTile>>,
    geometry: Arc<TileGeometry>,
}

impl Terrain {
    pub fn new(sector: Sector, tiles: Vec<Arc<TerrainTile>>, geometry: Arc<TileGeometry>) -> Self {
        Self {
            sector,
            tiles,
            geometry,
        }
    }

    pub fn tiles(&self) -> &[Arc<TerrainTile>] {
        &self.tiles
    }

    pub fn geometry(&self) -> &Arc<TileGeometry> {
        &self.geometry
    }

    /// The nearest intersection of `ray` with the tessellated surface.
    ///
    /// Tiles are tested in their sorted front-to-back order and the first
    /// tile producing a hit wins. That relies on the sort matching true
    /// occlusion; at skirts or sort ties a tile slightly behind the true
    /// nearest one can answer instead.
    pub fn intersect(&self, ray: Ray) -> Option<DVec3> {
        for tile in &self.tiles {
            let local = Ray::new(ray.origin - tile.origin, ray.direction);

            if let Some(t) = intersect_strip(tile, &self.geometry.indices, local) {
                return Some(ray.point_at(t));
            }
        }

        None
    }

    /// The Cartesian point on the tessellated surface at `(latitude,
    /// longitude)`, or `None` when no tile covers that position.
    pub fn surface_point(&self, latitude: f64, longitude: f64) -> Option<DVec3> {
        let tile = self
            .tiles
            .iter()
            .find(|tile| tile.sector.contains(latitude, longitude))?;

        // Interior grid shape, without the border ring.
        let rows = tile.num_lat - 2;
        let cols = tile.num_lon - 2;

        let t = (latitude - tile.sector.min_latitude) / tile.sector.delta_latitude()
            * (rows - 1) as f64;
        let s = (longitude - tile.sector.min_longitude) / tile.sector.delta_longitude()
            * (cols - 1) as f64;

        let j0 = (t.floor() as usize).min(rows - 2);
        let i0 = (s.floor() as usize).min(cols - 2);
        let a = t - j0 as f64;
        let b = s - i0 as f64;

        // Offset by one for the border ring.
        let v00 = tile.vertex(j0 + 1, i0 + 1);
        let v01 = tile.vertex(j0 + 1, i0 + 2);
        let v10 = tile.vertex(j0 + 2, i0 + 1);
        let v11 = tile.vertex(j0 + 2, i0 + 2);

        let local = (1.0 - a) * ((1.0 - b) * v00 + b * v01) + a * ((1.0 - b) * v10 + b * v11);

        Some(tile.origin + local)
    }

    /// Aggregates the precomputed height bounds of tiles within `level_depth`
    /// of the finest level present. `(0.0, 0.0)` when no tile qualifies.
    pub fn height_limits(&self, level_depth: u32) -> (f32, f32) {
        let finest = match self.tiles.iter().map(|tile| tile.coord.level).max() {
            Some(level) => level,
            None => return (0.0, 0.0),
        };

        let mut limits: Option<(f32, f32)> = None;
        for tile in &self.tiles {
            if tile.coord.level + level_depth < finest {
                continue;
            }
            limits = Some(match limits {
                Some((min, max)) => (min.min(tile.min_height), max.max(tile.max_height)),
                None => (tile.min_height, tile.max_height),
            });
        }

        limits.unwrap_or((0.0, 0.0))
    }
}

/// The smallest positive ray parameter hitting any triangle of the tile's
/// strip, in the tile-local frame.
fn intersect_strip(tile: &TerrainTile, indices: &[u32], ray: Ray) -> Option<f64> {
    let mut nearest: Option<f64> = None;

    for window in indices.windows(3) {
        let (a, b, c) = (window[0], window[1], window[2]);
        // Row-bridge degenerates carry no surface.
        if a == b || b == c || a == c {
            continue;
        }

        let v0 = strip_vertex(tile, a);
        let v1 = strip_vertex(tile, b);
        let v2 = strip_vertex(tile, c);

        if let Some(t) = intersect_triangle(ray, v0, v1, v2) {
            nearest = Some(nearest.map_or(t, |n: f64| n.min(t)));
        }
    }

    nearest
}

fn strip_vertex(tile: &TerrainTile, index: u32) -> DVec3 {
    let base = index as usize * 3;

    DVec3::new(
        tile.vertices[base] as f64,
        tile.vertices[base + 1] as f64,
        tile.vertices[base + 2] as f64,
    )
}

/// Moller-Trumbore, both-sided, returning the ray parameter of the hit.
fn intersect_triangle(ray: Ray, v0: DVec3, v1: DVec3, v2: DVec3) -> Option<f64> {
    const EPSILON: f64 = 1e-12;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let p = ray.direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = ray.origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(q) * inv_det;
    (t >= 0.0).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        globe::Globe,
        math::{Ellipsoid, GeographicProjection, Wgs84Projection},
        tile_matrix::TileCoord,
    };
    use approx::assert_relative_eq;

    /// Builds a real tile over `sector` at a constant height through the
    /// WGS 84 projection, border ring included.
    fn build_tile(coord: TileCoord, sector: Sector, height: f32) -> Arc<TerrainTile> {
        let projection = Wgs84Projection;
        let ellipsoid = Ellipsoid::WGS84;

        let rows = 5;
        let cols = 5;
        let num_lat = rows + 2;
        let num_lon = cols + 2;

        let origin = projection.geographic_to_cartesian(
            &ellipsoid,
            sector.centroid_latitude(),
            sector.centroid_longitude(),
            height as f64,
        );

        let heights = vec![height; rows * cols];
        let mut vertices = vec![0.0f32; num_lat * num_lon * 3];

        projection.geographic_to_cartesian_grid(
            &ellipsoid,
            &sector,
            rows,
            cols,
            Some(&heights),
            1.0,
            origin,
            &mut vertices,
            (num_lon + 1) * 3,
            num_lon * 3,
        );
        projection.geographic_to_cartesian_border(
            &ellipsoid,
            &sector,
            num_lat,
            num_lon,
            height,
            origin,
            &mut vertices,
        );

        let points: Vec<DVec3> = vertices
            .chunks_exact(3)
            .map(|v| origin + DVec3::new(v[0] as f64, v[1] as f64, v[2] as f64))
            .collect();

        Arc::new(TerrainTile {
            coord,
            sector,
            origin,
            num_lat,
            num_lon,
            vertices,
            heights,
            min_height: height,
            max_height: height,
            extent: BoundingSphere::from_points(&points),
        })
    }

    fn terrain_of(tiles: Vec<Arc<TerrainTile>>) -> Terrain {
        let sector = tiles
            .iter()
            .map(|tile| tile.sector)
            .reduce(|a, b| a.union(&b))
            .unwrap();
        let geometry = Arc::new(TileGeometry::new(7, 7));

        Terrain::new(sector, tiles, geometry)
    }

    #[test]
    fn strip_indices_cover_the_grid_with_bridges() {
        let geometry = TileGeometry::new(3, 4);

        // Two row passes of 8 indices each plus one 2-index bridge.
        assert_eq!(geometry.indices.len(), 18);
        assert_eq!(&geometry.indices[..4], &[0, 4, 1, 5]);
        // Bridge repeats the last index of the row and the first of the next.
        assert_eq!(&geometry.indices[8..12], &[7, 4, 4, 8]);
        assert!(geometry.indices.iter().all(|&i| i < 12));
    }

    #[test]
    fn rays_from_above_hit_the_surface() {
        let sector = Sector::new(-5.0, 5.0, -5.0, 5.0);
        let tile = build_tile(TileCoord::new(2, 8, 8), sector, 0.0);
        let terrain = terrain_of(vec![tile]);

        let globe = Globe::wgs84();
        let surface = globe.geographic_to_cartesian(0.0, 0.0, 0.0);
        let eye = globe.geographic_to_cartesian(0.0, 0.0, 100_000.0);

        let hit = terrain
            .intersect(Ray::new(eye, (surface - eye).normalize()))
            .unwrap();

        // The mesh is a chordal approximation, so allow a generous tolerance.
        assert!(hit.distance(surface) < 1_000.0);

        let miss = terrain.intersect(Ray::new(eye, DVec3::Z));
        assert!(miss.is_none());
    }

    #[test]
    fn front_tile_answers_before_a_tile_behind_it() {
        let sector = Sector::new(-5.0, 5.0, -5.0, 5.0);
        // Two coincident-footprint tiles at different heights; the higher one
        // is nearer to a viewer above and sorted first.
        let near = build_tile(TileCoord::new(2, 8, 8), sector, 10_000.0);
        let far = build_tile(TileCoord::new(2, 8, 8), sector, 0.0);
        let terrain = terrain_of(vec![near, far]);

        let globe = Globe::wgs84();
        let eye = globe.geographic_to_cartesian(0.0, 0.0, 100_000.0);
        let target = globe.geographic_to_cartesian(0.0, 0.0, 0.0);

        let hit = terrain
            .intersect(Ray::new(eye, (target - eye).normalize()))
            .unwrap();

        let altitude = globe.cartesian_to_geographic(hit).altitude;
        assert_relative_eq!(altitude, 10_000.0, epsilon = 1_000.0);
    }

    #[test]
    fn surface_point_matches_the_projection() {
        let sector = Sector::new(-5.0, 5.0, -5.0, 5.0);
        let tile = build_tile(TileCoord::new(2, 8, 8), sector, 0.0);
        let terrain = terrain_of(vec![tile]);

        let globe = Globe::wgs84();

        // On a grid vertex the surface point is exact up to f32 storage.
        let point = terrain.surface_point(0.0, 0.0).unwrap();
        assert!(point.distance(globe.geographic_to_cartesian(0.0, 0.0, 0.0)) < 1.0);

        // Between vertices it is the bilinear chord, which sags a few
        // kilometers below the ellipsoid at this vertex spacing.
        let point = terrain.surface_point(1.0, 2.0).unwrap();
        assert!(point.distance(globe.geographic_to_cartesian(1.0, 2.0, 0.0)) < 5_000.0);

        assert!(terrain.surface_point(50.0, 50.0).is_none());
    }

    #[test]
    fn height_limits_honor_the_level_depth_window() {
        let coarse = build_tile(
            TileCoord::new(1, 0, 0),
            Sector::new(-10.0, 0.0, -10.0, 0.0),
            -500.0,
        );
        let fine = build_tile(
            TileCoord::new(3, 16, 16),
            Sector::new(0.0, 5.0, 0.0, 5.0),
            2_000.0,
        );
        let terrain = terrain_of(vec![coarse, fine]);

        // Depth 0 only sees the finest tile.
        assert_eq!(terrain.height_limits(0), (2_000.0, 2_000.0));
        // Depth 2 reaches the coarse tile too.
        assert_eq!(terrain.height_limits(2), (-500.0, 2_000.0));

        let empty = Terrain::new(
            Sector::FULL_SPHERE,
            Vec::new(),
            Arc::new(TileGeometry::new(7, 7)),
        );
        assert_eq!(empty.height_limits(0), (0.0, 0.0));
    }
}
