use crate::{
    elevation::TiledElevationCoverage,
    globe::Globe,
    math::{BoundingSphere, Frustum, Sector},
    terrain::{Terrain, TerrainTile, TileGeometry},
    tile_matrix::{TileCoord, TileKey},
};
use glam::{DMat4, DVec3};
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::{collections::HashMap, sync::Arc};

/// The camera state a tessellation pass is computed for.
#[derive(Copy, Clone, Debug)]
pub struct ViewState {
    pub eye_point: DVec3,
    /// The combined view-projection matrix, used for frustum culling.
    pub view_projection: DMat4,
    pub viewport_height: u32,
    /// Vertical field of view in radians.
    pub field_of_view_y: f64,
}

impl ViewState {
    /// The size in meters of one screen pixel at `distance` from the eye.
    pub fn pixel_size_at(&self, distance: f64) -> f64 {
        2.0 * distance.max(0.0) * (0.5 * self.field_of_view_y).tan() / self.viewport_height as f64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TessellatorConfig {
    /// Target ratio of source texels to screen pixels; a tile is subdivided
    /// while its texel size exceeds this many pixels.
    pub detail_control: f64,
    /// Upper bound on retained parent-to-children subdivisions.
    pub max_cached_subdivisions: usize,
    pub vertical_exaggeration: f64,
}

impl Default for TessellatorConfig {
    fn default() -> Self {
        Self {
            detail_control: 20.0,
            max_cached_subdivisions: 300,
            vertical_exaggeration: 1.0,
        }
    }
}

struct TileRecord {
    coord: TileCoord,
    sector: Sector,
    extent: Option<BoundingSphere>,
    extent_timestamp: u64,
    prepared: Option<Arc<TerrainTile>>,
    prepared_timestamp: u64,
    last_used: u64,
}

impl TileRecord {
    fn new(coord: TileCoord, sector: Sector, clock: u64) -> Self {
        Self {
            coord,
            sector,
            extent: None,
            extent_timestamp: 0,
            prepared: None,
            prepared_timestamp: 0,
            last_used: clock,
        }
    }
}

/// The per-pass inputs shared by the subdivision recursion.
struct Pass<'a> {
    globe: &'a Globe,
    coverage: &'a TiledElevationCoverage,
    view: &'a ViewState,
    frustum: Frustum,
    limits: Option<Sector>,
    finest_level: u32,
    timestamp: u64,
}

/// View-dependent quadtree tessellation over a tile pyramid.
///
/// Each pass walks the pyramid from the permanent top-level tiles, culls
/// against the projection limits and the view frustum, and subdivides until
/// a tile's screen-projected texel size satisfies the detail control. Tile
/// records live in an index pool; subdivisions are cached across passes and
/// evicted LRU by parent, so a slowly moving camera re-tessellates almost
/// for free. The pool is touched only from the pass timeline and needs no
/// synchronization.
pub struct Tessellator {
    detail_control: f64,
    vertical_exaggeration: f64,
    max_cached_subdivisions: usize,
    pool: Slab<TileRecord>,
    top_tiles: Vec<usize>,
    children: HashMap<TileKey, [usize; 4]>,
    geometry: Option<Arc<TileGeometry>>,
    clock: u64,
}

impl Tessellator {
    pub fn new(config: TessellatorConfig) -> Self {
        Self {
            detail_control: config.detail_control,
            vertical_exaggeration: config.vertical_exaggeration,
            max_cached_subdivisions: config.max_cached_subdivisions,
            pool: Slab::new(),
            top_tiles: Vec::new(),
            children: HashMap::new(),
            geometry: None,
            clock: 0,
        }
    }

    pub fn vertical_exaggeration(&self) -> f64 {
        self.vertical_exaggeration
    }

    /// Changing the exaggeration invalidates all cached geometry.
    pub fn set_vertical_exaggeration(&mut self, vertical_exaggeration: f64) {
        if vertical_exaggeration != self.vertical_exaggeration {
            self.vertical_exaggeration = vertical_exaggeration;
            self.invalidate();
        }
    }

    pub fn set_detail_control(&mut self, detail_control: f64) {
        self.detail_control = detail_control;
    }

    /// Retained parent subdivisions, for observing cache behavior.
    pub fn cached_subdivisions(&self) -> usize {
        self.children.len()
    }

    /// Drops all cached tiles and subdivisions. Call after a globe,
    /// projection or matrix-set change.
    pub fn invalidate(&mut self) {
        self.pool.clear();
        self.top_tiles.clear();
        self.children.clear();
        self.geometry = None;
    }

    /// Produces the frame's terrain: the minimal tile set covering the view
    /// within the detail control, prepared and sorted front to back.
    pub fn tessellate(
        &mut self,
        globe: &Globe,
        coverage: &TiledElevationCoverage,
        view: &ViewState,
    ) -> Terrain {
        self.clock += 1;

        let matrix_set = coverage.matrix_set();
        let level_zero = matrix_set.matrix(0);

        if self.top_tiles.is_empty() {
            for (row, col) in iproduct!(0..level_zero.matrix_height, 0..level_zero.matrix_width) {
                let coord = TileCoord::new(0, row, col);
                let sector = level_zero.tile_sector(row, col);
                let index = self.pool.insert(TileRecord::new(coord, sector, self.clock));
                self.top_tiles.push(index);
            }
        }

        let geometry = match &self.geometry {
            Some(geometry) => geometry.clone(),
            None => {
                let geometry = Arc::new(TileGeometry::new(
                    level_zero.tile_height as usize + 2,
                    level_zero.tile_width as usize + 2,
                ));
                self.geometry = Some(geometry.clone());
                geometry
            }
        };

        let pass = Pass {
            globe,
            coverage,
            view,
            frustum: Frustum::from_view_projection(view.view_projection),
            limits: globe.projection_limits(),
            finest_level: (matrix_set.len() - 1) as u32,
            timestamp: coverage.timestamp(),
        };

        let mut accepted = Vec::new();
        for index in self.top_tiles.clone() {
            self.collect(index, &pass, &mut accepted);
        }

        let mut tiles: Vec<Arc<TerrainTile>> = accepted
            .into_iter()
            .map(|index| self.prepare_tile(index, &pass))
            .collect();

        tiles.sort_by(|a, b| {
            a.extent
                .distance_to(view.eye_point)
                .total_cmp(&b.extent.distance_to(view.eye_point))
        });

        let sector = tiles
            .iter()
            .map(|tile| tile.sector)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(matrix_set.sector);

        self.trim_subdivisions();

        Terrain::new(sector, tiles, geometry)
    }

    fn collect(&mut self, index: usize, pass: &Pass<'_>, out: &mut Vec<usize>) {
        self.pool[index].last_used = self.clock;

        let coord = self.pool[index].coord;
        let sector = self.pool[index].sector;

        if let Some(limits) = pass.limits {
            if !sector.intersects(&limits) {
                return;
            }
        }

        let extent = self.tile_extent(index, pass);
        if !pass.frustum.intersects_sphere(&extent) {
            return;
        }

        if coord.level == pass.finest_level || !self.must_subdivide(&extent, coord.level, pass) {
            out.push(index);
            return;
        }

        for child in self.subdivide(index, pass) {
            self.collect(child, pass, out);
        }
    }

    /// The tile's cull volume: a sphere over its sector sampled at the
    /// current height limits. Recomputed when the elevation data changes.
    fn tile_extent(&mut self, index: usize, pass: &Pass<'_>) -> BoundingSphere {
        let record = &self.pool[index];
        if let Some(extent) = record.extent {
            if record.extent_timestamp == pass.timestamp {
                return extent;
            }
        }

        let sector = record.sector;
        let (min_height, max_height) = pass.coverage.height_limits(&sector);
        let min_height = min_height as f64 * self.vertical_exaggeration;
        let max_height = max_height as f64 * self.vertical_exaggeration;

        let latitudes = [
            sector.min_latitude,
            sector.centroid_latitude(),
            sector.max_latitude,
        ];
        let longitudes = [
            sector.min_longitude,
            sector.centroid_longitude(),
            sector.max_longitude,
        ];

        let mut points = Vec::with_capacity(10);
        for (latitude, longitude) in iproduct!(latitudes, longitudes) {
            points.push(pass.globe.geographic_to_cartesian(latitude, longitude, max_height));
        }
        points.push(pass.globe.geographic_to_cartesian(
            sector.centroid_latitude(),
            sector.centroid_longitude(),
            min_height,
        ));

        let extent = BoundingSphere::from_points(&points);

        let record = &mut self.pool[index];
        record.extent = Some(extent);
        record.extent_timestamp = pass.timestamp;

        extent
    }

    fn must_subdivide(&self, extent: &BoundingSphere, level: u32, pass: &Pass<'_>) -> bool {
        let matrix = pass.coverage.matrix_set().matrix(level as usize);
        let texel_size = matrix.texel_latitude().to_radians() * pass.globe.equatorial_radius();
        let distance = extent.distance_to(pass.view.eye_point);

        texel_size > self.detail_control * pass.view.pixel_size_at(distance)
    }

    /// The tile's four children, reused from the subdivision cache when the
    /// parent was split before.
    fn subdivide(&mut self, index: usize, pass: &Pass<'_>) -> [usize; 4] {
        let coord = self.pool[index].coord;
        let key = coord.key();

        if let Some(&children) = self.children.get(&key) {
            return children;
        }

        let matrix = pass.coverage.matrix_set().matrix(coord.level as usize + 1);

        let mut children = [0; 4];
        for (quadrant, slot) in children.iter_mut().enumerate() {
            let child = coord.child(quadrant as u32);
            let sector = matrix.tile_sector(child.row, child.col);
            *slot = self.pool.insert(TileRecord::new(child, sector, self.clock));
        }

        self.children.insert(key, children);
        children
    }

    fn prepare_tile(&mut self, index: usize, pass: &Pass<'_>) -> Arc<TerrainTile> {
        let record = &self.pool[index];
        if let Some(tile) = &record.prepared {
            if record.prepared_timestamp == pass.timestamp {
                return tile.clone();
            }
        }

        let coord = record.coord;
        let sector = record.sector;

        let matrix = pass.coverage.matrix_set().matrix(coord.level as usize);
        let rows = matrix.tile_height as usize;
        let cols = matrix.tile_width as usize;

        let mut heights = vec![0.0f32; rows * cols];
        pass.coverage.height_grid(&sector, cols, rows, &mut heights);

        let exaggeration = self.vertical_exaggeration;
        let mut min_height = f32::MAX;
        let mut max_height = f32::MIN;
        for &height in &heights {
            min_height = min_height.min(height);
            max_height = max_height.max(height);
        }
        min_height *= exaggeration as f32;
        max_height *= exaggeration as f32;

        let origin = pass.globe.geographic_to_cartesian(
            sector.centroid_latitude(),
            sector.centroid_longitude(),
            0.5 * (min_height + max_height) as f64,
        );

        let num_lat = rows + 2;
        let num_lon = cols + 2;
        let mut vertices = vec![0.0f32; num_lat * num_lon * 3];

        let projection = pass.globe.projection();
        let ellipsoid = pass.globe.ellipsoid();

        projection.geographic_to_cartesian_grid(
            ellipsoid,
            &sector,
            rows,
            cols,
            Some(&heights),
            exaggeration,
            origin,
            &mut vertices,
            (num_lon + 1) * 3,
            num_lon * 3,
        );
        projection.geographic_to_cartesian_border(
            ellipsoid,
            &sector,
            num_lat,
            num_lon,
            min_height,
            origin,
            &mut vertices,
        );

        let points: Vec<DVec3> = vertices
            .chunks_exact(3)
            .map(|v| origin + DVec3::new(v[0] as f64, v[1] as f64, v[2] as f64))
            .collect();
        let extent = BoundingSphere::from_points(&points);

        let tile = Arc::new(TerrainTile {
            coord,
            sector,
            origin,
            num_lat,
            num_lon,
            vertices,
            heights,
            min_height,
            max_height,
            extent,
        });

        let record = &mut self.pool[index];
        record.prepared = Some(tile.clone());
        record.prepared_timestamp = pass.timestamp;
        record.extent = Some(extent);
        record.extent_timestamp = pass.timestamp;

        tile
    }

    /// Evicts the least-recently-used subdivisions beyond the cache bound.
    /// Entries touched this pass are never evicted.
    fn trim_subdivisions(&mut self) {
        if self.children.len() <= self.max_cached_subdivisions {
            return;
        }

        let mut parents: Vec<(u64, TileKey)> = self
            .children
            .iter()
            .map(|(&key, indices)| {
                let used = indices
                    .iter()
                    .map(|&index| self.pool[index].last_used)
                    .max()
                    .unwrap_or(0);
                (used, key)
            })
            .collect();
        parents.sort_unstable();

        for &(used, key) in &parents {
            if self.children.len() <= self.max_cached_subdivisions || used >= self.clock {
                break;
            }
            self.evict_children(key);
        }
    }

    fn evict_children(&mut self, key: TileKey) {
        if let Some(children) = self.children.remove(&key) {
            for index in children {
                let child_key = self.pool[index].coord.key();
                self.evict_children(child_key);
                self.pool.remove(index);
            }
        }
    }
}
