use crate::{
    elevation::{
        cache::{AbsentResourceList, TileCache},
        retrieval::{ElevationSource, Retrieval, RetrievalSink},
    },
    math::{projection::grid_coordinate, Sector},
    tile_matrix::{TileCoord, TileKey, TileMatrix, TileMatrixSet},
};
use itertools::iproduct;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

/// Resource limits for a [`TiledElevationCoverage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Cache budget in bytes.
    pub cache_capacity: usize,
    /// Eviction trims the cache down to this many bytes.
    pub cache_low_water: usize,
    /// Upper bound on concurrently outstanding retrievals.
    pub max_in_flight: usize,
    /// Failed tiles are given up on after this many attempts.
    pub absent_max_retries: u32,
    /// Failed tiles are not re-requested before this much time has passed.
    pub absent_cooldown: Duration,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64 << 20,
            cache_low_water: 48 << 20,
            max_in_flight: 8,
            absent_max_retries: 3,
            absent_cooldown: Duration::from_secs(60),
        }
    }
}

/// The shared retrieval bookkeeping: the only state touched by both the query
/// timeline and retrieval completions. Per tile it realizes the state machine
/// absent <-> unrequested -> in-flight -> cached.
struct CoverageState {
    cache: TileCache,
    in_flight: HashSet<TileKey>,
    absent: AbsentResourceList,
}

/// A sparse raster elevation pyramid over a [`TileMatrixSet`], populated
/// asynchronously by an [`ElevationSource`].
///
/// Height queries never block: they answer from the finest fully
/// cache-resident level at or below the requested resolution, enqueue fetches
/// for what is missing, and refine on later calls once tiles arrive.
pub struct TiledElevationCoverage {
    matrix_set: TileMatrixSet,
    source: Arc<dyn ElevationSource>,
    state: Mutex<CoverageState>,
    results: async_channel::Receiver<Retrieval>,
    sink: RetrievalSink,
    max_in_flight: usize,
    timestamp: AtomicU64,
}

impl TiledElevationCoverage {
    pub fn new(
        matrix_set: TileMatrixSet,
        source: Arc<dyn ElevationSource>,
        config: CoverageConfig,
    ) -> Self {
        let (sender, results) = async_channel::unbounded();

        Self {
            matrix_set,
            source,
            state: Mutex::new(CoverageState {
                cache: TileCache::new(config.cache_capacity, config.cache_low_water),
                in_flight: HashSet::new(),
                absent: AbsentResourceList::new(config.absent_max_retries, config.absent_cooldown),
            }),
            results,
            sink: RetrievalSink::new(sender),
            max_in_flight: config.max_in_flight,
            timestamp: AtomicU64::new(1),
        }
    }

    pub fn matrix_set(&self) -> &TileMatrixSet {
        &self.matrix_set
    }

    /// A counter bumped whenever the available elevation data changes
    /// (retrieval success or invalidation). The tessellator re-prepares tile
    /// geometry when it observes a new value.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    fn bump_timestamp(&self) {
        self.timestamp.fetch_add(1, Ordering::AcqRel);
    }

    /// Tile keys currently being fetched.
    pub fn in_flight_keys(&self) -> Vec<TileKey> {
        self.lock_state().in_flight.iter().copied().collect()
    }

    pub fn is_cached(&self, key: TileKey) -> bool {
        self.lock_state().cache.contains(key)
    }

    /// Applies a completed retrieval. Thread-safe; also reachable through the
    /// [`RetrievalSink`] handed to the source.
    pub fn retrieval_succeeded(&self, key: TileKey, samples: Vec<i16>) {
        let level = (key >> 56) as usize;
        if level >= self.matrix_set.len() {
            log::warn!("retrieval for unknown level {level} dropped");
            return;
        }

        let matrix = self.matrix_set.matrix(level);
        let shape = (matrix.tile_height as usize, matrix.tile_width as usize);
        if samples.len() != shape.0 * shape.1 {
            log::warn!(
                "elevation tile {key:#x} delivered {} samples, expected {}",
                samples.len(),
                shape.0 * shape.1
            );
            self.retrieval_failed(key);
            return;
        }

        let samples = Arc::new(Array2::from_shape_vec(shape, samples).expect("length checked"));

        let mut state = self.lock_state();
        state.in_flight.remove(&key);
        state.absent.unmark(key);
        state.cache.put(key, samples);
        drop(state);

        self.bump_timestamp();
    }

    /// Marks a retrieval as failed, moving the tile into the absent state.
    pub fn retrieval_failed(&self, key: TileKey) {
        log::warn!("elevation tile {key:#x} retrieval failed");

        let mut state = self.lock_state();
        state.in_flight.remove(&key);
        state.absent.mark(key);
    }

    /// Atomically clears the cache, the in-flight set and the absent set, and
    /// bumps the change timestamp. In-flight work is not cancelled; late
    /// completions repopulate the cache.
    pub fn invalidate_tiles(&self) {
        let mut state = self.lock_state();
        state.cache.clear();
        state.in_flight.clear();
        state.absent.clear();
        drop(state);

        self.bump_timestamp();
    }

    /// Fills `out` (row-major, `width` x `height`, row 0 south) with heights
    /// over `grid_sector`, sampled bilinearly from the finest fully resident
    /// level at or below the grid's resolution. Never blocks; samples outside
    /// the matrix sector are left untouched, so callers pre-initialize `out`.
    pub fn height_grid(&self, grid_sector: &Sector, width: usize, height: usize, out: &mut [f32]) {
        assert!(width >= 1 && height >= 1, "empty height grid");
        assert!(out.len() >= width * height, "height grid output too small");

        self.drain_retrievals();

        if !grid_sector.intersects(&self.matrix_set.sector) {
            return;
        }

        let target = self.target_level(grid_sector, width, height);
        let mut pending = Vec::new();

        let mut resident = None;
        let mut state = self.lock_state();
        for level in (0..=target).rev() {
            let retrieval_enabled = level == target || level == 0;

            if let Some(block) =
                self.fetch_tile_block(&mut state, level, grid_sector, retrieval_enabled, &mut pending)
            {
                if level < target {
                    log::debug!("height grid degraded to level {level}, target was {target}");
                }
                resident = Some(block);
                break;
            }
        }
        drop(state);

        if let Some(block) = resident {
            block.read_height_grid(grid_sector, width, height, out, self.matrix_set.is_global());
        }

        self.dispatch_retrievals(pending);
    }

    /// The `[min, max]` of the elevation under `sector`, probed on a fixed
    /// 8x8 grid at the sector's nearest resident level. `(0.0, 0.0)` when no
    /// sample is available.
    pub fn height_limits(&self, sector: &Sector) -> (f32, f32) {
        const PROBES: usize = 8;

        let mut samples = [f32::NAN; PROBES * PROBES];
        self.height_grid(sector, PROBES, PROBES, &mut samples);

        let mut limits: Option<(f32, f32)> = None;
        for sample in samples {
            if sample.is_nan() {
                continue;
            }
            limits = Some(match limits {
                Some((min, max)) => (min.min(sample), max.max(sample)),
                None => (sample, sample),
            });
        }

        limits.unwrap_or((0.0, 0.0))
    }

    fn lock_state(&self) -> MutexGuard<'_, CoverageState> {
        // A poisoned lock means a panic mid-update; the bookkeeping here is
        // safe to reuse regardless.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drain_retrievals(&self) {
        while let Ok(retrieval) = self.results.try_recv() {
            match retrieval {
                Retrieval::Succeeded { key, samples } => self.retrieval_succeeded(key, samples),
                Retrieval::Failed { key } => self.retrieval_failed(key),
            }
        }
    }

    /// The finest level justified by the grid's sample spacing.
    fn target_level(&self, grid_sector: &Sector, width: usize, height: usize) -> usize {
        let lat_spacing = grid_sector.delta_latitude() / (height - 1).max(1) as f64;
        let lon_spacing = grid_sector.delta_longitude() / (width - 1).max(1) as f64;

        self.matrix_set
            .index_of_matrix_nearest(lat_spacing.min(lon_spacing))
    }

    /// Gathers the raster tiles covering the bilinear footprint of
    /// `grid_sector` at `level`. Returns the complete block on an all-hit, or
    /// `None` while any needed tile is missing; misses enqueue retrievals
    /// when enabled for this level.
    fn fetch_tile_block<'a>(
        &'a self,
        state: &mut CoverageState,
        level: usize,
        grid_sector: &Sector,
        retrieval_enabled: bool,
        pending: &mut Vec<PendingRetrieval>,
    ) -> Option<TileBlock<'a>> {
        let matrix = self.matrix_set.matrix(level);
        let intersection = grid_sector.intersection(&matrix.sector)?;
        let wrap = self.matrix_set.is_global();

        // The same half-texel offset as sampling, so the set of tiles fetched
        // here is exactly the set read later.
        let t_min = raster_t(matrix, intersection.min_latitude).floor() as i64;
        let t_max = raster_t(matrix, intersection.max_latitude).floor() as i64 + 1;
        let s_min = raster_s(matrix, intersection.min_longitude).floor() as i64;
        let s_max = raster_s(matrix, intersection.max_longitude).floor() as i64 + 1;

        let tile_height = matrix.tile_height as i64;
        let tile_width = matrix.tile_width as i64;

        let row_min = t_min.clamp(0, matrix.raster_height() as i64 - 1) / tile_height;
        let row_max = t_max.clamp(0, matrix.raster_height() as i64 - 1) / tile_height;

        let cols: BTreeSet<u32> = if wrap {
            let span = s_min.div_euclid(tile_width)..=s_max.div_euclid(tile_width);
            if span.clone().count() >= matrix.matrix_width as usize {
                (0..matrix.matrix_width).collect()
            } else {
                span.map(|col| col.rem_euclid(matrix.matrix_width as i64) as u32)
                    .collect()
            }
        } else {
            let col_min = s_min.clamp(0, matrix.raster_width() as i64 - 1) / tile_width;
            let col_max = s_max.clamp(0, matrix.raster_width() as i64 - 1) / tile_width;
            (col_min as u32..=col_max as u32).collect()
        };

        let mut tiles = HashMap::new();
        let mut all_hit = true;

        for (row, &col) in iproduct!(row_min as u32..=row_max as u32, cols.iter()) {
            let key = TileCoord::new(matrix.level, row, col).key();

            if let Some(samples) = state.cache.get(key) {
                tiles.insert((row, col), samples);
            } else {
                all_hit = false;
                if retrieval_enabled {
                    self.initiate_retrieval(state, matrix, row, col, key, pending);
                }
            }
        }

        all_hit.then_some(TileBlock { matrix, tiles })
    }

    /// Reserves an in-flight slot for the tile. The source itself is called
    /// later, through [`Self::dispatch_retrievals`], once the state lock is
    /// released.
    fn initiate_retrieval(
        &self,
        state: &mut CoverageState,
        matrix: &TileMatrix,
        row: u32,
        col: u32,
        key: TileKey,
        pending: &mut Vec<PendingRetrieval>,
    ) {
        if state.absent.is_absent(key)
            || state.in_flight.contains(&key)
            || state.in_flight.len() >= self.max_in_flight
        {
            return;
        }

        state.in_flight.insert(key);
        pending.push(PendingRetrieval {
            key,
            level: matrix.level,
            row,
            col,
        });
    }

    /// Hands the reserved requests to the source. Runs without the state
    /// lock held, so a source is free to complete synchronously, through the
    /// sink or through the coverage's own completion methods.
    fn dispatch_retrievals(&self, pending: Vec<PendingRetrieval>) {
        for request in pending {
            let coord = TileCoord::new(request.level, request.row, request.col);
            log::debug!("retrieving elevation tile {coord}");

            self.source.retrieve_tile_array(
                request.key,
                self.matrix_set.matrix(request.level as usize),
                request.row,
                request.col,
                self.sink.clone(),
            );
        }
    }
}

/// A retrieval whose in-flight slot is reserved but whose source call is
/// deferred until the state lock is released.
struct PendingRetrieval {
    key: TileKey,
    level: u32,
    row: u32,
    col: u32,
}

/// Fractional raster column of a longitude, in texel centers.
fn raster_s(matrix: &TileMatrix, longitude: f64) -> f64 {
    (longitude - matrix.sector.min_longitude) / matrix.sector.delta_longitude()
        * matrix.raster_width() as f64
        - 0.5
}

/// Fractional raster row of a latitude, in texel centers. Row 0 is south.
fn raster_t(matrix: &TileMatrix, latitude: f64) -> f64 {
    (latitude - matrix.sector.min_latitude) / matrix.sector.delta_latitude()
        * matrix.raster_height() as f64
        - 0.5
}

fn wrap_or_clamp(index: i64, size: u32, wrap: bool) -> u32 {
    if wrap {
        index.rem_euclid(size as i64) as u32
    } else {
        index.clamp(0, size as i64 - 1) as u32
    }
}

/// The transient working set for one query: the raster tiles of a single
/// matrix level, supporting bilinear texel reads that span tile boundaries.
struct TileBlock<'a> {
    matrix: &'a TileMatrix,
    tiles: HashMap<(u32, u32), Arc<Array2<i16>>>,
}

impl TileBlock<'_> {
    fn texel(&self, x: u32, y: u32) -> f32 {
        let row = y / self.matrix.tile_height;
        let col = x / self.matrix.tile_width;

        match self.tiles.get(&(row, col)) {
            Some(samples) => samples[[
                (y % self.matrix.tile_height) as usize,
                (x % self.matrix.tile_width) as usize,
            ]] as f32,
            None => {
                debug_assert!(false, "tile block missing tile {row}/{col}");
                0.0
            }
        }
    }

    fn read_height_grid(
        &self,
        grid_sector: &Sector,
        width: usize,
        height: usize,
        out: &mut [f32],
        wrap: bool,
    ) {
        let matrix = self.matrix;
        let raster_width = matrix.raster_width();
        let raster_height = matrix.raster_height();

        for (j, i) in iproduct!(0..height, 0..width) {
            let latitude = grid_coordinate(
                grid_sector.min_latitude,
                grid_sector.max_latitude,
                j,
                height,
            );
            let longitude = grid_coordinate(
                grid_sector.min_longitude,
                grid_sector.max_longitude,
                i,
                width,
            );

            // Samples outside the matrix keep whatever the caller put there.
            if !matrix.sector.contains(latitude, longitude) {
                continue;
            }

            let t = raster_t(matrix, latitude);
            let s = raster_s(matrix, longitude);

            let t0 = t.floor();
            let s0 = s.floor();
            let a = t - t0;
            let b = s - s0;

            let y0 = wrap_or_clamp(t0 as i64, raster_height, false);
            let y1 = wrap_or_clamp(t0 as i64 + 1, raster_height, false);
            let x0 = wrap_or_clamp(s0 as i64, raster_width, wrap);
            let x1 = wrap_or_clamp(s0 as i64 + 1, raster_width, wrap);

            out[j * width + i] = (1.0 - a as f32)
                * ((1.0 - b as f32) * self.texel(x0, y0) + b as f32 * self.texel(x1, y0))
                + a as f32
                    * ((1.0 - b as f32) * self.texel(x0, y1) + b as f32 * self.texel(x1, y1));
        }
    }
}
