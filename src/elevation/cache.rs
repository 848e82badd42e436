use crate::tile_matrix::TileKey;
use ndarray::Array2;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

struct CacheEntry {
    samples: Arc<Array2<i16>>,
    size: usize,
    last_used: u64,
}

/// A byte-budgeted LRU cache of raw elevation tiles keyed by tile key.
///
/// Eviction trims down to the low-water mark rather than to the budget edge,
/// so a cache running at capacity does not evict on every insert.
pub(crate) struct TileCache {
    entries: HashMap<TileKey, CacheEntry>,
    capacity: usize,
    low_water: usize,
    used: usize,
    clock: u64,
}

impl TileCache {
    pub(crate) fn new(capacity: usize, low_water: usize) -> Self {
        assert!(low_water <= capacity, "low-water mark above capacity");

        Self {
            entries: HashMap::new(),
            capacity,
            low_water,
            used: 0,
            clock: 0,
        }
    }

    /// Looks up a tile and marks it most recently used.
    pub(crate) fn get(&mut self, key: TileKey) -> Option<Arc<Array2<i16>>> {
        self.clock += 1;
        let clock = self.clock;

        self.entries.get_mut(&key).map(|entry| {
            entry.last_used = clock;
            entry.samples.clone()
        })
    }

    pub(crate) fn contains(&self, key: TileKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub(crate) fn put(&mut self, key: TileKey, samples: Arc<Array2<i16>>) {
        let size = samples.len() * std::mem::size_of::<i16>();

        if size > self.capacity {
            log::warn!("elevation tile of {size} bytes exceeds the cache budget, not cached");
            return;
        }

        if let Some(old) = self.entries.remove(&key) {
            self.used -= old.size;
        }

        if self.used + size > self.capacity {
            self.trim(self.low_water.saturating_sub(size));
        }

        self.clock += 1;
        self.used += size;
        self.entries.insert(
            key,
            CacheEntry {
                samples,
                size,
                last_used: self.clock,
            },
        );
    }

    /// Evicts least-recently-used entries until at most `target` bytes remain.
    fn trim(&mut self, target: usize) {
        let mut by_age: Vec<(u64, TileKey)> = self
            .entries
            .iter()
            .map(|(&key, entry)| (entry.last_used, key))
            .collect();
        by_age.sort_unstable();

        for (_, key) in by_age {
            if self.used <= target {
                break;
            }

            if let Some(entry) = self.entries.remove(&key) {
                self.used -= entry.size;
                log::debug!("evicted elevation tile {key:#x} ({} bytes)", entry.size);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }
}

struct AbsentEntry {
    retries: u32,
    marked: Instant,
}

/// Tracks tiles whose retrieval failed or returned no data. A tile is
/// suppressed during its cooldown window, and permanently once the retry
/// budget is spent; a successful retrieval clears it unconditionally.
pub(crate) struct AbsentResourceList {
    max_retries: u32,
    cooldown: Duration,
    entries: HashMap<TileKey, AbsentEntry>,
}

impl AbsentResourceList {
    pub(crate) fn new(max_retries: u32, cooldown: Duration) -> Self {
        Self {
            max_retries,
            cooldown,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn mark(&mut self, key: TileKey) {
        let entry = self.entries.entry(key).or_insert(AbsentEntry {
            retries: 0,
            marked: Instant::now(),
        });
        entry.retries += 1;
        entry.marked = Instant::now();
    }

    pub(crate) fn unmark(&mut self, key: TileKey) {
        self.entries.remove(&key);
    }

    pub(crate) fn is_absent(&self, key: TileKey) -> bool {
        self.entries.get(&key).is_some_and(|entry| {
            entry.retries >= self.max_retries || entry.marked.elapsed() < self.cooldown
        })
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(value: i16) -> Arc<Array2<i16>> {
        Arc::new(Array2::from_elem((16, 16), value))
    }

    const TILE_BYTES: usize = 16 * 16 * 2;

    #[test]
    fn cache_never_exceeds_its_budget() {
        let mut cache = TileCache::new(3 * TILE_BYTES, 2 * TILE_BYTES);

        for key in 0..10 {
            cache.put(key, tile(key as i16));
            assert!(cache.used() <= 3 * TILE_BYTES);
        }
    }

    #[test]
    fn least_recently_used_is_evicted_first() {
        let mut cache = TileCache::new(3 * TILE_BYTES, 2 * TILE_BYTES);

        cache.put(1, tile(1));
        cache.put(2, tile(2));
        cache.put(3, tile(3));

        // Touch 1 so 2 becomes the oldest.
        cache.get(1);

        cache.put(4, tile(4));

        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(4));
    }

    #[test]
    fn overflow_trims_to_the_low_water_mark() {
        let mut cache = TileCache::new(4 * TILE_BYTES, 2 * TILE_BYTES);

        for key in 0..4 {
            cache.put(key, tile(0));
        }
        assert_eq!(cache.used(), 4 * TILE_BYTES);

        cache.put(4, tile(0));

        // Trimmed to the low-water mark before inserting, not to capacity.
        assert_eq!(cache.used(), 2 * TILE_BYTES);
    }

    #[test]
    fn reinsert_replaces_without_double_counting() {
        let mut cache = TileCache::new(4 * TILE_BYTES, 2 * TILE_BYTES);

        cache.put(1, tile(1));
        cache.put(1, tile(2));

        assert_eq!(cache.used(), TILE_BYTES);
        assert_eq!(cache.get(1).unwrap()[[0, 0]], 2);
    }

    #[test]
    fn absent_entries_respect_cooldown_and_retry_budget() {
        let mut absent = AbsentResourceList::new(3, Duration::from_secs(3600));

        assert!(!absent.is_absent(7));

        absent.mark(7);
        assert!(absent.is_absent(7));

        absent.unmark(7);
        assert!(!absent.is_absent(7));

        // With no cooldown, the tile stays eligible until retries run out.
        let mut absent = AbsentResourceList::new(2, Duration::ZERO);
        absent.mark(7);
        assert!(!absent.is_absent(7));
        absent.mark(7);
        assert!(absent.is_absent(7));
    }
}
