use crate::math::Sector;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The packed 64-bit identity of a tile, used as the universal cache key.
pub type TileKey = u64;

/// The address of a tile within a [`TileMatrixSet`]: pyramid level (0 is the
/// coarsest), row counted from the southern edge, and column from the west.
#[derive(
    Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Display, Serialize, Deserialize,
)]
#[display("{level}/{row}/{col}")]
pub struct TileCoord {
    pub level: u32,
    pub row: u32,
    pub col: u32,
}

impl TileCoord {
    /// Rows and columns are packed into 28 bits each.
    pub const MAX_ROW_COL: u32 = (1 << 28) - 1;
    /// Levels are packed into the top 8 bits.
    pub const MAX_LEVEL: u32 = u8::MAX as u32;

    pub fn new(level: u32, row: u32, col: u32) -> Self {
        debug_assert!(level <= Self::MAX_LEVEL && row <= Self::MAX_ROW_COL && col <= Self::MAX_ROW_COL);

        Self { level, row, col }
    }

    /// Packs `(level, row, col)` into a single 64-bit key. Injective within
    /// the supported ranges.
    pub fn key(self) -> TileKey {
        ((self.level as u64) << 56) | ((self.row as u64) << 28) | self.col as u64
    }

    /// One of the four children at the next finer level; quadrants are
    /// numbered row-major from the south-west.
    pub fn child(self, quadrant: u32) -> Self {
        debug_assert!(quadrant < 4);

        Self {
            level: self.level + 1,
            row: 2 * self.row + quadrant / 2,
            col: 2 * self.col + quadrant % 2,
        }
    }

    pub fn parent(self) -> Option<Self> {
        (self.level > 0).then(|| Self {
            level: self.level - 1,
            row: self.row / 2,
            col: self.col / 2,
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PyramidError {
    #[error("a tile matrix set needs at least one level")]
    NoLevels,
    #[error("more than {} levels are not addressable", TileCoord::MAX_LEVEL + 1)]
    TooManyLevels,
    #[error("the level 0 tile delta must be positive")]
    NonPositiveDelta,
    #[error("tiles need at least 2x2 samples")]
    TileTooSmall,
    #[error("the finest level exceeds the addressable row/column range")]
    MatrixOverflow,
}

/// One level of a tile pyramid: a regular grid of tiles covering the set's
/// sector, each tile holding `tile_width` x `tile_height` samples.
#[derive(Clone, Debug)]
pub struct TileMatrix {
    pub sector: Sector,
    pub level: u32,
    pub matrix_width: u32,
    pub matrix_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_delta_latitude: f64,
    pub tile_delta_longitude: f64,
}

impl TileMatrix {
    /// Degrees of latitude covered by one texel.
    pub fn texel_latitude(&self) -> f64 {
        self.tile_delta_latitude / self.tile_height as f64
    }

    /// Degrees of longitude covered by one texel.
    pub fn texel_longitude(&self) -> f64 {
        self.tile_delta_longitude / self.tile_width as f64
    }

    /// Total raster samples across the matrix, horizontally.
    pub fn raster_width(&self) -> u32 {
        self.matrix_width * self.tile_width
    }

    /// Total raster samples across the matrix, vertically.
    pub fn raster_height(&self) -> u32 {
        self.matrix_height * self.tile_height
    }

    /// The geographic region covered by the tile at `(row, col)`.
    pub fn tile_sector(&self, row: u32, col: u32) -> Sector {
        debug_assert!(row < self.matrix_height && col < self.matrix_width);

        let min_latitude = self.sector.min_latitude + row as f64 * self.tile_delta_latitude;
        let min_longitude = self.sector.min_longitude + col as f64 * self.tile_delta_longitude;

        Sector {
            min_latitude,
            max_latitude: min_latitude + self.tile_delta_latitude,
            min_longitude,
            max_longitude: min_longitude + self.tile_delta_longitude,
        }
    }
}

/// An ordered sequence of [`TileMatrix`] levels, coarsest first, each level
/// halving the angular tile delta of the previous one. Pure arithmetic; the
/// elevation coverage and the tessellator both navigate by it.
#[derive(Clone, Debug)]
pub struct TileMatrixSet {
    pub sector: Sector,
    entries: Vec<TileMatrix>,
}

impl TileMatrixSet {
    pub fn new(
        sector: Sector,
        level_zero_delta: (f64, f64),
        num_levels: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, PyramidError> {
        let (delta_latitude, delta_longitude) = level_zero_delta;

        if num_levels == 0 {
            return Err(PyramidError::NoLevels);
        }
        if num_levels > TileCoord::MAX_LEVEL + 1 {
            return Err(PyramidError::TooManyLevels);
        }
        if delta_latitude <= 0.0 || delta_longitude <= 0.0 {
            return Err(PyramidError::NonPositiveDelta);
        }
        if tile_width < 2 || tile_height < 2 {
            return Err(PyramidError::TileTooSmall);
        }

        let entries = (0..num_levels)
            .map(|level| {
                let divisor = 2f64.powi(level as i32);
                let tile_delta_latitude = delta_latitude / divisor;
                let tile_delta_longitude = delta_longitude / divisor;

                let matrix_height =
                    (sector.delta_latitude() / tile_delta_latitude).round().max(1.0);
                let matrix_width =
                    (sector.delta_longitude() / tile_delta_longitude).round().max(1.0);

                if matrix_height > TileCoord::MAX_ROW_COL as f64
                    || matrix_width > TileCoord::MAX_ROW_COL as f64
                {
                    return Err(PyramidError::MatrixOverflow);
                }

                Ok(TileMatrix {
                    sector,
                    level,
                    matrix_width: matrix_width as u32,
                    matrix_height: matrix_height as u32,
                    tile_width,
                    tile_height,
                    tile_delta_latitude,
                    tile_delta_longitude,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { sector, entries })
    }

    /// A full-sphere pyramid with 90 degree level 0 tiles.
    pub fn global(num_levels: u32, tile_width: u32, tile_height: u32) -> Result<Self, PyramidError> {
        Self::new(
            Sector::FULL_SPHERE,
            (90.0, 90.0),
            num_levels,
            tile_width,
            tile_height,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this set wraps in longitude (full 360 degree coverage).
    /// Wrapping sets sample modulo in longitude; others clamp to the raster
    /// edge.
    pub fn is_global(&self) -> bool {
        self.sector.is_full_longitude()
    }

    pub fn matrix(&self, level: usize) -> &TileMatrix {
        &self.entries[level]
    }

    pub fn matrices(&self) -> impl Iterator<Item = &TileMatrix> {
        self.entries.iter()
    }

    /// The coarsest level whose texel size meets `degrees_per_texel`, or the
    /// finest level when none does. This is the single LOD decision point
    /// shared by elevation sampling and tessellation.
    pub fn index_of_matrix_nearest(&self, degrees_per_texel: f64) -> usize {
        self.entries
            .iter()
            .position(|matrix| {
                matrix.texel_latitude() <= degrees_per_texel
                    && matrix.texel_longitude() <= degrees_per_texel
            })
            .unwrap_or(self.entries.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tile_keys_are_injective() {
        let mut keys = HashSet::new();

        for level in [0, 1, 7, 15] {
            for row in [0, 1, 255, TileCoord::MAX_ROW_COL] {
                for col in [0, 1, 255, TileCoord::MAX_ROW_COL] {
                    assert!(keys.insert(TileCoord::new(level, row, col).key()));
                }
            }
        }
    }

    #[test]
    fn child_and_parent_are_inverse() {
        let coord = TileCoord::new(3, 5, 6);

        for quadrant in 0..4 {
            let child = coord.child(quadrant);
            assert_eq!(child.level, 4);
            assert_eq!(child.parent(), Some(coord));
        }

        assert_eq!(TileCoord::new(0, 0, 0).parent(), None);
    }

    #[test]
    fn levels_halve_the_delta() {
        let set = TileMatrixSet::global(4, 32, 32).unwrap();

        assert_eq!(set.len(), 4);
        assert_eq!(set.matrix(0).matrix_width, 4);
        assert_eq!(set.matrix(0).matrix_height, 2);
        assert_eq!(set.matrix(3).tile_delta_latitude, 11.25);
        assert_eq!(set.matrix(3).matrix_width, 32);
    }

    #[test]
    fn tile_sectors_tile_the_set_sector() {
        let set = TileMatrixSet::global(2, 16, 16).unwrap();
        let matrix = set.matrix(1);

        let first = matrix.tile_sector(0, 0);
        assert_eq!(first.min_latitude, -90.0);
        assert_eq!(first.min_longitude, -180.0);

        let last = matrix.tile_sector(matrix.matrix_height - 1, matrix.matrix_width - 1);
        assert_eq!(last.max_latitude, 90.0);
        assert_eq!(last.max_longitude, 180.0);
    }

    #[test]
    fn nearest_matrix_is_the_coarsest_meeting_the_target() {
        let set = TileMatrixSet::global(5, 32, 32).unwrap();

        // Level 0 texel is 90/32 degrees.
        let level0_texel = set.matrix(0).texel_latitude();

        assert_eq!(set.index_of_matrix_nearest(level0_texel * 2.0), 0);
        assert_eq!(set.index_of_matrix_nearest(level0_texel / 2.0), 1);

        // Finer than the finest level degrades to the finest.
        assert_eq!(set.index_of_matrix_nearest(1e-12), 4);
    }

    #[test]
    fn pyramids_deeper_than_64_levels_construct() {
        // An oversized level 0 delta keeps every level's matrix addressable
        // even past 64 halvings.
        let set = TileMatrixSet::new(Sector::FULL_SPHERE, (1e21, 1e21), 70, 4, 4).unwrap();

        assert_eq!(set.len(), 70);
        assert_eq!(set.matrix(0).matrix_width, 1);
        assert_eq!(set.matrix(0).matrix_height, 1);

        let finest = set.matrix(69);
        assert!(finest.tile_delta_latitude > 0.0 && finest.tile_delta_latitude.is_finite());
        assert_eq!(finest.tile_delta_latitude, 1e21 / 2f64.powi(69));
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        assert_eq!(
            TileMatrixSet::global(0, 32, 32).unwrap_err(),
            PyramidError::NoLevels
        );
        assert_eq!(
            TileMatrixSet::global(2, 1, 32).unwrap_err(),
            PyramidError::TileTooSmall
        );
        assert_eq!(
            TileMatrixSet::new(Sector::FULL_SPHERE, (0.0, 90.0), 2, 32, 32).unwrap_err(),
            PyramidError::NonPositiveDelta
        );
        assert_eq!(
            TileMatrixSet::global(31, 32, 32).unwrap_err(),
            PyramidError::MatrixOverflow
        );
    }
}
