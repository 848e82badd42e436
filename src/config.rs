use crate::{
    elevation::{CoverageConfig, ElevationSource, TiledElevationCoverage},
    globe::Globe,
    math::Sector,
    tessellator::{Tessellator, TessellatorConfig},
    tile_matrix::TileMatrixSet,
};
use anyhow::Result;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, sync::Arc};

/// The projection a configured globe uses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionKind {
    #[default]
    Wgs84,
    Mercator,
}

/// The persisted description of a terrain: pyramid shape, projection and
/// resource limits. Serialized as RON next to the data it describes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    pub sector: Sector,
    /// Angular (latitude, longitude) extent of a level 0 tile, in degrees.
    pub level_zero_delta: (f64, f64),
    pub num_levels: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub projection: ProjectionKind,
    pub coverage: CoverageConfig,
    pub tessellator: TessellatorConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            sector: Sector::FULL_SPHERE,
            level_zero_delta: (90.0, 90.0),
            num_levels: 12,
            tile_width: 256,
            tile_height: 256,
            projection: ProjectionKind::Wgs84,
            coverage: CoverageConfig::default(),
            tessellator: TessellatorConfig::default(),
        }
    }
}

impl TerrainConfig {
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let encoded = fs::read_to_string(path)?;
        let config = ron::from_str(&encoded)?;
        Ok(config)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = ron::ser::to_string_pretty(self, PrettyConfig::default())?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn globe(&self) -> Globe {
        match self.projection {
            ProjectionKind::Wgs84 => Globe::wgs84(),
            ProjectionKind::Mercator => Globe::mercator(),
        }
    }

    pub fn tile_matrix_set(&self) -> Result<TileMatrixSet> {
        let matrix_set = TileMatrixSet::new(
            self.sector,
            self.level_zero_delta,
            self.num_levels,
            self.tile_width,
            self.tile_height,
        )?;
        Ok(matrix_set)
    }

    pub fn coverage(&self, source: Arc<dyn ElevationSource>) -> Result<TiledElevationCoverage> {
        Ok(TiledElevationCoverage::new(
            self.tile_matrix_set()?,
            source,
            self.coverage.clone(),
        ))
    }

    pub fn tessellator(&self) -> Tessellator {
        Tessellator::new(self.tessellator.clone())
    }
}
