//! This crate renders a planetary surface as an adaptively subdivided
//! triangle mesh whose heights come from a sparse, asynchronously populated
//! elevation raster pyramid.
//!
//! # Background
//! There are two critical questions such a terrain core has to solve:
//!
//! ## How to access elevation data that is too large to hold?
//! A planetary elevation set does not fit in memory, so it is cut into a
//! quadtree pyramid of raster tiles that are fetched on demand. The
//! [`TiledElevationCoverage`](elevation::TiledElevationCoverage) answers
//! height queries over this pyramid without ever blocking: it serves the
//! finest fully resident level, enqueues what is missing through an abstract
//! [`ElevationSource`](elevation::ElevationSource), and refines on later
//! queries once tiles arrive. A byte-budgeted LRU cache and cooldown-gated
//! absent tracking keep the working set and the fetch traffic bounded.
//! See the [`elevation`] module for more information.
//!
//! ## How to best approximate the surface geometry?
//! Rendering the whole pyramid at full resolution is out of the question, so
//! the [`Tessellator`](tessellator::Tessellator) walks the quadtree each
//! frame and keeps a tile exactly when its texel size on screen satisfies
//! the configured detail control. Accepted tiles become origin-relative
//! vertex buffers (the per-tile origin is what keeps `f32` precision usable
//! at planetary scale) collected into a [`Terrain`](terrain::Terrain)
//! snapshot, sorted front to back for ray queries.
//!
//! The projection math underneath both lives in [`math`]: the WGS 84
//! ellipsoid, its closed-form inverse, and a 2D Mercator variant with
//! explicit projection limits.

pub mod config;
pub mod elevation;
pub mod globe;
pub mod math;
pub mod terrain;
pub mod tessellator;
pub mod tile_matrix;

pub mod prelude {
    //! `use globe_terrain::prelude::*;` to import the common types.
    pub use crate::{
        config::{ProjectionKind, TerrainConfig},
        elevation::{
            CoverageConfig, ElevationSource, RetrievalSink, TiledElevationCoverage,
        },
        globe::Globe,
        math::{Ellipsoid, GeographicProjection, Position, Ray, Sector},
        terrain::{Terrain, TerrainTile, TileGeometry},
        tessellator::{Tessellator, TessellatorConfig, ViewState},
        tile_matrix::{TileCoord, TileKey, TileMatrix, TileMatrixSet},
    };
}
