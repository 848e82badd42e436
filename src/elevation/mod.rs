//! The sparse, asynchronously populated elevation raster pyramid.
//!
//! [`TiledElevationCoverage`] answers height queries from whatever tiles are
//! already resident, degrading to coarser levels rather than blocking while
//! the [`ElevationSource`] fills the cache in the background.

mod cache;
pub mod coverage;
pub mod retrieval;

pub use coverage::{CoverageConfig, TiledElevationCoverage};
pub use retrieval::{ElevationSource, Retrieval, RetrievalSink};
