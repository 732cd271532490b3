//! Multi-resolution Zarr pyramids for ingested raster variables.
//!
//! Extracted grids are coarsened into a short ladder of halved levels and
//! appended timestep by timestep to a per-variable store ([`store`]), using
//! the resampling kernels in [`resample`].

pub mod resample;
pub mod store;

pub use resample::{coarsen_2x, linspace, resample_to_coords};
pub use store::{
    LevelInfo, PyramidInfo, PyramidStore, PyramidUpdate, DEFAULT_LEVELS, PIXELS_PER_TILE,
    TIME_CHUNK,
};
