//! Rendering of extracted raster data into delivery assets.
//!
//! Scalar and vector fields become RGBA buffers via [`encode`], which can
//! then be serialized as PNG ([`png`]) or as a cloud-optimized GeoTIFF
//! with overviews ([`cog`]).

pub mod cog;
pub mod encode;
pub mod png;

pub use cog::{overview_factors, write_cog, TILE_SIZE};
pub use encode::{encode_rgba, encode_vector_rgba, resolve_range, scale_to_unit, ScaleParams};
pub use png::create_png;
