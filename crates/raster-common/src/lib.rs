//! Common types shared across the raster ingestion pipeline.

pub mod bounds;
pub mod catalog;
pub mod error;
pub mod window;

pub use bounds::Bounds;
pub use catalog::{
    Boundary, Catalog, CatalogConfig, ClipMode, Collection, FileFormat, ScaleKind, TransformKind,
    Variable, VariableSource,
};
pub use error::{RasterError, RasterResult};
pub use window::{iter_windows, PixelWindow, WindowIter, DEFAULT_BLOCK_SIZE};
