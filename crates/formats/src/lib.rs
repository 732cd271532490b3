//! Source format plugins.
//!
//! GRIB2, NetCDF and GeoTIFF readers normalized behind the
//! [`plugin::FormatPlugin`] trait: discover variables, resolve timestamps,
//! and read pixel windows lazily as north-up row-major float32 with NaN
//! for missing values. The [`plugin::FormatRegistry`] maps a catalog's
//! declared format to its plugin.

pub mod geotiff;
pub mod grib;
pub mod netcdf;
pub mod plugin;
pub mod timestamp;

pub use geotiff::GeotiffPlugin;
pub use grib::GribPlugin;
pub use netcdf::NetcdfPlugin;
pub use plugin::{
    BandMeta, ExtractedBand, FormatPlugin, FormatRegistry, LazyBand, SourceBand, SourceSelector,
    WindowReader,
};
pub use timestamp::parse_filename_timestamp;
