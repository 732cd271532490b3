//! The format-plugin contract and registry.
//!
//! Every supported source format (GRIB2, NetCDF, GeoTIFF) is normalized
//! behind [`FormatPlugin`]: list variables, resolve timestamps, and read one
//! variable at a time as a lazy, windowed, north-up float32 band. Callers
//! never see format internals, only [`BandMeta`] + pixel windows.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use raster_common::{Bounds, FileFormat, PixelWindow, RasterError, RasterResult, VariableSource};

use crate::geotiff::GeotiffPlugin;
use crate::grib::GribPlugin;
use crate::netcdf::NetcdfPlugin;

/// Descriptor for one raw band/field discovered in a source file.
#[derive(Debug, Clone)]
pub struct SourceBand {
    pub name: String,
    pub long_name: Option<String>,
    pub units: Option<String>,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
}

/// Full-raster georeferencing for one variable of one file.
///
/// Always describes the complete raster in north-up orientation, regardless
/// of any window a read was scoped to. `res_x`/`res_y` are positive
/// magnitudes in CRS units per pixel.
#[derive(Debug, Clone)]
pub struct BandMeta {
    pub bounds: Bounds,
    pub crs: String,
    pub res_x: f64,
    pub res_y: f64,
    pub width: usize,
    pub height: usize,
    /// The source stores rows south-to-north; readers flip so callers always
    /// see row 0 = northmost.
    pub flip_y: bool,
    pub units: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BandMeta {
    /// Geographic bounds of a pixel window, derived from the full-raster
    /// bounds and resolution. Window coordinates are north-up.
    pub fn window_bounds(&self, window: &PixelWindow) -> Bounds {
        let west = self.bounds.west + window.x as f64 * self.res_x;
        let north = self.bounds.north - window.y as f64 * self.res_y;
        Bounds::new(
            west,
            north - window.height as f64 * self.res_y,
            west + window.width as f64 * self.res_x,
            north,
        )
    }
}

/// A materialized band read: north-up row-major float32, nodata as NaN.
#[derive(Debug, Clone)]
pub struct ExtractedBand {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    /// Bounds of `data` (the window that was read, not necessarily the full
    /// raster).
    pub bounds: Bounds,
    pub meta: BandMeta,
}

impl ExtractedBand {
    pub fn value_at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }
}

/// Window-reader closure: takes an absolute full-raster window (north-up)
/// and returns its pixels, north-up row-major, nodata replaced with NaN.
pub type WindowReader = Box<dyn Fn(PixelWindow) -> RasterResult<Vec<f32>> + Send>;

/// A lazy handle onto one variable: georeferencing is resolved, pixels are
/// not. Reads go through a window-reader closure so statistics and chunked
/// processing never materialize more than one block at a time.
pub struct LazyBand {
    pub meta: BandMeta,
    window: PixelWindow,
    reader: WindowReader,
}

impl LazyBand {
    pub fn new(meta: BandMeta, window: Option<PixelWindow>, reader: WindowReader) -> Self {
        let window = window
            .map(|w| w.clamp_to(meta.width, meta.height))
            .unwrap_or_else(|| PixelWindow::full(meta.width, meta.height));
        Self {
            meta,
            window,
            reader,
        }
    }

    /// Width of the scoped window (full raster width when unwindowed).
    pub fn width(&self) -> usize {
        self.window.width
    }

    pub fn height(&self) -> usize {
        self.window.height
    }

    pub fn window(&self) -> PixelWindow {
        self.window
    }

    /// Bounds of the scoped window.
    pub fn bounds(&self) -> Bounds {
        self.meta.window_bounds(&self.window)
    }

    /// Read a sub-window, relative to this band's scoped window. Clamps to
    /// the remaining extent rather than erroring on overshoot.
    pub fn read_window(&self, rel: PixelWindow) -> RasterResult<Vec<f32>> {
        let rel = rel.clamp_to(self.window.width, self.window.height);
        let abs = PixelWindow::new(
            self.window.x + rel.x,
            self.window.y + rel.y,
            rel.width,
            rel.height,
        );
        (self.reader)(abs)
    }

    /// Materialize the scoped window in one read.
    pub fn materialize(&self) -> RasterResult<ExtractedBand> {
        let data = (self.reader)(self.window)?;
        Ok(ExtractedBand {
            data,
            width: self.window.width,
            height: self.window.height,
            bounds: self.bounds(),
            meta: self.meta.clone(),
        })
    }
}

/// Operand selector carried from a [`VariableSource`] into plugin reads.
#[derive(Debug, Clone, Default)]
pub struct SourceSelector {
    /// Level/vertical dimension name, e.g. "isobaricInhPa" for GRIB or a
    /// NetCDF dimension name.
    pub vertical_dimension: Option<String>,
    pub vertical_value: Option<f64>,
    /// 1-based band index for multi-band GeoTIFF sources.
    pub band_index: Option<usize>,
}

impl SourceSelector {
    pub fn from_source(source: &VariableSource) -> Self {
        Self {
            vertical_dimension: source.vertical_dimension.clone(),
            vertical_value: source.vertical_value,
            band_index: source.band_index,
        }
    }
}

/// One source format behind a uniform lazy, windowed read interface.
pub trait FormatPlugin: Send + Sync {
    /// Declared format this plugin serves.
    fn format(&self) -> FileFormat;

    /// Cheap sniff by extension or magic bytes, used only when no declared
    /// format is available.
    fn can_handle(&self, path: &Path) -> bool;

    fn list_variables(&self, path: &Path) -> RasterResult<Vec<SourceBand>>;

    /// Distinct acquisition timestamps available for one variable, sorted
    /// ascending.
    fn timestamps(&self, path: &Path, variable: &str) -> RasterResult<Vec<DateTime<Utc>>>;

    /// Open one variable lazily. No pixel data is read until the returned
    /// band is windowed or materialized.
    fn open_variable(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
        selector: &SourceSelector,
    ) -> RasterResult<LazyBand>;

    /// Materialize one variable: north-up row-major float32, nodata as NaN.
    fn extract_variable(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
        selector: &SourceSelector,
    ) -> RasterResult<ExtractedBand> {
        self.open_variable(path, variable, timestamp, window, selector)?
            .materialize()
    }

    /// Full-raster georeferencing without reading pixel data. The default
    /// probes a 1x1 window; backends with cheap headers override this.
    fn metadata(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        selector: &SourceSelector,
    ) -> RasterResult<BandMeta> {
        let band = self.open_variable(
            path,
            variable,
            timestamp,
            Some(PixelWindow::new(0, 0, 1, 1)),
            selector,
        )?;
        Ok(band.meta)
    }
}

/// Maps declared file formats to plugins. Constructed once at startup and
/// passed by reference; there is no global instance.
pub struct FormatRegistry {
    plugins: Vec<Arc<dyn FormatPlugin>>,
}

impl FormatRegistry {
    /// Registry holding the built-in GRIB2, NetCDF and GeoTIFF plugins.
    pub fn with_builtin_plugins() -> Self {
        Self {
            plugins: vec![
                Arc::new(GribPlugin::new()),
                Arc::new(NetcdfPlugin::new()),
                Arc::new(GeotiffPlugin::new()),
            ],
        }
    }

    /// Plugin for a declared format. Formats without a registered plugin
    /// (for example `zarr` catalogs) are a typed NotFound.
    pub fn get(&self, format: FileFormat) -> RasterResult<Arc<dyn FormatPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.format() == format)
            .cloned()
            .ok_or_else(|| {
                RasterError::NotFound(format!(
                    "No format plugin registered for '{}'",
                    format.as_str()
                ))
            })
    }

    /// Sniff-based fallback when a file arrives with no declared format.
    pub fn for_file(&self, path: &Path) -> Option<Arc<dyn FormatPlugin>> {
        self.plugins.iter().find(|p| p.can_handle(path)).cloned()
    }
}
