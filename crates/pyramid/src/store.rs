//! Multi-resolution time-series store for rendered variables.
//!
//! Each (catalog, collection, variable) triple owns one Zarr store holding a
//! fixed ladder of resolution levels. Level 0 is the native grid and each
//! further level halves the previous one. Every level carries `time`, `y` and
//! `x` axes tagged with `_ARRAY_DIMENSIONS`, so the store reads back as a
//! labelled dataset in xarray-convention tooling.
//!
//! Appends are idempotent: a timestamp already present on the level 0 time
//! axis is skipped rather than written twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, ChunkGrid, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use raster_common::{Bounds, RasterError, RasterResult, Variable};

use crate::resample::{coarsen_2x, linspace, resample_to_coords};

/// Number of resolution levels built for a new store, native grid included.
pub const DEFAULT_LEVELS: usize = 6;

/// Spatial chunk edge for data arrays. Combined with a time chunk of 1, an
/// append never rewrites chunks belonging to earlier timesteps.
pub const PIXELS_PER_TILE: usize = 128;

/// Chunk length for the per-level time axis.
pub const TIME_CHUNK: usize = 100;

/// Blosc compression level applied to every array.
const COMPRESSION_LEVEL: u8 = 1;

/// Outcome of [`PyramidStore::append_timestep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidUpdate {
    /// No store existed; one was created with this timestep at every level.
    Created,
    /// The timestep was appended to every level of an existing store.
    Appended,
    /// The timestamp was already on the time axis; nothing was written.
    AlreadyPresent,
}

/// Shape of one resolution level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelInfo {
    pub index: usize,
    pub width: usize,
    pub height: usize,
    pub time_steps: usize,
}

/// Summary of an existing store, as reported by [`PyramidStore::info`].
#[derive(Debug, Clone)]
pub struct PyramidInfo {
    pub path: PathBuf,
    pub levels: Vec<LevelInfo>,
}

/// Filesystem-backed pyramid store rooted at a staging directory.
pub struct PyramidStore {
    root: PathBuf,
}

impl PyramidStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store directory for one variable.
    ///
    /// Format: `{root}/zarr/{catalog}/{collection}/{variable}.zarr`
    pub fn store_path(&self, catalog: &str, collection: &str, variable: &str) -> PathBuf {
        self.root
            .join("zarr")
            .join(catalog)
            .join(collection)
            .join(format!("{}.zarr", variable))
    }

    /// Append one timestep for `variable`, creating the store on first use.
    ///
    /// `data` is the native-resolution grid in row-major north-to-south order
    /// and `bounds` describes its extent. Coordinate axes are fixed when the
    /// store is created; a later grid whose shape no longer matches a level is
    /// interpolated onto the stored axes instead.
    pub fn append_timestep(
        &self,
        catalog: &str,
        collection: &str,
        variable: &Variable,
        timestamp: DateTime<Utc>,
        data: &[f32],
        width: usize,
        height: usize,
        bounds: &Bounds,
    ) -> RasterResult<PyramidUpdate> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(RasterError::InternalError(format!(
                "pyramid input has {} values for a {}x{} grid",
                data.len(),
                width,
                height
            )));
        }

        let path = self.store_path(catalog, collection, &variable.slug);
        let millis = timestamp.timestamp_millis();

        if !path.exists() {
            let levels = create_store(
                &path, catalog, collection, variable, millis, data, width, height, bounds,
            )?;
            info!(
                catalog,
                collection,
                variable = %variable.slug,
                levels,
                "Created pyramid store"
            );
            return Ok(PyramidUpdate::Created);
        }

        let store = Arc::new(FilesystemStore::new(&path).map_err(storage_err)?);
        if time_axis(&store, 0)?.contains(&millis) {
            debug!(
                variable = %variable.slug,
                timestamp = %timestamp,
                "Timestep already in pyramid, skipping"
            );
            return Ok(PyramidUpdate::AlreadyPresent);
        }

        append_to_levels(&store, &path, variable, millis, data, width, height, bounds)?;
        debug!(
            variable = %variable.slug,
            timestamp = %timestamp,
            "Appended timestep to pyramid"
        );
        Ok(PyramidUpdate::Appended)
    }

    /// Shapes and step counts for an existing store.
    pub fn info(&self, catalog: &str, collection: &str, variable: &str) -> RasterResult<PyramidInfo> {
        let path = self.store_path(catalog, collection, variable);
        if !path.exists() {
            return Err(RasterError::NotFound(format!(
                "no pyramid store for {}/{}/{}",
                catalog, collection, variable
            )));
        }

        let store = Arc::new(FilesystemStore::new(&path).map_err(storage_err)?);
        let mut levels = Vec::new();
        for level in level_indices(&path)? {
            let node = format!("/{}/{}", level, variable);
            let array = Array::open(store.clone(), &node).map_err(storage_err)?;
            let (steps, h, w) = level_shape(&array, &node)?;
            levels.push(LevelInfo {
                index: level,
                width: w,
                height: h,
                time_steps: steps as usize,
            });
        }
        Ok(PyramidInfo { path, levels })
    }

    /// Remove the store directory. Returns whether anything was deleted.
    pub fn delete(&self, catalog: &str, collection: &str, variable: &str) -> RasterResult<bool> {
        let path = self.store_path(catalog, collection, variable);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path)?;
        info!(catalog, collection, variable, "Deleted pyramid store");
        Ok(true)
    }
}

/// Build the full level ladder for a brand-new store.
///
/// Levels stop early once another halving would produce an empty grid, so a
/// small native grid gets fewer than [`DEFAULT_LEVELS`] levels.
fn create_store(
    path: &Path,
    catalog: &str,
    collection: &str,
    variable: &Variable,
    millis: i64,
    data: &[f32],
    width: usize,
    height: usize,
    bounds: &Bounds,
) -> RasterResult<usize> {
    std::fs::create_dir_all(path)?;
    let store = Arc::new(FilesystemStore::new(path).map_err(storage_err)?);
    let clim = climate_range(variable, data);

    let mut level_data = data.to_vec();
    let mut w = width;
    let mut h = height;
    let mut levels = 0;

    for level in 0..DEFAULT_LEVELS {
        write_level(
            &store, level, catalog, collection, variable, &clim, millis, &level_data, w, h, bounds,
        )?;
        levels = level + 1;
        if level + 1 == DEFAULT_LEVELS || w < 2 || h < 2 {
            break;
        }
        let (coarse, cw, ch) = coarsen_2x(&level_data, w, h);
        level_data = coarse;
        w = cw;
        h = ch;
    }
    Ok(levels)
}

/// Write the data, coordinate and time arrays for one level.
fn write_level(
    store: &Arc<FilesystemStore>,
    level: usize,
    catalog: &str,
    collection: &str,
    variable: &Variable,
    clim: &(Option<f64>, Option<f64>),
    millis: i64,
    data: &[f32],
    width: usize,
    height: usize,
    bounds: &Bounds,
) -> RasterResult<()> {
    let mut attrs = serde_json::Map::new();
    attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(["time", "y", "x"]));
    attrs.insert("units".to_string(), json!(variable.units));
    attrs.insert("clim".to_string(), json!([clim.0, clim.1]));
    attrs.insert("catalog".to_string(), json!(catalog));
    attrs.insert("collection".to_string(), json!(collection));
    attrs.insert("variable".to_string(), json!(variable.slug));

    let array = build_array(
        store.clone(),
        &format!("/{}/{}", level, variable.slug),
        vec![1, height as u64, width as u64],
        data_chunks(),
        DataType::Float32,
        FillValue::from(f32::NAN),
        attrs,
        4,
    )?;
    write_elements(&array, &[0, 0, 0], &[1, height as u64, width as u64], data)?;

    let xs = linspace(bounds.west, bounds.east, width);
    let ys = linspace(bounds.north, bounds.south, height);
    write_axis(store, level, "x", &xs)?;
    write_axis(store, level, "y", &ys)?;

    let mut time_attrs = serde_json::Map::new();
    time_attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(["time"]));
    time_attrs.insert(
        "units".to_string(),
        json!("milliseconds since 1970-01-01T00:00:00Z"),
    );
    let time = build_array(
        store.clone(),
        &format!("/{}/time", level),
        vec![1],
        vec![TIME_CHUNK as u64],
        DataType::Int64,
        FillValue::from(0i64),
        time_attrs,
        8,
    )?;
    write_elements(&time, &[0], &[1], &[millis])?;

    Ok(())
}

/// Append one timestep to every level of an existing store.
fn append_to_levels(
    store: &Arc<FilesystemStore>,
    path: &Path,
    variable: &Variable,
    millis: i64,
    data: &[f32],
    width: usize,
    height: usize,
    bounds: &Bounds,
) -> RasterResult<()> {
    let levels = level_indices(path)?;

    // Successively halved copies of the incoming grid. A level whose stored
    // shape matches the chain takes the chain slab directly.
    let mut chain = data.to_vec();
    let mut w = width;
    let mut h = height;

    for (i, &level) in levels.iter().enumerate() {
        let node = format!("/{}/{}", level, variable.slug);
        let array = Array::open(store.clone(), &node).map_err(storage_err)?;
        let (steps, lh, lw) = level_shape(&array, &node)?;

        let resampled;
        let slab: &[f32] = if w == lw && h == lh {
            &chain
        } else {
            let xs = read_axis(store, level, "x")?;
            let ys = read_axis(store, level, "y")?;
            resampled = resample_to_coords(
                data,
                width,
                height,
                bounds.west,
                bounds.south,
                bounds.east,
                bounds.north,
                &xs,
                &ys,
            );
            &resampled
        };

        let grown = regrow(
            store,
            &node,
            &array,
            DataType::Float32,
            FillValue::from(f32::NAN),
            data_chunks(),
            4,
        )?;
        write_elements(&grown, &[steps, 0, 0], &[1, lh as u64, lw as u64], slab)?;

        let time_node = format!("/{}/time", level);
        let time = Array::open(store.clone(), &time_node).map_err(storage_err)?;
        let len = time.shape().first().copied().ok_or_else(|| {
            RasterError::StorageError(format!("time axis {} has no dimensions", time_node))
        })?;
        let grown_time = regrow(
            store,
            &time_node,
            &time,
            DataType::Int64,
            FillValue::from(0i64),
            vec![TIME_CHUNK as u64],
            8,
        )?;
        write_elements(&grown_time, &[len], &[1], &[millis])?;

        if i + 1 < levels.len() && w >= 2 && h >= 2 {
            let (coarse, cw, ch) = coarsen_2x(&chain, w, h);
            chain = coarse;
            w = cw;
            h = ch;
        }
    }
    Ok(())
}

/// Create an array node, persist its metadata and return it.
fn build_array(
    store: Arc<FilesystemStore>,
    path: &str,
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    data_type: DataType,
    fill_value: FillValue,
    attributes: serde_json::Map<String, serde_json::Value>,
    typesize: usize,
) -> RasterResult<Array<FilesystemStore>> {
    let chunk_grid: ChunkGrid = chunk_shape
        .try_into()
        .map_err(|e| RasterError::StorageError(format!("{:?}", e)))?;
    let codec = compression_codec(typesize)?;

    let mut binding = ArrayBuilder::new(shape, data_type, chunk_grid, fill_value);
    let builder = binding
        .attributes(attributes)
        .bytes_to_bytes_codecs(vec![codec]);
    let array = builder.build(store, path).map_err(storage_err)?;
    array.store_metadata().map_err(storage_err)?;
    Ok(array)
}

/// Rewrite an array's metadata with the leading dimension grown by one.
/// The chunk layout and codecs must match the original so that chunks
/// already on disk stay readable; attributes are carried over unchanged.
fn regrow(
    store: &Arc<FilesystemStore>,
    path: &str,
    array: &Array<FilesystemStore>,
    data_type: DataType,
    fill_value: FillValue,
    chunk_shape: Vec<u64>,
    typesize: usize,
) -> RasterResult<Array<FilesystemStore>> {
    let mut shape = array.shape().to_vec();
    if shape.is_empty() {
        return Err(RasterError::StorageError(format!(
            "array {} has no dimensions",
            path
        )));
    }
    shape[0] += 1;
    build_array(
        store.clone(),
        path,
        shape,
        chunk_shape,
        data_type,
        fill_value,
        array.attributes().clone(),
        typesize,
    )
}

fn data_chunks() -> Vec<u64> {
    vec![1, PIXELS_PER_TILE as u64, PIXELS_PER_TILE as u64]
}

/// Write a 1-D coordinate axis stored as a single whole-array chunk.
fn write_axis(
    store: &Arc<FilesystemStore>,
    level: usize,
    name: &str,
    values: &[f64],
) -> RasterResult<()> {
    let mut attrs = serde_json::Map::new();
    attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!([name]));
    let array = build_array(
        store.clone(),
        &format!("/{}/{}", level, name),
        vec![values.len() as u64],
        vec![values.len() as u64],
        DataType::Float64,
        FillValue::from(f64::NAN),
        attrs,
        8,
    )?;
    write_elements(&array, &[0], &[values.len() as u64], values)
}

fn read_axis(store: &Arc<FilesystemStore>, level: usize, name: &str) -> RasterResult<Vec<f64>> {
    read_vector(store, &format!("/{}/{}", level, name))
}

fn time_axis(store: &Arc<FilesystemStore>, level: usize) -> RasterResult<Vec<i64>> {
    read_vector(store, &format!("/{}/time", level))
}

fn read_vector<T: zarrs::array::ElementOwned>(
    store: &Arc<FilesystemStore>,
    node: &str,
) -> RasterResult<Vec<T>> {
    let array = Array::open(store.clone(), node).map_err(storage_err)?;
    let len = array.shape().first().copied().unwrap_or(0);
    let subset = ArraySubset::new_with_start_shape(vec![0], vec![len]).map_err(storage_err)?;
    let values: Vec<T> = array
        .retrieve_array_subset_elements(&subset)
        .map_err(storage_err)?;
    Ok(values)
}

fn write_elements<T: zarrs::array::Element>(
    array: &Array<FilesystemStore>,
    start: &[u64],
    shape: &[u64],
    elements: &[T],
) -> RasterResult<()> {
    let subset = ArraySubset::new_with_start_shape(start.to_vec(), shape.to_vec())
        .map_err(storage_err)?;
    array
        .store_array_subset_elements(&subset, elements)
        .map_err(storage_err)?;
    Ok(())
}

fn level_shape(array: &Array<FilesystemStore>, node: &str) -> RasterResult<(u64, usize, usize)> {
    match array.shape() {
        &[t, h, w] => Ok((t, h as usize, w as usize)),
        other => Err(RasterError::StorageError(format!(
            "array {} has shape {:?}, expected [time, y, x]",
            node, other
        ))),
    }
}

/// Digit-named child directories of the store, in ascending order.
fn level_indices(path: &Path) -> RasterResult<Vec<usize>> {
    let mut levels = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<usize>().ok())
        {
            levels.push(index);
        }
    }
    if levels.is_empty() {
        return Err(RasterError::StorageError(format!(
            "no pyramid levels under {}",
            path.display()
        )));
    }
    levels.sort_unstable();
    Ok(levels)
}

/// Colormap range stored with the data: configured limits win, observed
/// limits fill the gaps. All-NaN data leaves the range open.
fn climate_range(variable: &Variable, data: &[f32]) -> (Option<f64>, Option<f64>) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in data {
        if v.is_nan() {
            continue;
        }
        lo = lo.min(v as f64);
        hi = hi.max(v as f64);
    }
    let (observed_min, observed_max) = if lo <= hi {
        (Some(lo), Some(hi))
    } else {
        (None, None)
    };
    (
        variable.value_min.or(observed_min),
        variable.value_max.or(observed_max),
    )
}

fn compression_codec(
    typesize: usize,
) -> RasterResult<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
    let level = BloscCompressionLevel::try_from(COMPRESSION_LEVEL)
        .map_err(|_| RasterError::InternalError("invalid compression level".to_string()))?;
    let codec = BloscCodec::new(
        BloscCompressor::LZ4,
        level,
        None,
        BloscShuffleMode::Shuffle,
        Some(typesize),
    )
    .map_err(|e| RasterError::InternalError(e.to_string()))?;
    Ok(Arc::new(codec))
}

fn storage_err(err: impl std::fmt::Display) -> RasterError {
    RasterError::StorageError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use raster_common::{ScaleKind, TransformKind};
    use test_utils::{assert_approx_eq, create_test_grid};

    fn variable(slug: &str) -> Variable {
        Variable {
            slug: slug.to_string(),
            title: None,
            transform: TransformKind::Passthrough,
            transform_expression: None,
            unit_conversion: None,
            units: Some("K".to_string()),
            value_min: Some(200.0),
            value_max: None,
            scale: ScaleKind::Linear,
            is_active: true,
            sort_order: 0,
            sources: Vec::new(),
        }
    }

    fn timestamp(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_create_builds_level_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let data = create_test_grid(256, 256);
        let bounds = Bounds::new(0.0, 0.0, 25.6, 25.6);

        let update = store
            .append_timestep(
                "weather",
                "gfs",
                &variable("t2m"),
                timestamp(0),
                &data,
                256,
                256,
                &bounds,
            )
            .unwrap();
        assert_eq!(update, PyramidUpdate::Created);

        let info = store.info("weather", "gfs", "t2m").unwrap();
        assert_eq!(info.levels.len(), 6);
        let dims: Vec<(usize, usize)> = info.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(
            dims,
            vec![(256, 256), (128, 128), (64, 64), (32, 32), (16, 16), (8, 8)]
        );
        assert!(info.levels.iter().all(|l| l.time_steps == 1));
    }

    #[test]
    fn test_small_grid_stops_short_of_six_levels() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let data = create_test_grid(10, 8);
        let bounds = Bounds::new(0.0, 0.0, 10.0, 8.0);

        store
            .append_timestep(
                "weather",
                "gfs",
                &variable("t2m"),
                timestamp(0),
                &data,
                10,
                8,
                &bounds,
            )
            .unwrap();

        let info = store.info("weather", "gfs", "t2m").unwrap();
        let dims: Vec<(usize, usize)> = info.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(dims, vec![(10, 8), (5, 4), (2, 2), (1, 1)]);
    }

    #[test]
    fn test_append_extends_time_axis() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let bounds = Bounds::new(0.0, 0.0, 8.0, 8.0);
        let var = variable("t2m");

        let first = create_test_grid(8, 8);
        store
            .append_timestep("weather", "gfs", &var, timestamp(0), &first, 8, 8, &bounds)
            .unwrap();
        let second = vec![5.0_f32; 64];
        let update = store
            .append_timestep("weather", "gfs", &var, timestamp(6), &second, 8, 8, &bounds)
            .unwrap();
        assert_eq!(update, PyramidUpdate::Appended);

        let path = store.store_path("weather", "gfs", "t2m");
        let fs = Arc::new(FilesystemStore::new(&path).unwrap());
        let array = Array::open(fs.clone(), "/0/t2m").unwrap();
        assert_eq!(array.shape(), &[2, 8, 8]);

        let subset = ArraySubset::new_with_start_shape(vec![1, 0, 0], vec![1, 8, 8]).unwrap();
        let slab: Vec<f32> = array.retrieve_array_subset_elements(&subset).unwrap();
        assert!(slab.iter().all(|&v| v == 5.0));

        // the first slab is untouched by the append
        let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], vec![1, 8, 8]).unwrap();
        let first_back: Vec<f32> = array.retrieve_array_subset_elements(&subset).unwrap();
        assert_eq!(first_back, first);

        let times = time_axis(&fs, 0).unwrap();
        assert_eq!(
            times,
            vec![
                timestamp(0).timestamp_millis(),
                timestamp(6).timestamp_millis()
            ]
        );
    }

    #[test]
    fn test_duplicate_timestep_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let bounds = Bounds::new(0.0, 0.0, 4.0, 4.0);
        let var = variable("t2m");
        let data = create_test_grid(4, 4);

        let update = store
            .append_timestep("weather", "gfs", &var, timestamp(0), &data, 4, 4, &bounds)
            .unwrap();
        assert_eq!(update, PyramidUpdate::Created);

        let update = store
            .append_timestep("weather", "gfs", &var, timestamp(0), &data, 4, 4, &bounds)
            .unwrap();
        assert_eq!(update, PyramidUpdate::AlreadyPresent);

        let info = store.info("weather", "gfs", "t2m").unwrap();
        assert!(info.levels.iter().all(|l| l.time_steps == 1));
    }

    #[test]
    fn test_mismatched_grid_is_resampled_onto_stored_axes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let bounds = Bounds::new(0.0, 0.0, 8.0, 8.0);
        let var = variable("t2m");

        let first = create_test_grid(8, 8);
        store
            .append_timestep("weather", "gfs", &var, timestamp(0), &first, 8, 8, &bounds)
            .unwrap();

        // finer grid over the same extent; a constant field resamples exactly
        let second = vec![7.0_f32; 256];
        let update = store
            .append_timestep("weather", "gfs", &var, timestamp(6), &second, 16, 16, &bounds)
            .unwrap();
        assert_eq!(update, PyramidUpdate::Appended);

        let path = store.store_path("weather", "gfs", "t2m");
        let fs = Arc::new(FilesystemStore::new(&path).unwrap());
        let array = Array::open(fs, "/0/t2m").unwrap();
        assert_eq!(array.shape(), &[2, 8, 8]);

        let subset = ArraySubset::new_with_start_shape(vec![1, 0, 0], vec![1, 8, 8]).unwrap();
        let slab: Vec<f32> = array.retrieve_array_subset_elements(&subset).unwrap();
        assert!(slab.iter().all(|&v| (v - 7.0).abs() < 1e-6));
    }

    #[test]
    fn test_axes_run_west_to_east_and_north_to_south() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let bounds = Bounds::new(10.0, 40.0, 14.0, 44.0);
        let data = create_test_grid(4, 4);

        store
            .append_timestep(
                "weather",
                "gfs",
                &variable("t2m"),
                timestamp(0),
                &data,
                4,
                4,
                &bounds,
            )
            .unwrap();

        let path = store.store_path("weather", "gfs", "t2m");
        let fs = Arc::new(FilesystemStore::new(&path).unwrap());
        let xs = read_axis(&fs, 0, "x").unwrap();
        let ys = read_axis(&fs, 0, "y").unwrap();

        assert_approx_eq!(xs[0], 10.0);
        assert_approx_eq!(xs[3], 14.0);
        assert!(xs.windows(2).all(|p| p[0] < p[1]));

        assert_approx_eq!(ys[0], 44.0);
        assert_approx_eq!(ys[3], 40.0);
        assert!(ys.windows(2).all(|p| p[0] > p[1]));
    }

    #[test]
    fn test_data_array_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let bounds = Bounds::new(0.0, 0.0, 4.0, 4.0);
        let data = create_test_grid(4, 4);

        store
            .append_timestep(
                "weather",
                "gfs",
                &variable("t2m"),
                timestamp(0),
                &data,
                4,
                4,
                &bounds,
            )
            .unwrap();

        let path = store.store_path("weather", "gfs", "t2m");
        let fs = Arc::new(FilesystemStore::new(&path).unwrap());
        let array = Array::open(fs, "/0/t2m").unwrap();
        let attrs = array.attributes();

        assert_eq!(
            attrs.get("_ARRAY_DIMENSIONS").unwrap(),
            &json!(["time", "y", "x"])
        );
        assert_eq!(attrs.get("units").unwrap(), &json!("K"));
        // configured minimum wins, observed maximum fills the open end
        assert_eq!(attrs.get("clim").unwrap(), &json!([200.0, 3003.0]));
        assert_eq!(attrs.get("variable").unwrap(), &json!("t2m"));
        assert_eq!(attrs.get("collection").unwrap(), &json!("gfs"));
    }

    #[test]
    fn test_delete_reports_whether_store_existed() {
        let dir = tempfile::tempdir().unwrap();
        let store = PyramidStore::new(dir.path());
        let bounds = Bounds::new(0.0, 0.0, 4.0, 4.0);
        let data = create_test_grid(4, 4);

        store
            .append_timestep(
                "weather",
                "gfs",
                &variable("t2m"),
                timestamp(0),
                &data,
                4,
                4,
                &bounds,
            )
            .unwrap();

        assert!(store.delete("weather", "gfs", "t2m").unwrap());
        assert!(!store.store_path("weather", "gfs", "t2m").exists());
        assert!(!store.delete("weather", "gfs", "t2m").unwrap());
        assert!(matches!(
            store.info("weather", "gfs", "t2m"),
            Err(RasterError::NotFound(_))
        ));
    }
}
