//! NetCDF format plugin (classic and NetCDF-4/HDF5).
//!
//! Follows CF conventions where the file does: 1-D or 2-D coordinate
//! variables, `units = "<unit> since <epoch>"` time axes, `_FillValue`,
//! `scale_factor` and `add_offset`. Windowed reads reopen the file and
//! request only the hyperslab they need, which keeps memory flat for
//! large rasters.

use std::path::Path;
use std::sync::Once;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use raster_common::{Bounds, FileFormat, PixelWindow, RasterError, RasterResult};
use tracing::debug;

use crate::plugin::{BandMeta, FormatPlugin, LazyBand, SourceBand, SourceSelector};
use crate::timestamp::parse_filename_timestamp;

const EXTENSIONS: &[&str] = &["nc", "nc4", "netcdf"];

const LAT_NAMES: &[&str] = &["latitude", "lat", "y"];
const LON_NAMES: &[&str] = &["longitude", "lon", "x"];
const TIME_NAMES: &[&str] = &["time", "valid_time", "t", "datetime", "xtime"];

static SILENCE_HDF5: Once = Once::new();

pub struct NetcdfPlugin;

impl NetcdfPlugin {
    pub fn new() -> Self {
        // The HDF5 C library prints every probe failure to stderr unless
        // its error stack is muted.
        SILENCE_HDF5.call_once(|| {
            // SAFETY: null handlers are the documented way to disable
            // automatic error printing.
            unsafe {
                hdf5_metno_sys::h5e::H5Eset_auto2(
                    hdf5_metno_sys::h5e::H5E_DEFAULT,
                    None,
                    std::ptr::null_mut(),
                );
            }
        });
        Self
    }
}

impl Default for NetcdfPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatPlugin for NetcdfPlugin {
    fn format(&self) -> FileFormat {
        FileFormat::Netcdf
    }

    fn can_handle(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return true;
            }
        }
        match read_magic(path) {
            Some(magic) => &magic[..3] == b"CDF" || magic == [0x89, b'H', b'D', b'F'],
            None => false,
        }
    }

    fn list_variables(&self, path: &Path) -> RasterResult<Vec<SourceBand>> {
        let file = open_file(path)?;
        let mut bands = Vec::new();
        for var in file.variables() {
            if !looks_spatial(&file, &var) {
                continue;
            }
            let dims = var.dimensions();
            bands.push(SourceBand {
                name: var.name(),
                long_name: get_string_attr(&var, "long_name")
                    .or_else(|| get_string_attr(&var, "standard_name")),
                units: get_string_attr(&var, "units"),
                dims: dims.iter().map(|d| d.name()).collect(),
                shape: dims.iter().map(|d| d.len()).collect(),
            });
        }
        Ok(bands)
    }

    fn timestamps(&self, path: &Path, variable: &str) -> RasterResult<Vec<DateTime<Utc>>> {
        let file = open_file(path)?;
        let var = file.variable(variable).ok_or_else(|| {
            RasterError::NotFound(format!(
                "Variable '{}' not found in {}",
                variable,
                path.display()
            ))
        })?;

        if let Some(dim) = time_dimension(&var) {
            if let Some(mut times) = read_time_coords(&file, &dim) {
                if !times.is_empty() {
                    times.sort();
                    times.dedup();
                    return Ok(times);
                }
            }
        }
        if let Some(t) = parse_filename_timestamp(path) {
            return Ok(vec![t]);
        }
        Err(RasterError::FormatError(format!(
            "No time coordinate for '{}' and no timestamp in filename {}",
            variable,
            path.display()
        )))
    }

    fn open_variable(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
        selector: &SourceSelector,
    ) -> RasterResult<LazyBand> {
        let file = open_file(path)?;
        let var = file.variable(variable).ok_or_else(|| {
            RasterError::NotFound(format!(
                "Variable '{}' not found in {}",
                variable,
                path.display()
            ))
        })?;

        let dims = var.dimensions();
        if dims.len() < 2 {
            return Err(RasterError::FormatError(format!(
                "Variable '{}' has {} dimensions, need at least 2",
                variable,
                dims.len()
            )));
        }
        if dims.len() > 4 {
            return Err(RasterError::FormatError(format!(
                "Variable '{}' has {} dimensions, at most 4 are supported",
                variable,
                dims.len()
            )));
        }

        let layout = resolve_layout(&file, &var)?;
        let mut band_time = None;
        let mut prefix = Vec::with_capacity(dims.len() - 2);
        for dim in &dims[..dims.len() - 2] {
            let name = dim.name();
            if is_time_name(&name) {
                let (idx, resolved) = pick_time_index(&file, &name, timestamp);
                band_time = resolved;
                prefix.push(idx);
            } else if selector.vertical_dimension.as_deref() == Some(name.as_str()) {
                prefix.push(pick_vertical_index(
                    &file,
                    &name,
                    selector.vertical_value,
                ));
            } else {
                debug!(dimension = %name, "Fixing non-spatial dimension at index 0");
                prefix.push(0);
            }
        }

        let meta = BandMeta {
            bounds: layout.bounds,
            crs: layout.crs.clone(),
            res_x: layout.res_x,
            res_y: layout.res_y,
            width: layout.width,
            height: layout.height,
            flip_y: layout.flip_y,
            units: get_string_attr(&var, "units"),
            timestamp: band_time
                .or(timestamp)
                .or_else(|| parse_filename_timestamp(path)),
        };

        let fill = get_f32_attr(&var, "_FillValue").or_else(|| get_f32_attr(&var, "missing_value"));
        let scale = get_f64_attr(&var, "scale_factor").unwrap_or(1.0);
        let offset = get_f64_attr(&var, "add_offset").unwrap_or(0.0);

        let reader_path = path.to_path_buf();
        let name = variable.to_string();
        let full_height = layout.height;
        let flip = layout.flip_y;
        let reader = Box::new(move |w: PixelWindow| {
            let file = open_file(&reader_path)?;
            let var = file.variable(&name).ok_or_else(|| {
                RasterError::NotFound(format!(
                    "Variable '{}' disappeared from {}",
                    name,
                    reader_path.display()
                ))
            })?;

            // Windows are north-up; a south-up file reads the mirrored
            // row range and reverses afterwards.
            let row_start = if flip { full_height - (w.y + w.height) } else { w.y };
            let y_range = row_start..row_start + w.height;
            let x_range = w.x..w.x + w.width;

            let raw: Vec<f32> = match prefix.len() {
                0 => var.get_values((y_range, x_range)),
                1 => var.get_values((prefix[0]..prefix[0] + 1, y_range, x_range)),
                2 => var.get_values((
                    prefix[0]..prefix[0] + 1,
                    prefix[1]..prefix[1] + 1,
                    y_range,
                    x_range,
                )),
                n => {
                    return Err(RasterError::FormatError(format!(
                        "Unsupported dimensionality: {} leading dimensions",
                        n
                    )))
                }
            }
            .map_err(|e| {
                RasterError::FormatError(format!(
                    "Failed to read '{}' from {}: {}",
                    name,
                    reader_path.display(),
                    e
                ))
            })?;

            let mut values = apply_fill_and_scale(raw, fill, scale, offset);
            if flip && w.height > 1 {
                let mut flipped = Vec::with_capacity(values.len());
                for r in (0..w.height).rev() {
                    flipped.extend_from_slice(&values[r * w.width..(r + 1) * w.width]);
                }
                values = flipped;
            }
            Ok(values)
        });

        Ok(LazyBand::new(meta, window, reader))
    }
}

fn open_file(path: &Path) -> RasterResult<netcdf::File> {
    netcdf::open(path)
        .map_err(|e| RasterError::FormatError(format!("Failed to open {}: {}", path.display(), e)))
}

fn read_magic(path: &Path) -> Option<[u8; 4]> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).ok()?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).ok()?;
    Some(magic)
}

// === Attribute helpers ===

fn get_f32_attr(var: &netcdf::Variable, name: &str) -> Option<f32> {
    var.attribute_value(name)
        .and_then(|v| v.ok())
        .and_then(|v| f32::try_from(v).ok())
}

fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|v| v.ok())
        .and_then(|v| f64::try_from(v).ok())
}

fn get_string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name) {
        Some(Ok(netcdf::AttributeValue::Str(s))) => Some(s),
        _ => None,
    }
}

// === Grid geometry ===

struct GridLayout {
    width: usize,
    height: usize,
    bounds: Bounds,
    res_x: f64,
    res_y: f64,
    flip_y: bool,
    crs: String,
}

fn resolve_layout(file: &netcdf::File, var: &netcdf::Variable) -> RasterResult<GridLayout> {
    let dims = var.dimensions();
    let y_dim = dims[dims.len() - 2].name();
    let x_dim = dims[dims.len() - 1].name();
    let height = dims[dims.len() - 2].len();
    let width = dims[dims.len() - 1].len();
    if width == 0 || height == 0 {
        return Err(RasterError::FormatError(format!(
            "Variable '{}' has an empty grid",
            var.name()
        )));
    }
    let crs = detect_crs(file, var);

    let ys = coord_values_1d(file, &y_dim, LAT_NAMES);
    let xs = coord_values_1d(file, &x_dim, LON_NAMES);
    if let (Some(ys), Some(xs)) = (ys, xs) {
        if ys.len() != height || xs.len() != width {
            return Err(RasterError::FormatError(format!(
                "Coordinate lengths do not match grid {}x{}",
                width, height
            )));
        }
        let res_x = median_step(&xs);
        let res_y = median_step(&ys);
        let (x_min, x_max) = min_max(&xs).ok_or_else(|| {
            RasterError::FormatError(format!("Coordinate '{}' has no finite values", x_dim))
        })?;
        let (y_min, y_max) = min_max(&ys).ok_or_else(|| {
            RasterError::FormatError(format!("Coordinate '{}' has no finite values", y_dim))
        })?;
        return Ok(GridLayout {
            width,
            height,
            bounds: Bounds::new(
                x_min - res_x / 2.0,
                y_min - res_y / 2.0,
                x_max + res_x / 2.0,
                y_max + res_y / 2.0,
            ),
            res_x,
            res_y,
            flip_y: ys[0] < ys[ys.len() - 1],
            crs,
        });
    }

    // Curvilinear grids carry 2-D latitude/longitude auxiliaries.
    let lat2d = coord_values_2d(file, &y_dim, &x_dim, LAT_NAMES);
    let lon2d = coord_values_2d(file, &y_dim, &x_dim, LON_NAMES);
    if let (Some(lat2d), Some(lon2d)) = (lat2d, lon2d) {
        let (x_min, x_max) = min_max(&lon2d).ok_or_else(|| {
            RasterError::FormatError("Longitude auxiliary has no finite values".to_string())
        })?;
        let (y_min, y_max) = min_max(&lat2d).ok_or_else(|| {
            RasterError::FormatError("Latitude auxiliary has no finite values".to_string())
        })?;
        let res_x = if width > 1 { (x_max - x_min) / (width - 1) as f64 } else { 1.0 };
        let res_y = if height > 1 { (y_max - y_min) / (height - 1) as f64 } else { 1.0 };
        let first_row = &lat2d[..width];
        let last_row = &lat2d[(height - 1) * width..];
        return Ok(GridLayout {
            width,
            height,
            bounds: Bounds::new(
                x_min - res_x / 2.0,
                y_min - res_y / 2.0,
                x_max + res_x / 2.0,
                y_max + res_y / 2.0,
            ),
            res_x,
            res_y,
            flip_y: mean(first_row) < mean(last_row),
            crs,
        });
    }

    Err(RasterError::FormatError(format!(
        "No coordinate variables for dimensions '{}'/'{}'",
        y_dim, x_dim
    )))
}

/// 1-D coordinate variable for `dim`: same-named first, then any variable
/// from `aliases` that spans exactly that dimension.
fn coord_values_1d(file: &netcdf::File, dim: &str, aliases: &[&str]) -> Option<Vec<f64>> {
    if let Some(var) = file.variable(dim) {
        if var.dimensions().len() == 1 {
            return var.get_values::<f64, _>(..).ok();
        }
    }
    for var in file.variables() {
        let dims = var.dimensions();
        if dims.len() == 1
            && dims[0].name() == dim
            && aliases.iter().any(|a| var.name().eq_ignore_ascii_case(a))
        {
            return var.get_values::<f64, _>(..).ok();
        }
    }
    None
}

fn coord_values_2d(
    file: &netcdf::File,
    y_dim: &str,
    x_dim: &str,
    aliases: &[&str],
) -> Option<Vec<f64>> {
    for var in file.variables() {
        let dims = var.dimensions();
        if dims.len() == 2
            && dims[0].name() == y_dim
            && dims[1].name() == x_dim
            && aliases.iter().any(|a| var.name().eq_ignore_ascii_case(a))
        {
            return var.get_values::<f64, _>(..).ok();
        }
    }
    None
}

fn detect_crs(file: &netcdf::File, var: &netcdf::Variable) -> String {
    let mut candidates: Vec<String> = Vec::new();
    if let Some(gm) = get_string_attr(var, "grid_mapping") {
        candidates.push(gm);
    }
    candidates.push("crs".to_string());
    candidates.push("spatial_ref".to_string());

    for name in candidates {
        if let Some(crs_var) = file.variable(&name) {
            if let Some(code) = get_f64_attr(&crs_var, "epsg_code") {
                return format!("EPSG:{}", code as i64);
            }
            for attr in ["crs_wkt", "spatial_ref"] {
                if let Some(wkt) = get_string_attr(&crs_var, attr) {
                    if !wkt.is_empty() {
                        return wkt;
                    }
                }
            }
        }
    }
    if let Some(crs) = get_string_attr(var, "crs") {
        return crs;
    }
    "EPSG:4326".to_string()
}

fn looks_spatial(file: &netcdf::File, var: &netcdf::Variable) -> bool {
    let name = var.name();
    let lower = name.to_ascii_lowercase();
    if LAT_NAMES.contains(&lower.as_str())
        || LON_NAMES.contains(&lower.as_str())
        || TIME_NAMES.contains(&lower.as_str())
    {
        return false;
    }
    let dims = var.dimensions();
    if dims.len() < 2 {
        return false;
    }
    let y_dim = dims[dims.len() - 2].name();
    let x_dim = dims[dims.len() - 1].name();
    let y_ok = LAT_NAMES.contains(&y_dim.to_ascii_lowercase().as_str())
        || coord_values_1d(file, &y_dim, LAT_NAMES).is_some()
        || coord_values_2d(file, &y_dim, &x_dim, LAT_NAMES).is_some();
    let x_ok = LON_NAMES.contains(&x_dim.to_ascii_lowercase().as_str())
        || coord_values_1d(file, &x_dim, LON_NAMES).is_some()
        || coord_values_2d(file, &y_dim, &x_dim, LON_NAMES).is_some();
    y_ok && x_ok
}

// === Time handling ===

fn is_time_name(name: &str) -> bool {
    TIME_NAMES.contains(&name.to_ascii_lowercase().as_str())
}

fn time_dimension(var: &netcdf::Variable) -> Option<String> {
    var.dimensions()
        .iter()
        .map(|d| d.name())
        .find(|n| is_time_name(n))
}

fn read_time_coords(file: &netcdf::File, dim: &str) -> Option<Vec<DateTime<Utc>>> {
    let var = file.variable(dim)?;
    let units = get_string_attr(&var, "units")?;
    let values: Vec<f64> = var.get_values(..).ok()?;
    let times: Vec<DateTime<Utc>> = values
        .iter()
        .filter_map(|&v| decode_cf_time(v, &units))
        .collect();
    if times.len() == values.len() {
        Some(times)
    } else {
        None
    }
}

fn pick_time_index(
    file: &netcdf::File,
    dim: &str,
    requested: Option<DateTime<Utc>>,
) -> (usize, Option<DateTime<Utc>>) {
    let times = match read_time_coords(file, dim) {
        Some(times) if !times.is_empty() => times,
        _ => return (0, None),
    };
    let idx = match requested {
        Some(t) => times
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| (**v - t).num_seconds().abs())
            .map(|(i, _)| i)
            .unwrap_or(0),
        None => 0,
    };
    (idx, Some(times[idx]))
}

fn pick_vertical_index(file: &netcdf::File, dim: &str, target: Option<f64>) -> usize {
    let target = match target {
        Some(t) => t,
        None => return 0,
    };
    let coords = match coord_values_1d(file, dim, &[]) {
        Some(c) if !c.is_empty() => c,
        _ => {
            debug!(dimension = %dim, "No coordinate values, using index 0");
            return 0;
        }
    };
    coords
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Decode a CF time value against units of the form `<unit> since <epoch>`.
fn decode_cf_time(value: f64, units: &str) -> Option<DateTime<Utc>> {
    let mut parts = units.splitn(3, ' ');
    let unit = parts.next()?;
    if !parts.next()?.eq_ignore_ascii_case("since") {
        return None;
    }
    let epoch_str = parts.next()?.trim();

    let seconds_per = match unit.to_ascii_lowercase().trim_end_matches('s') {
        "second" | "sec" => 1.0,
        "minute" | "min" => 60.0,
        "hour" | "hr" | "h" => 3600.0,
        "day" | "d" => 86400.0,
        _ => return None,
    };
    let epoch = parse_epoch(epoch_str)?;
    if !value.is_finite() {
        return None;
    }
    Some(epoch + Duration::milliseconds((value * seconds_per * 1000.0) as i64))
}

fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = raw
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim_end_matches(" +00:00")
        .trim_end_matches("+00:00");
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
        }
    }
    let date = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

// === Value decoding ===

fn apply_fill_and_scale(raw: Vec<f32>, fill: Option<f32>, scale: f64, offset: f64) -> Vec<f32> {
    raw.into_iter()
        .map(|v| {
            if v.is_nan() || fill.is_some_and(|f| v == f) {
                f32::NAN
            } else if scale != 1.0 || offset != 0.0 {
                (v as f64 * scale + offset) as f32
            } else {
                v
            }
        })
        .collect()
}

fn median_step(coords: &[f64]) -> f64 {
    let mut deltas: Vec<f64> = coords
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    if deltas.is_empty() {
        return 1.0;
    }
    deltas.sort_by(|a, b| a.total_cmp(b));
    deltas[deltas.len() / 2]
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
