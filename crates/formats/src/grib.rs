//! GRIB2 format plugin (WMO FM 92 Edition 2).
//!
//! Parses messages section-by-section: indicator, identification, grid
//! definition (template 3.0), product definition (template 4.0), data
//! representation (template 5.0 simple packing), bitmap, data. A variable
//! is identified by (short_name, type_of_level, level) because one file may
//! carry the same parameter at many levels.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use raster_common::{Bounds, FileFormat, PixelWindow, RasterError, RasterResult};
use std::sync::Arc;

use crate::plugin::{BandMeta, FormatPlugin, LazyBand, SourceBand, SourceSelector};

const EXTENSIONS: &[&str] = &["grib", "grib2", "grb", "grb2"];

pub struct GribPlugin;

impl GribPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GribPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Regular lat/lon grid geometry (template 3.0), coordinates in degrees at
/// cell centers.
#[derive(Debug, Clone, Copy)]
struct GridInfo {
    ni: usize,
    nj: usize,
    la1: f64,
    lo1: f64,
    la2: f64,
    lo2: f64,
    di: f64,
    dj: f64,
}

impl GridInfo {
    /// Cell-edge bounds, extending the center coordinates by half a cell.
    fn bounds(&self) -> Bounds {
        let (lat_min, lat_max) = if self.la1 <= self.la2 {
            (self.la1, self.la2)
        } else {
            (self.la2, self.la1)
        };
        let (lon_min, lon_max) = if self.lo1 <= self.lo2 {
            (self.lo1, self.lo2)
        } else {
            (self.lo2, self.lo1)
        };
        Bounds::new(
            lon_min - self.di / 2.0,
            lat_min - self.dj / 2.0,
            lon_max + self.di / 2.0,
            lat_max + self.dj / 2.0,
        )
    }

    /// Rows stored south-to-north need flipping to north-up.
    fn flip_y(&self) -> bool {
        self.la1 < self.la2
    }
}

/// Simple-packing parameters (template 5.0).
#[derive(Debug, Clone, Copy)]
struct PackingInfo {
    num_points: usize,
    reference_value: f32,
    binary_scale: i16,
    decimal_scale: i16,
    bits_per_value: u8,
}

/// One parsed message: headers plus a zero-copy slice of the packed data.
#[derive(Debug, Clone)]
struct MessageInfo {
    short_name: String,
    level_type: String,
    level: f64,
    discipline: u8,
    category: u8,
    number: u8,
    valid_time: DateTime<Utc>,
    grid: GridInfo,
    packing: PackingInfo,
    bitmap: Option<Bytes>,
    packed: Bytes,
}

impl MessageInfo {
    fn units(&self) -> Option<String> {
        parameter_units(self.discipline, self.category, self.number).map(|u| u.to_string())
    }

    fn meta(&self) -> BandMeta {
        BandMeta {
            bounds: self.grid.bounds(),
            crs: "EPSG:4326".to_string(),
            res_x: self.grid.di,
            res_y: self.grid.dj,
            width: self.grid.ni,
            height: self.grid.nj,
            flip_y: self.grid.flip_y(),
            units: self.units(),
            timestamp: Some(self.valid_time),
        }
    }
}

impl FormatPlugin for GribPlugin {
    fn format(&self) -> FileFormat {
        FileFormat::Grib
    }

    fn can_handle(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return true;
            }
        }
        matches!(read_magic(path), Some(magic) if &magic == b"GRIB")
    }

    fn list_variables(&self, path: &Path) -> RasterResult<Vec<SourceBand>> {
        let messages = read_messages(path)?;
        let mut seen: BTreeMap<(String, String, String), SourceBand> = BTreeMap::new();
        for msg in &messages {
            let key = (
                msg.short_name.clone(),
                msg.level_type.clone(),
                format!("{:.3}", msg.level),
            );
            seen.entry(key).or_insert_with(|| SourceBand {
                name: msg.short_name.clone(),
                long_name: Some(format!(
                    "{} ({} {})",
                    msg.short_name, msg.level_type, msg.level
                )),
                units: msg.units(),
                dims: vec!["y".to_string(), "x".to_string()],
                shape: vec![msg.grid.nj, msg.grid.ni],
            });
        }
        Ok(seen.into_values().collect())
    }

    fn timestamps(&self, path: &Path, variable: &str) -> RasterResult<Vec<DateTime<Utc>>> {
        let messages = read_messages(path)?;
        let mut times: Vec<DateTime<Utc>> = messages
            .iter()
            .filter(|m| m.short_name == variable)
            .map(|m| m.valid_time)
            .collect();
        if times.is_empty() {
            return Err(RasterError::NotFound(format!(
                "Variable '{}' not found in {}",
                variable,
                path.display()
            )));
        }
        times.sort();
        times.dedup();
        Ok(times)
    }

    fn open_variable(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
        selector: &SourceSelector,
    ) -> RasterResult<LazyBand> {
        let messages = read_messages(path)?;
        let msg = select_message(&messages, variable, timestamp, selector, path)?;
        let meta = msg.meta();
        let reader = make_reader(msg)?;
        Ok(LazyBand::new(meta, window, reader))
    }

    fn metadata(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        selector: &SourceSelector,
    ) -> RasterResult<BandMeta> {
        // Headers only; the packed data slice is never decoded.
        let messages = read_messages(path)?;
        let msg = select_message(&messages, variable, timestamp, selector, path)?;
        Ok(msg.meta())
    }
}

fn read_magic(path: &Path) -> Option<[u8; 4]> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).ok()?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).ok()?;
    Some(magic)
}

fn read_messages(path: &Path) -> RasterResult<Vec<MessageInfo>> {
    let data = std::fs::read(path).map_err(|e| {
        RasterError::FormatError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_messages(&Bytes::from(data))
}

fn parse_messages(data: &Bytes) -> RasterResult<Vec<MessageInfo>> {
    let mut messages = Vec::new();
    let mut offset = 0;
    let mut prev_bitmap: Option<Bytes> = None;

    while offset + 16 <= data.len() {
        if &data[offset..offset + 4] != b"GRIB" {
            // Tolerate index records or padding between messages.
            match data[offset..].windows(4).position(|w| w == b"GRIB") {
                Some(rel) => {
                    offset += rel;
                    continue;
                }
                None => break,
            }
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[offset + 8..offset + 16]);
        let msg_len = u64::from_be_bytes(len_bytes) as usize;
        if msg_len < 16 || offset + msg_len > data.len() {
            return Err(RasterError::FormatError(format!(
                "Truncated GRIB2 message at offset {} (declared {} bytes)",
                offset, msg_len
            )));
        }

        let msg = data.slice(offset..offset + msg_len);
        let parsed = parse_message(&msg, prev_bitmap.take())?;
        prev_bitmap = parsed.bitmap.clone();
        messages.push(parsed);
        offset += msg_len;
    }

    if messages.is_empty() {
        return Err(RasterError::FormatError(
            "No GRIB2 messages found".to_string(),
        ));
    }
    Ok(messages)
}

/// Parse one message. `prev_bitmap` supports bitmap indicator 254
/// ("previously defined bitmap applies").
fn parse_message(msg: &Bytes, prev_bitmap: Option<Bytes>) -> RasterResult<MessageInfo> {
    let discipline = msg[6];
    let edition = msg[7];
    if edition != 2 {
        return Err(RasterError::FormatError(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let mut reference_time = None;
    let mut grid = None;
    let mut product = None;
    let mut packing = None;
    let mut bitmap = None;
    let mut packed = None;

    let mut offset = 16;
    while offset + 5 <= msg.len() {
        if &msg[offset..offset + 4] == b"7777" {
            break;
        }
        let len = u32::from_be_bytes([
            msg[offset],
            msg[offset + 1],
            msg[offset + 2],
            msg[offset + 3],
        ]) as usize;
        if len < 5 || offset + len > msg.len() {
            return Err(RasterError::FormatError(format!(
                "Invalid section length {} at offset {}",
                len, offset
            )));
        }
        let number = msg[offset + 4];
        let body = &msg[offset..offset + len];
        match number {
            1 => reference_time = Some(parse_reference_time(body)?),
            3 => grid = Some(parse_grid_definition(body)?),
            4 => product = Some(parse_product_definition(body)?),
            5 => packing = Some(parse_data_representation(body)?),
            6 => {
                bitmap = match body[5] {
                    255 => None,
                    254 => prev_bitmap.clone(),
                    _ => Some(msg.slice(offset + 6..offset + len)),
                }
            }
            7 => packed = Some(msg.slice(offset + 5..offset + len)),
            _ => {}
        }
        offset += len;
    }

    let reference_time = reference_time
        .ok_or_else(|| RasterError::FormatError("Missing identification section".to_string()))?;
    let grid =
        grid.ok_or_else(|| RasterError::FormatError("Missing grid definition".to_string()))?;
    let product =
        product.ok_or_else(|| RasterError::FormatError("Missing product definition".to_string()))?;
    let packing = packing
        .ok_or_else(|| RasterError::FormatError("Missing data representation".to_string()))?;
    let packed =
        packed.ok_or_else(|| RasterError::FormatError("Missing data section".to_string()))?;

    let valid_time = reference_time + product.forecast_offset;
    Ok(MessageInfo {
        short_name: short_name(
            discipline,
            product.category,
            product.number,
            &product.level_type,
            product.level,
        ),
        level_type: product.level_type,
        level: product.level,
        discipline,
        category: product.category,
        number: product.number,
        valid_time,
        grid,
        packing,
        bitmap,
        packed,
    })
}

/// Section 1: reference time at bytes 12..19 of the section body.
fn parse_reference_time(body: &[u8]) -> RasterResult<DateTime<Utc>> {
    if body.len() < 19 {
        return Err(RasterError::FormatError(
            "Identification section too short".to_string(),
        ));
    }
    let year = u16::from_be_bytes([body[12], body[13]]);
    let (month, day, hour, minute, second) = (body[14], body[15], body[16], body[17], body[18]);
    let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| {
            RasterError::FormatError(format!(
                "Invalid reference time {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ))
        })?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Section 3, template 3.0 (regular lat/lon). Angles are microdegrees.
fn parse_grid_definition(body: &[u8]) -> RasterResult<GridInfo> {
    if body.len() < 14 {
        return Err(RasterError::FormatError(
            "Grid definition section too short".to_string(),
        ));
    }
    let template = u16::from_be_bytes([body[12], body[13]]);
    if template != 0 {
        return Err(RasterError::FormatError(format!(
            "Unsupported grid definition template {}",
            template
        )));
    }
    let gd = &body[14..];
    if gd.len() < 58 {
        return Err(RasterError::FormatError(format!(
            "Template 3.0 needs at least 58 bytes, got {}",
            gd.len()
        )));
    }

    let ni = u32::from_be_bytes([gd[16], gd[17], gd[18], gd[19]]) as usize;
    let nj = u32::from_be_bytes([gd[20], gd[21], gd[22], gd[23]]) as usize;
    let la1 = signed_i32([gd[32], gd[33], gd[34], gd[35]]) as f64 * 1e-6;
    let lo1 = signed_i32([gd[36], gd[37], gd[38], gd[39]]) as f64 * 1e-6;
    let la2 = signed_i32([gd[41], gd[42], gd[43], gd[44]]) as f64 * 1e-6;
    let lo2 = signed_i32([gd[45], gd[46], gd[47], gd[48]]) as f64 * 1e-6;
    let mut di = u32::from_be_bytes([gd[49], gd[50], gd[51], gd[52]]) as f64 * 1e-6;
    let mut dj = u32::from_be_bytes([gd[53], gd[54], gd[55], gd[56]]) as f64 * 1e-6;
    let scanning_mode = gd[57];

    if ni == 0 || nj == 0 {
        return Err(RasterError::FormatError("Empty grid".to_string()));
    }
    // Only +i row-major scanning is supported (the overwhelmingly common
    // layout); j direction is handled by the orientation flip.
    if scanning_mode & 0x80 != 0 || scanning_mode & 0x20 != 0 {
        return Err(RasterError::FormatError(format!(
            "Unsupported scanning mode {:#04x}",
            scanning_mode
        )));
    }

    // Increments may be flagged as not given; derive from the extent.
    if di == 0.0 && ni > 1 {
        di = (lo2 - lo1).abs() / (ni - 1) as f64;
    }
    if dj == 0.0 && nj > 1 {
        dj = (la2 - la1).abs() / (nj - 1) as f64;
    }

    // Normalize 0..360 longitudes to -180..180 where the grid does not
    // cross the antimeridian; global grids keep their native range.
    let (mut w_lo1, mut w_lo2) = (lo1, lo2);
    if w_lo1 > 180.0 {
        w_lo1 -= 360.0;
    }
    if w_lo2 > 180.0 {
        w_lo2 -= 360.0;
    }
    let (lo1, lo2) = if w_lo2 > w_lo1 { (w_lo1, w_lo2) } else { (lo1, lo2) };

    Ok(GridInfo {
        ni,
        nj,
        la1,
        lo1,
        la2,
        lo2,
        di,
        dj,
    })
}

struct ProductInfo {
    category: u8,
    number: u8,
    level_type: String,
    level: f64,
    forecast_offset: Duration,
}

/// Section 4, template 4.0 (analysis/forecast at a horizontal level).
fn parse_product_definition(body: &[u8]) -> RasterResult<ProductInfo> {
    if body.len() < 28 {
        return Err(RasterError::FormatError(
            "Product definition section too short".to_string(),
        ));
    }
    let category = body[9];
    let number = body[10];
    let time_unit = body[17];
    let forecast_value = u32::from_be_bytes([body[18], body[19], body[20], body[21]]) as i64;
    let level_type_code = body[22];
    let scale_factor = signed_i8(body[23]);
    let scaled_value = u32::from_be_bytes([body[24], body[25], body[26], body[27]]);

    let mut level = scaled_value as f64 / 10f64.powi(scale_factor);
    if level_type_code == 100 {
        // Isobaric levels are coded in Pa; the conventional key unit is hPa.
        level /= 100.0;
    }

    Ok(ProductInfo {
        category,
        number,
        level_type: level_type_name(level_type_code),
        level,
        forecast_offset: forecast_duration(time_unit, forecast_value),
    })
}

fn forecast_duration(time_unit: u8, value: i64) -> Duration {
    match time_unit {
        0 => Duration::minutes(value),
        1 => Duration::hours(value),
        2 => Duration::days(value),
        10 => Duration::hours(value * 3),
        11 => Duration::hours(value * 6),
        12 => Duration::hours(value * 12),
        13 => Duration::seconds(value),
        _ => Duration::hours(value),
    }
}

/// Section 5, template 5.0 (simple packing).
fn parse_data_representation(body: &[u8]) -> RasterResult<PackingInfo> {
    if body.len() < 21 {
        return Err(RasterError::FormatError(
            "Data representation section too short".to_string(),
        ));
    }
    let num_points = u32::from_be_bytes([body[5], body[6], body[7], body[8]]) as usize;
    let template = u16::from_be_bytes([body[9], body[10]]);
    if template != 0 {
        return Err(RasterError::FormatError(format!(
            "Unsupported data representation template {}",
            template
        )));
    }
    Ok(PackingInfo {
        num_points,
        reference_value: f32::from_be_bytes([body[11], body[12], body[13], body[14]]),
        binary_scale: signed_i16([body[15], body[16]]),
        decimal_scale: signed_i16([body[17], body[18]]),
        bits_per_value: body[19],
    })
}

/// GRIB2 stores negative integers as sign-and-magnitude, not two's
/// complement: a set high bit flags the sign and the remaining bits hold
/// the magnitude.
fn signed_i32(b: [u8; 4]) -> i64 {
    let raw = u32::from_be_bytes(b);
    if raw & 0x8000_0000 != 0 {
        -((raw & 0x7FFF_FFFF) as i64)
    } else {
        raw as i64
    }
}

fn signed_i16(b: [u8; 2]) -> i16 {
    let raw = u16::from_be_bytes(b);
    if raw & 0x8000 != 0 {
        -((raw & 0x7FFF) as i16)
    } else {
        raw as i16
    }
}

fn signed_i8(b: u8) -> i32 {
    if b & 0x80 != 0 {
        -((b & 0x7F) as i32)
    } else {
        b as i32
    }
}

fn select_message<'a>(
    messages: &'a [MessageInfo],
    variable: &str,
    timestamp: Option<DateTime<Utc>>,
    selector: &SourceSelector,
    path: &Path,
) -> RasterResult<&'a MessageInfo> {
    let candidates: Vec<&MessageInfo> = messages
        .iter()
        .filter(|m| m.short_name == variable)
        .filter(|m| match &selector.vertical_dimension {
            Some(dim) => &m.level_type == dim,
            None => true,
        })
        .filter(|m| match selector.vertical_value {
            Some(v) => (m.level - v).abs() < 1e-6,
            None => true,
        })
        .collect();

    if candidates.is_empty() {
        return Err(RasterError::NotFound(format!(
            "No message for variable '{}' (level {:?}/{:?}) in {}",
            variable,
            selector.vertical_dimension,
            selector.vertical_value,
            path.display()
        )));
    }

    Ok(match timestamp {
        Some(t) => candidates
            .iter()
            .min_by_key(|m| (m.valid_time - t).num_seconds().abs())
            .copied()
            .unwrap_or(candidates[0]),
        None => candidates[0],
    })
}

/// Build the window-reader closure for one message.
///
/// Simple packing gives random access per point, so windows decode only
/// their own values. Bitmapped messages store values for present points
/// only; those are unpacked once up front and windows slice the result.
fn make_reader(
    msg: &MessageInfo,
) -> RasterResult<Box<dyn Fn(PixelWindow) -> RasterResult<Vec<f32>> + Send>> {
    let grid = msg.grid;
    let packing = msg.packing;
    let flip = grid.flip_y();

    if packing.bits_per_value == 0 {
        // Constant field: every value is the reference.
        let value = decode_value(0, &packing);
        return Ok(Box::new(move |w| Ok(vec![value; w.len()])));
    }

    if msg.bitmap.is_none() && packing.num_points != grid.ni * grid.nj {
        // Thinned or reduced grids pack fewer points than ni*nj.
        return Err(RasterError::FormatError(format!(
            "Packed point count {} does not match grid {}x{}",
            packing.num_points, grid.ni, grid.nj
        )));
    }

    if let Some(bitmap) = &msg.bitmap {
        let full = Arc::new(unpack_with_bitmap(
            &msg.packed,
            bitmap,
            &packing,
            grid.ni * grid.nj,
        )?);
        return Ok(Box::new(move |w| {
            let mut out = Vec::with_capacity(w.len());
            for r in 0..w.height {
                let src_row = source_row(w.y + r, grid.nj, flip);
                let start = src_row * grid.ni + w.x;
                out.extend_from_slice(&full[start..start + w.width]);
            }
            Ok(out)
        }));
    }

    let packed = msg.packed.clone();
    Ok(Box::new(move |w| {
        let bits = packing.bits_per_value as usize;
        let mut out = Vec::with_capacity(w.len());
        for r in 0..w.height {
            let src_row = source_row(w.y + r, grid.nj, flip);
            for c in 0..w.width {
                let idx = src_row * grid.ni + w.x + c;
                let raw = extract_bits(&packed, idx * bits, bits)?;
                out.push(decode_value(raw, &packing));
            }
        }
        Ok(out)
    }))
}

fn source_row(north_up_row: usize, nj: usize, flip: bool) -> usize {
    if flip {
        nj - 1 - north_up_row
    } else {
        north_up_row
    }
}

/// Simple packing formula:
/// value = (reference + packed * 2^binary_scale) * 10^(-decimal_scale)
fn decode_value(raw: u32, packing: &PackingInfo) -> f32 {
    let binary_scale = 2.0_f32.powi(packing.binary_scale as i32);
    let decimal_scale = 10.0_f32.powi(-(packing.decimal_scale as i32));
    (packing.reference_value + raw as f32 * binary_scale) * decimal_scale
}

/// Full unpack for bitmapped messages. The packed stream holds values for
/// present points only, so the value cursor advances solely on 1-bits.
/// `grid_points` is ni*nj; `packing.num_points` counts only present values.
fn unpack_with_bitmap(
    packed: &[u8],
    bitmap: &[u8],
    packing: &PackingInfo,
    grid_points: usize,
) -> RasterResult<Vec<f32>> {
    let bits = packing.bits_per_value as usize;
    let mut out = Vec::with_capacity(grid_points);
    let mut value_bit = 0usize;
    for i in 0..grid_points {
        let byte = bitmap.get(i / 8).copied().ok_or_else(|| {
            RasterError::FormatError("Bitmap shorter than grid".to_string())
        })?;
        let present = (byte >> (7 - (i % 8))) & 1 == 1;
        if present {
            let raw = extract_bits(packed, value_bit, bits)?;
            value_bit += bits;
            out.push(decode_value(raw, packing));
        } else {
            out.push(f32::NAN);
        }
    }
    Ok(out)
}

/// MSB-first bit extraction, up to 32 bits.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> RasterResult<u32> {
    if num_bits == 0 || num_bits > 32 {
        return Err(RasterError::FormatError(format!(
            "Invalid bits per value: {}",
            num_bits
        )));
    }
    if start_bit + num_bits > data.len() * 8 {
        return Err(RasterError::FormatError(
            "Packed data too short".to_string(),
        ));
    }

    let mut byte_idx = start_bit / 8;
    let lead = start_bit % 8;
    let mut acc = (data[byte_idx] & (0xFF >> lead)) as u64;
    let mut bits_read = 8 - lead;
    while bits_read < num_bits {
        byte_idx += 1;
        acc = (acc << 8) | data[byte_idx] as u64;
        bits_read += 8;
    }
    Ok((acc >> (bits_read - num_bits)) as u32)
}

/// Short names in the eccodes convention, with the near-surface specials
/// ("2t", "10u") that key most catalog configs. Unknown parameters fall
/// back to a positional code.
fn short_name(discipline: u8, category: u8, number: u8, level_type: &str, level: f64) -> String {
    if discipline == 0 && level_type == "heightAboveGround" {
        let name = match (category, number, level as i64) {
            (0, 0, 2) => Some("2t"),
            (0, 6, 2) => Some("2d"),
            (1, 1, 2) => Some("2r"),
            (2, 2, 10) => Some("10u"),
            (2, 3, 10) => Some("10v"),
            _ => None,
        };
        if let Some(name) = name {
            return name.to_string();
        }
    }

    let name = match (discipline, category, number) {
        // Category 0: Temperature
        (0, 0, 0) => "t",
        (0, 0, 6) => "dpt",
        // Category 1: Moisture
        (0, 1, 0) => "q",
        (0, 1, 1) => "r",
        (0, 1, 3) => "pwat",
        (0, 1, 7) => "prate",
        (0, 1, 8) => "tp",
        // Category 2: Momentum
        (0, 2, 0) => "wdir",
        (0, 2, 1) => "ws",
        (0, 2, 2) => "u",
        (0, 2, 3) => "v",
        (0, 2, 8) => "w",
        (0, 2, 22) => "gust",
        // Category 3: Mass
        (0, 3, 0) => "sp",
        (0, 3, 1) => "msl",
        (0, 3, 5) => "gh",
        // Category 6: Cloud
        (0, 6, 1) => "tcc",
        // Category 7: Stability
        (0, 7, 6) => "cape",
        (0, 7, 7) => "cin",
        // Category 19: Physical atmospheric properties
        (0, 19, 0) => "vis",
        _ => return format!("p{}_{}_{}", discipline, category, number),
    };
    name.to_string()
}

fn parameter_units(discipline: u8, category: u8, number: u8) -> Option<&'static str> {
    match (discipline, category, number) {
        (0, 0, _) => Some("K"),
        (0, 1, 7) => Some("kg m**-2 s**-1"),
        (0, 1, 8) => Some("kg m**-2"),
        (0, 1, 1) => Some("%"),
        (0, 2, 0) => Some("deg"),
        (0, 2, _) => Some("m s**-1"),
        (0, 3, 5) => Some("gpm"),
        (0, 3, _) => Some("Pa"),
        (0, 6, _) => Some("%"),
        (0, 7, 6) | (0, 7, 7) => Some("J kg**-1"),
        (0, 19, 0) => Some("m"),
        _ => None,
    }
}

/// Level type names in the eccodes typeOfLevel convention.
fn level_type_name(code: u8) -> String {
    let name = match code {
        1 => "surface",
        2 => "cloudBase",
        3 => "cloudTop",
        4 => "isothermZero",
        6 => "maxWind",
        7 => "tropopause",
        8 => "nominalTop",
        100 => "isobaricInhPa",
        101 => "meanSea",
        102 => "heightAboveSea",
        103 => "heightAboveGround",
        104 => "sigma",
        105 => "hybrid",
        106 => "depthBelowLand",
        200 => "entireAtmosphere",
        _ => return format!("level{}", code),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bits() {
        let data = vec![0b1011_0101, 0b1100_0011];
        assert_eq!(extract_bits(&data, 0, 2).unwrap(), 0b10);
        assert_eq!(extract_bits(&data, 2, 2).unwrap(), 0b11);
        assert_eq!(extract_bits(&data, 0, 8).unwrap(), 0b1011_0101);
        // Crossing a byte boundary
        assert_eq!(extract_bits(&data, 4, 8).unwrap(), 0b0101_1100);
        assert!(extract_bits(&data, 12, 8).is_err());
    }

    #[test]
    fn test_signed_fields_are_sign_magnitude() {
        // -10.0 degrees in microdegrees: high bit set, magnitude 10_000_000.
        assert_eq!(signed_i32([0x80, 0x98, 0x96, 0x80]), -10_000_000);
        assert_eq!(signed_i32([0x00, 0x98, 0x96, 0x80]), 10_000_000);
        assert_eq!(signed_i16([0x80, 0x04]), -4);
        assert_eq!(signed_i16([0x00, 0x04]), 4);
        assert_eq!(signed_i8(0x82), -2);
        assert_eq!(signed_i8(0x02), 2);
    }

    #[test]
    fn test_decode_value_formula() {
        let packing = PackingInfo {
            num_points: 1,
            reference_value: 250.0,
            binary_scale: -1,
            decimal_scale: 0,
            bits_per_value: 8,
        };
        // (250 + 100 * 2^-1) * 10^0 = 300
        assert_eq!(decode_value(100, &packing), 300.0);
    }

    #[test]
    fn test_unpack_with_bitmap_skips_missing_points() {
        // 4 grid points, bitmap 1010: packed stream carries two 8-bit values.
        let packing = PackingInfo {
            num_points: 2,
            reference_value: 0.0,
            binary_scale: 0,
            decimal_scale: 0,
            bits_per_value: 8,
        };
        let packed = vec![10u8, 20u8];
        let bitmap = vec![0b1010_0000];
        let values = unpack_with_bitmap(&packed, &bitmap, &packing, 4).unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], 10.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 20.0);
        assert!(values[3].is_nan());
    }

    #[test]
    fn test_short_names() {
        assert_eq!(short_name(0, 0, 0, "isobaricInhPa", 850.0), "t");
        assert_eq!(short_name(0, 0, 0, "heightAboveGround", 2.0), "2t");
        assert_eq!(short_name(0, 2, 2, "heightAboveGround", 10.0), "10u");
        assert_eq!(short_name(0, 2, 3, "heightAboveGround", 10.0), "10v");
        assert_eq!(short_name(0, 3, 1, "meanSea", 0.0), "msl");
        assert_eq!(short_name(2, 0, 192, "surface", 0.0), "p2_0_192");
    }

    #[test]
    fn test_level_type_names() {
        assert_eq!(level_type_name(1), "surface");
        assert_eq!(level_type_name(100), "isobaricInhPa");
        assert_eq!(level_type_name(103), "heightAboveGround");
        assert_eq!(level_type_name(199), "level199");
    }

    #[test]
    fn test_grid_bounds_extend_half_cell() {
        let grid = GridInfo {
            ni: 4,
            nj: 4,
            la1: 43.5,
            lo1: 0.5,
            la2: 40.5,
            lo2: 3.5,
            di: 1.0,
            dj: 1.0,
        };
        let b = grid.bounds();
        assert_eq!(b.to_array(), [0.0, 40.0, 4.0, 44.0]);
        assert!(!grid.flip_y());

        let ascending = GridInfo { la1: 40.5, la2: 43.5, ..grid };
        assert!(ascending.flip_y());
    }

    #[test]
    fn test_forecast_duration_units() {
        assert_eq!(forecast_duration(0, 30), Duration::minutes(30));
        assert_eq!(forecast_duration(1, 6), Duration::hours(6));
        assert_eq!(forecast_duration(2, 2), Duration::days(2));
        assert_eq!(forecast_duration(11, 1), Duration::hours(6));
    }
}
