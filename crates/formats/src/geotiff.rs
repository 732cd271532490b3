//! GeoTIFF format plugin.
//!
//! A self-contained reader for classic (non-Big) TIFF with the GeoTIFF
//! georeferencing tags. Supports stripped and tiled layouts, deflate
//! compression, the horizontal predictor, and the common sample formats.
//! Windowed reads decode only the strips or tiles the window touches.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use raster_common::{Bounds, FileFormat, PixelWindow, RasterError, RasterResult};

use crate::plugin::{BandMeta, FormatPlugin, LazyBand, SourceBand, SourceSelector};
use crate::timestamp::parse_filename_timestamp;

const EXTENSIONS: &[&str] = &["tif", "tiff", "gtiff"];

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIG: u16 = 284;
const TAG_PREDICTOR: u16 = 317;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEO_KEY_GEOGRAPHIC_TYPE: u64 = 2048;
const GEO_KEY_PROJECTED_TYPE: u64 = 3072;

pub struct GeotiffPlugin;

impl GeotiffPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeotiffPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatPlugin for GeotiffPlugin {
    fn format(&self) -> FileFormat {
        FileFormat::Geotiff
    }

    fn can_handle(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return true;
            }
        }
        matches!(
            read_magic(path),
            Some([0x49, 0x49, 0x2A, 0x00]) | Some([0x4D, 0x4D, 0x00, 0x2A])
        )
    }

    fn list_variables(&self, path: &Path) -> RasterResult<Vec<SourceBand>> {
        let reader = TiffReader::open(path)?;
        let layout = reader.layout(0)?;
        let bands = (1..=layout.samples_per_pixel)
            .map(|n| SourceBand {
                name: format!("band_{}", n),
                long_name: None,
                units: None,
                dims: vec!["y".to_string(), "x".to_string()],
                shape: vec![layout.height, layout.width],
            })
            .collect();
        Ok(bands)
    }

    fn timestamps(&self, path: &Path, _variable: &str) -> RasterResult<Vec<DateTime<Utc>>> {
        parse_filename_timestamp(path)
            .map(|t| vec![t])
            .ok_or_else(|| {
                RasterError::FormatError(format!(
                    "No timestamp in filename {}",
                    path.display()
                ))
            })
    }

    fn open_variable(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
        selector: &SourceSelector,
    ) -> RasterResult<LazyBand> {
        let reader = Arc::new(TiffReader::open(path)?);
        let layout = Arc::new(reader.layout(0)?);
        let band = resolve_band(variable, selector, layout.samples_per_pixel)?;
        let meta = build_meta(&layout, path, timestamp)?;

        let read_reader = Arc::clone(&reader);
        let read_layout = Arc::clone(&layout);
        let reader_fn = Box::new(move |w: PixelWindow| {
            read_reader.read_window(&read_layout, band, w)
        });
        Ok(LazyBand::new(meta, window, reader_fn))
    }

    fn metadata(
        &self,
        path: &Path,
        variable: &str,
        timestamp: Option<DateTime<Utc>>,
        selector: &SourceSelector,
    ) -> RasterResult<BandMeta> {
        // Header tags only, no block decoding.
        let reader = TiffReader::open(path)?;
        let layout = reader.layout(0)?;
        resolve_band(variable, selector, layout.samples_per_pixel)?;
        build_meta(&layout, path, timestamp)
    }
}

fn read_magic(path: &Path) -> Option<[u8; 4]> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).ok()?;
    Some(magic)
}

/// Bands are addressed as `band_<n>` (1-based); a catalog can also pin the
/// band through the source's band index.
fn resolve_band(
    variable: &str,
    selector: &SourceSelector,
    samples_per_pixel: usize,
) -> RasterResult<usize> {
    let band = match variable.strip_prefix("band_").and_then(|n| n.parse::<usize>().ok()) {
        Some(n) => n,
        None => selector.band_index.unwrap_or(1),
    };
    if band < 1 || band > samples_per_pixel {
        return Err(RasterError::NotFound(format!(
            "Band {} out of range, file has {} band(s)",
            band, samples_per_pixel
        )));
    }
    Ok(band)
}

fn build_meta(
    layout: &IfdLayout,
    path: &Path,
    timestamp: Option<DateTime<Utc>>,
) -> RasterResult<BandMeta> {
    let (sx, sy) = layout.pixel_scale.ok_or_else(|| {
        RasterError::FormatError(format!("{} has no ModelPixelScale tag", path.display()))
    })?;
    let (tie_i, tie_j, tie_x, tie_y) = layout.tiepoint.ok_or_else(|| {
        RasterError::FormatError(format!("{} has no ModelTiepoint tag", path.display()))
    })?;
    if sx <= 0.0 || sy <= 0.0 {
        return Err(RasterError::FormatError(format!(
            "Invalid pixel scale ({}, {})",
            sx, sy
        )));
    }

    let west = tie_x - tie_i * sx;
    let north = tie_y + tie_j * sy;
    let east = west + layout.width as f64 * sx;
    let south = north - layout.height as f64 * sy;

    Ok(BandMeta {
        bounds: Bounds::new(west, south, east, north),
        crs: layout
            .epsg
            .map(|code| format!("EPSG:{}", code))
            .unwrap_or_else(|| "EPSG:4326".to_string()),
        res_x: sx,
        res_y: sy,
        width: layout.width,
        height: layout.height,
        flip_y: false,
        units: None,
        timestamp: timestamp.or_else(|| parse_filename_timestamp(path)),
    })
}

// === TIFF structure ===

#[derive(Debug, Clone)]
enum TagValue {
    Ints(Vec<u64>),
    Floats(Vec<f64>),
    Text(String),
}

type TagMap = BTreeMap<u16, TagValue>;

#[derive(Debug, Clone)]
enum BlockLayout {
    Strips {
        rows_per_strip: usize,
        offsets: Vec<u64>,
        counts: Vec<u64>,
    },
    Tiles {
        tile_width: usize,
        tile_height: usize,
        offsets: Vec<u64>,
        counts: Vec<u64>,
    },
}

#[derive(Debug, Clone)]
struct IfdLayout {
    width: usize,
    height: usize,
    bits: usize,
    sample_format: u16,
    compression: u16,
    predictor: u16,
    samples_per_pixel: usize,
    block: BlockLayout,
    nodata: Option<f32>,
    pixel_scale: Option<(f64, f64)>,
    tiepoint: Option<(f64, f64, f64, f64)>,
    epsg: Option<u32>,
}

struct TiffReader {
    data: Bytes,
    big_endian: bool,
    ifds: Vec<TagMap>,
}

impl TiffReader {
    fn open(path: &Path) -> RasterResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            RasterError::FormatError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(Bytes::from(data))
    }

    fn parse(data: Bytes) -> RasterResult<Self> {
        if data.len() < 8 {
            return Err(RasterError::FormatError("File too short for TIFF".to_string()));
        }
        let big_endian = match &data[0..2] {
            b"II" => false,
            b"MM" => true,
            _ => return Err(RasterError::FormatError("Not a TIFF file".to_string())),
        };
        let mut reader = Self {
            data,
            big_endian,
            ifds: Vec::new(),
        };
        let magic = reader.u16_at(2)?;
        if magic == 43 {
            return Err(RasterError::FormatError("BigTIFF is not supported".to_string()));
        }
        if magic != 42 {
            return Err(RasterError::FormatError(format!(
                "Bad TIFF magic number {}",
                magic
            )));
        }

        let mut offset = reader.u32_at(4)? as usize;
        while offset != 0 {
            let (map, next) = reader.parse_ifd(offset)?;
            reader.ifds.push(map);
            if next as usize == offset || reader.ifds.len() > 64 {
                return Err(RasterError::FormatError("IFD chain loops".to_string()));
            }
            offset = next as usize;
        }
        if reader.ifds.is_empty() {
            return Err(RasterError::FormatError("TIFF has no IFD".to_string()));
        }
        Ok(reader)
    }

    fn parse_ifd(&self, offset: usize) -> RasterResult<(TagMap, u32)> {
        let count = self.u16_at(offset)? as usize;
        let mut map = TagMap::new();
        for i in 0..count {
            let entry = offset + 2 + i * 12;
            let tag = self.u16_at(entry)?;
            let field_type = self.u16_at(entry + 2)?;
            let value_count = self.u32_at(entry + 4)? as usize;
            if let Some(value) = self.parse_entry(entry + 8, field_type, value_count)? {
                map.insert(tag, value);
            }
        }
        let next = self.u32_at(offset + 2 + count * 12)?;
        Ok((map, next))
    }

    fn parse_entry(
        &self,
        value_field: usize,
        field_type: u16,
        count: usize,
    ) -> RasterResult<Option<TagValue>> {
        let elem_size = match field_type {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => return Ok(None),
        };
        let total = elem_size * count;
        let start = if total <= 4 {
            value_field
        } else {
            self.u32_at(value_field)? as usize
        };
        self.bytes_at(start, total)?;

        let value = match field_type {
            2 => {
                let raw = self.bytes_at(start, total)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                TagValue::Text(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            1 | 6 | 7 => {
                let raw = self.bytes_at(start, total)?;
                TagValue::Ints(raw.iter().map(|&b| b as u64).collect())
            }
            3 | 8 => {
                let mut values = Vec::with_capacity(count);
                for i in 0..count {
                    values.push(self.u16_at(start + i * 2)? as u64);
                }
                TagValue::Ints(values)
            }
            4 | 9 => {
                let mut values = Vec::with_capacity(count);
                for i in 0..count {
                    values.push(self.u32_at(start + i * 4)? as u64);
                }
                TagValue::Ints(values)
            }
            11 => {
                let mut values = Vec::with_capacity(count);
                for i in 0..count {
                    values.push(self.f32_at(start + i * 4)? as f64);
                }
                TagValue::Floats(values)
            }
            12 => {
                let mut values = Vec::with_capacity(count);
                for i in 0..count {
                    values.push(self.f64_at(start + i * 8)?);
                }
                TagValue::Floats(values)
            }
            5 | 10 => {
                let mut values = Vec::with_capacity(count);
                for i in 0..count {
                    let num = self.u32_at(start + i * 8)? as f64;
                    let den = self.u32_at(start + i * 8 + 4)? as f64;
                    values.push(if den == 0.0 { f64::NAN } else { num / den });
                }
                TagValue::Floats(values)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn layout(&self, ifd: usize) -> RasterResult<IfdLayout> {
        let map = self.ifds.get(ifd).ok_or_else(|| {
            RasterError::FormatError(format!("TIFF has no IFD {}", ifd))
        })?;
        build_layout(map)
    }

    /// Read one band of a north-up window, decoding only touched blocks.
    fn read_window(
        &self,
        layout: &IfdLayout,
        band: usize,
        w: PixelWindow,
    ) -> RasterResult<Vec<f32>> {
        if w.x + w.width > layout.width || w.y + w.height > layout.height {
            return Err(RasterError::FormatError(format!(
                "Window {}x{}+{}+{} exceeds raster {}x{}",
                w.width, w.height, w.x, w.y, layout.width, layout.height
            )));
        }
        let band = band - 1;
        let mut out = vec![0f32; w.len()];

        match &layout.block {
            BlockLayout::Strips {
                rows_per_strip,
                offsets,
                counts,
            } => {
                let rps = (*rows_per_strip).max(1);
                let first = w.y / rps;
                let last = (w.y + w.height - 1) / rps;
                for strip in first..=last {
                    let (offset, count) = block_location(offsets, counts, strip)?;
                    let decoded =
                        self.decode_block(offset, count, layout, layout.width)?;
                    let strip_top = strip * rps;
                    let strip_rows = rps.min(layout.height - strip_top);
                    let row_lo = w.y.max(strip_top);
                    let row_hi = (w.y + w.height).min(strip_top + strip_rows);
                    for row in row_lo..row_hi {
                        for col in w.x..w.x + w.width {
                            let sample =
                                ((row - strip_top) * layout.width + col)
                                    * layout.samples_per_pixel
                                    + band;
                            out[(row - w.y) * w.width + (col - w.x)] =
                                self.sample_to_f32(&decoded, sample, layout)?;
                        }
                    }
                }
            }
            BlockLayout::Tiles {
                tile_width,
                tile_height,
                offsets,
                counts,
            } => {
                let (tw, th) = (*tile_width, *tile_height);
                let tiles_across = layout.width.div_ceil(tw);
                let tr_first = w.y / th;
                let tr_last = (w.y + w.height - 1) / th;
                let tc_first = w.x / tw;
                let tc_last = (w.x + w.width - 1) / tw;
                for tr in tr_first..=tr_last {
                    for tc in tc_first..=tc_last {
                        let tile = tr * tiles_across + tc;
                        let (offset, count) = block_location(offsets, counts, tile)?;
                        let decoded = self.decode_block(offset, count, layout, tw)?;
                        let (top, left) = (tr * th, tc * tw);
                        let row_lo = w.y.max(top);
                        let row_hi = (w.y + w.height).min(top + th).min(layout.height);
                        let col_lo = w.x.max(left);
                        let col_hi = (w.x + w.width).min(left + tw).min(layout.width);
                        for row in row_lo..row_hi {
                            for col in col_lo..col_hi {
                                let sample = ((row - top) * tw + (col - left))
                                    * layout.samples_per_pixel
                                    + band;
                                out[(row - w.y) * w.width + (col - w.x)] =
                                    self.sample_to_f32(&decoded, sample, layout)?;
                            }
                        }
                    }
                }
            }
        }

        if let Some(nodata) = layout.nodata {
            for v in &mut out {
                if *v == nodata || (nodata.is_nan() && v.is_nan()) {
                    *v = f32::NAN;
                }
            }
        }
        Ok(out)
    }

    fn decode_block(
        &self,
        offset: u64,
        count: u64,
        layout: &IfdLayout,
        block_width: usize,
    ) -> RasterResult<Vec<u8>> {
        let raw = self.bytes_at(offset as usize, count as usize)?;
        let mut data = match layout.compression {
            1 => raw.to_vec(),
            8 | 32946 => {
                let mut decoder = ZlibDecoder::new(raw);
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf).map_err(|e| {
                    RasterError::FormatError(format!("Deflate decode failed: {}", e))
                })?;
                buf
            }
            c => {
                return Err(RasterError::FormatError(format!(
                    "Unsupported TIFF compression {}",
                    c
                )))
            }
        };

        match layout.predictor {
            1 => {}
            2 => {
                if layout.sample_format == 3 {
                    return Err(RasterError::FormatError(
                        "Horizontal predictor on float samples is not supported".to_string(),
                    ));
                }
                undo_horizontal_predictor(
                    &mut data,
                    block_width,
                    layout.samples_per_pixel,
                    layout.bits,
                    self.big_endian,
                );
            }
            3 => {
                return Err(RasterError::FormatError(
                    "Floating point predictor is not supported".to_string(),
                ))
            }
            p => {
                return Err(RasterError::FormatError(format!(
                    "Unknown TIFF predictor {}",
                    p
                )))
            }
        }
        Ok(data)
    }

    fn sample_to_f32(&self, data: &[u8], idx: usize, layout: &IfdLayout) -> RasterResult<f32> {
        let size = layout.bits / 8;
        let start = idx * size;
        let bytes = data.get(start..start + size).ok_or_else(|| {
            RasterError::FormatError("Sample index past end of decoded block".to_string())
        })?;
        let be = self.big_endian;
        let value = match (layout.sample_format, layout.bits) {
            (1, 8) => bytes[0] as f32,
            (1, 16) => get_u16(bytes, be) as f32,
            (1, 32) => get_u32(bytes, be) as f32,
            (2, 8) => bytes[0] as i8 as f32,
            (2, 16) => get_u16(bytes, be) as i16 as f32,
            (2, 32) => get_u32(bytes, be) as i32 as f32,
            (3, 32) => f32::from_bits(get_u32(bytes, be)),
            (3, 64) => f64::from_bits(get_u64(bytes, be)) as f32,
            (f, b) => {
                return Err(RasterError::FormatError(format!(
                    "Unsupported sample format {} with {} bits",
                    f, b
                )))
            }
        };
        Ok(value)
    }

    fn bytes_at(&self, offset: usize, len: usize) -> RasterResult<&[u8]> {
        self.data.get(offset..offset + len).ok_or_else(|| {
            RasterError::FormatError(format!(
                "Truncated TIFF: need {} bytes at offset {}",
                len, offset
            ))
        })
    }

    fn u16_at(&self, offset: usize) -> RasterResult<u16> {
        let b = self.bytes_at(offset, 2)?;
        Ok(get_u16(b, self.big_endian))
    }

    fn u32_at(&self, offset: usize) -> RasterResult<u32> {
        let b = self.bytes_at(offset, 4)?;
        Ok(get_u32(b, self.big_endian))
    }

    fn f32_at(&self, offset: usize) -> RasterResult<f32> {
        Ok(f32::from_bits(self.u32_at(offset)?))
    }

    fn f64_at(&self, offset: usize) -> RasterResult<f64> {
        let b = self.bytes_at(offset, 8)?;
        Ok(f64::from_bits(get_u64(b, self.big_endian)))
    }
}

fn get_u16(b: &[u8], big_endian: bool) -> u16 {
    if big_endian {
        u16::from_be_bytes([b[0], b[1]])
    } else {
        u16::from_le_bytes([b[0], b[1]])
    }
}

fn get_u32(b: &[u8], big_endian: bool) -> u32 {
    if big_endian {
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    } else {
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

fn get_u64(b: &[u8], big_endian: bool) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[..8]);
    if big_endian {
        u64::from_be_bytes(bytes)
    } else {
        u64::from_le_bytes(bytes)
    }
}

fn block_location(offsets: &[u64], counts: &[u64], index: usize) -> RasterResult<(u64, u64)> {
    match (offsets.get(index), counts.get(index)) {
        (Some(&o), Some(&c)) => Ok((o, c)),
        _ => Err(RasterError::FormatError(format!(
            "Missing block {} in offset table",
            index
        ))),
    }
}

fn undo_horizontal_predictor(
    data: &mut [u8],
    width: usize,
    samples_per_pixel: usize,
    bits: usize,
    big_endian: bool,
) {
    let bytes_per = bits / 8;
    let row_samples = width * samples_per_pixel;
    let row_bytes = row_samples * bytes_per;
    for row in data.chunks_exact_mut(row_bytes) {
        match bytes_per {
            1 => {
                for i in samples_per_pixel..row_samples {
                    row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
                }
            }
            2 => {
                for i in samples_per_pixel..row_samples {
                    let prev = get_u16(&row[(i - samples_per_pixel) * 2..], big_endian);
                    let cur = get_u16(&row[i * 2..], big_endian);
                    let sum = cur.wrapping_add(prev);
                    let out = if big_endian {
                        sum.to_be_bytes()
                    } else {
                        sum.to_le_bytes()
                    };
                    row[i * 2..i * 2 + 2].copy_from_slice(&out);
                }
            }
            4 => {
                for i in samples_per_pixel..row_samples {
                    let prev = get_u32(&row[(i - samples_per_pixel) * 4..], big_endian);
                    let cur = get_u32(&row[i * 4..], big_endian);
                    let sum = cur.wrapping_add(prev);
                    let out = if big_endian {
                        sum.to_be_bytes()
                    } else {
                        sum.to_le_bytes()
                    };
                    row[i * 4..i * 4 + 4].copy_from_slice(&out);
                }
            }
            _ => {}
        }
    }
}

// === Tag interpretation ===

fn int_tag(map: &TagMap, tag: u16) -> Option<u64> {
    match map.get(&tag) {
        Some(TagValue::Ints(v)) => v.first().copied(),
        _ => None,
    }
}

fn ints_tag(map: &TagMap, tag: u16) -> Option<&[u64]> {
    match map.get(&tag) {
        Some(TagValue::Ints(v)) => Some(v),
        _ => None,
    }
}

fn floats_tag(map: &TagMap, tag: u16) -> Option<&[f64]> {
    match map.get(&tag) {
        Some(TagValue::Floats(v)) => Some(v),
        _ => None,
    }
}

fn text_tag(map: &TagMap, tag: u16) -> Option<&str> {
    match map.get(&tag) {
        Some(TagValue::Text(s)) => Some(s),
        _ => None,
    }
}

fn build_layout(map: &TagMap) -> RasterResult<IfdLayout> {
    let width = int_tag(map, TAG_IMAGE_WIDTH)
        .ok_or_else(|| RasterError::FormatError("Missing ImageWidth tag".to_string()))?
        as usize;
    let height = int_tag(map, TAG_IMAGE_LENGTH)
        .ok_or_else(|| RasterError::FormatError("Missing ImageLength tag".to_string()))?
        as usize;
    if width == 0 || height == 0 {
        return Err(RasterError::FormatError("Empty raster".to_string()));
    }

    let samples_per_pixel = int_tag(map, TAG_SAMPLES_PER_PIXEL).unwrap_or(1) as usize;
    // Sample offsets assume chunky interleave throughout.
    if int_tag(map, TAG_PLANAR_CONFIG).unwrap_or(1) != 1 && samples_per_pixel > 1 {
        return Err(RasterError::FormatError(
            "Planar sample layout is not supported".to_string(),
        ));
    }
    let bits_list = ints_tag(map, TAG_BITS_PER_SAMPLE).unwrap_or(&[8]);
    if bits_list.windows(2).any(|w| w[0] != w[1]) {
        return Err(RasterError::FormatError(
            "Mixed bits per sample are not supported".to_string(),
        ));
    }
    let bits = bits_list[0] as usize;
    if !matches!(bits, 8 | 16 | 32 | 64) {
        return Err(RasterError::FormatError(format!(
            "Unsupported bit depth {}",
            bits
        )));
    }

    let format_list = ints_tag(map, TAG_SAMPLE_FORMAT).unwrap_or(&[1]);
    if format_list.windows(2).any(|w| w[0] != w[1]) {
        return Err(RasterError::FormatError(
            "Mixed sample formats are not supported".to_string(),
        ));
    }
    let sample_format = format_list[0] as u16;

    let block = if map.contains_key(&TAG_TILE_WIDTH) {
        let tile_width = int_tag(map, TAG_TILE_WIDTH).unwrap_or(0) as usize;
        let tile_height = int_tag(map, TAG_TILE_LENGTH).unwrap_or(0) as usize;
        if tile_width == 0 || tile_height == 0 {
            return Err(RasterError::FormatError("Bad tile dimensions".to_string()));
        }
        BlockLayout::Tiles {
            tile_width,
            tile_height,
            offsets: ints_tag(map, TAG_TILE_OFFSETS)
                .ok_or_else(|| RasterError::FormatError("Missing TileOffsets".to_string()))?
                .to_vec(),
            counts: ints_tag(map, TAG_TILE_BYTE_COUNTS)
                .ok_or_else(|| RasterError::FormatError("Missing TileByteCounts".to_string()))?
                .to_vec(),
        }
    } else {
        BlockLayout::Strips {
            rows_per_strip: int_tag(map, TAG_ROWS_PER_STRIP).unwrap_or(height as u64) as usize,
            offsets: ints_tag(map, TAG_STRIP_OFFSETS)
                .ok_or_else(|| RasterError::FormatError("Missing StripOffsets".to_string()))?
                .to_vec(),
            counts: ints_tag(map, TAG_STRIP_BYTE_COUNTS)
                .ok_or_else(|| RasterError::FormatError("Missing StripByteCounts".to_string()))?
                .to_vec(),
        }
    };

    let pixel_scale = floats_tag(map, TAG_MODEL_PIXEL_SCALE)
        .filter(|v| v.len() >= 2)
        .map(|v| (v[0], v[1]));
    let tiepoint = floats_tag(map, TAG_MODEL_TIEPOINT)
        .filter(|v| v.len() >= 6)
        .map(|v| (v[0], v[1], v[3], v[4]));

    Ok(IfdLayout {
        width,
        height,
        bits,
        sample_format,
        compression: int_tag(map, TAG_COMPRESSION).unwrap_or(1) as u16,
        predictor: int_tag(map, TAG_PREDICTOR).unwrap_or(1) as u16,
        samples_per_pixel,
        block,
        nodata: parse_nodata(text_tag(map, TAG_GDAL_NODATA)),
        pixel_scale,
        tiepoint,
        epsg: parse_geo_keys(ints_tag(map, TAG_GEO_KEY_DIRECTORY)),
    })
}

fn parse_nodata(text: Option<&str>) -> Option<f32> {
    let text = text?.trim();
    if text.eq_ignore_ascii_case("nan") {
        return Some(f32::NAN);
    }
    text.parse::<f32>().ok()
}

/// GeoKeyDirectory: a header quadruple then (key, location, count, value)
/// entries. Keys stored inline have location 0. The projected CS key wins
/// over the geographic one when both are present.
fn parse_geo_keys(directory: Option<&[u64]>) -> Option<u32> {
    let directory = directory?;
    if directory.len() < 4 {
        return None;
    }
    let num_keys = directory[3] as usize;
    let mut geographic = None;
    let mut projected = None;
    for i in 0..num_keys {
        let entry = directory.get(4 + i * 4..8 + i * 4)?;
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GEO_KEY_PROJECTED_TYPE => projected = Some(value as u32),
            GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(value as u32),
            _ => {}
        }
    }
    // 32767 means user-defined, which carries no EPSG code.
    projected.or(geographic).filter(|&code| code != 32767 && code != 0)
}
