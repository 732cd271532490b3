//! Cloud-optimized GeoTIFF writer.
//!
//! Produces a classic little-endian TIFF with 256x256 deflate-compressed
//! float32 tiles, internal overviews halved down to tile size, georeferencing
//! tags on the full-resolution directory, and NaN declared as the nodata
//! value. All directories sit at the front of the file so a ranged reader
//! can plan its requests from the first fetch.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use raster_common::{Bounds, RasterError, RasterResult};

pub const TILE_SIZE: usize = 256;

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_DOUBLE: u16 = 12;

const COMPRESSION_DEFLATE: u16 = 8;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_TYPE: u16 = 3072;

/// Overview decimation factors for a raster: powers of two, kept while the
/// reduced image still spans at least one full tile.
pub fn overview_factors(width: usize, height: usize) -> Vec<u32> {
    let mut factors = Vec::new();
    let mut factor = 2usize;
    while width.min(height) / factor >= TILE_SIZE {
        factors.push(factor as u32);
        factor *= 2;
    }
    factors
}

/// Write a single-band float32 raster as a cloud-optimized GeoTIFF.
pub fn write_cog(
    data: &[f32],
    width: usize,
    height: usize,
    bounds: &Bounds,
    crs: &str,
) -> RasterResult<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(RasterError::InternalError(
            "Cannot write an empty raster".to_string(),
        ));
    }
    if data.len() != width * height {
        return Err(RasterError::InternalError(format!(
            "Raster is {} values, expected {} for {}x{}",
            data.len(),
            width * height,
            width,
            height
        )));
    }

    // Full resolution first, then each overview halved from the previous.
    let mut levels = vec![build_level(data, width, height)?];
    let mut reduced: Option<(Vec<f32>, usize, usize)> = None;
    for _ in overview_factors(width, height) {
        let next = match &reduced {
            Some((d, w, h)) => downsample_2x(d, *w, *h),
            None => downsample_2x(data, width, height),
        };
        levels.push(build_level(&next.0, next.1, next.2)?);
        reduced = Some(next);
    }

    // First pass sizes every directory so tile data offsets are known,
    // second pass serializes with the real offsets filled in.
    let mut cursor = 8usize;
    let mut dir_offsets = Vec::with_capacity(levels.len());
    for (i, level) in levels.iter().enumerate() {
        let probe = build_ifd(level, i > 0, bounds, crs, &vec![0; level.tiles.len()]);
        dir_offsets.push(cursor);
        cursor += probe.directory_size() + probe.external_size();
    }
    let mut tile_offsets: Vec<Vec<u32>> = Vec::with_capacity(levels.len());
    for level in &levels {
        let mut offsets = Vec::with_capacity(level.tiles.len());
        for tile in &level.tiles {
            offsets.push(cursor as u32);
            cursor += tile.len() + tile.len() % 2;
        }
        tile_offsets.push(offsets);
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&(dir_offsets[0] as u32).to_le_bytes());

    for (i, level) in levels.iter().enumerate() {
        let next = if i + 1 < levels.len() {
            dir_offsets[i + 1] as u32
        } else {
            0
        };
        let mut ifd = build_ifd(level, i > 0, bounds, crs, &tile_offsets[i]);
        ifd.write(&mut out, next);
    }
    for level in &levels {
        for tile in &level.tiles {
            out.extend_from_slice(tile);
            if tile.len() % 2 == 1 {
                out.push(0);
            }
        }
    }
    Ok(out)
}

struct Level {
    width: usize,
    height: usize,
    /// Deflate-compressed tiles in row-major tile order.
    tiles: Vec<Vec<u8>>,
}

fn build_level(data: &[f32], width: usize, height: usize) -> RasterResult<Level> {
    let across = width.div_ceil(TILE_SIZE);
    let down = height.div_ceil(TILE_SIZE);
    let mut tiles = Vec::with_capacity(across * down);
    for tile_row in 0..down {
        for tile_col in 0..across {
            let mut tile = vec![f32::NAN; TILE_SIZE * TILE_SIZE];
            let x0 = tile_col * TILE_SIZE;
            let run = TILE_SIZE.min(width - x0);
            for y in 0..TILE_SIZE {
                let src_y = tile_row * TILE_SIZE + y;
                if src_y >= height {
                    break;
                }
                let src = src_y * width + x0;
                tile[y * TILE_SIZE..y * TILE_SIZE + run]
                    .copy_from_slice(&data[src..src + run]);
            }

            let mut raw = Vec::with_capacity(tile.len() * 4);
            for v in &tile {
                raw.extend_from_slice(&v.to_le_bytes());
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            let compressed = encoder
                .write_all(&raw)
                .and_then(|_| encoder.finish())
                .map_err(|e| {
                    RasterError::InternalError(format!("Tile compression failed: {e}"))
                })?;
            tiles.push(compressed);
        }
    }
    Ok(Level {
        width,
        height,
        tiles,
    })
}

/// Halve a raster with a 2x2 mean that ignores NaN. Cells with no valid
/// source pixels stay NaN.
fn downsample_2x(data: &[f32], width: usize, height: usize) -> (Vec<f32>, usize, usize) {
    let out_w = width.div_ceil(2);
    let out_h = height.div_ceil(2);
    let mut out = vec![f32::NAN; out_w * out_h];
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0.0f64;
            let mut count = 0u32;
            for dy in 0..2 {
                let y = oy * 2 + dy;
                if y >= height {
                    continue;
                }
                for dx in 0..2 {
                    let x = ox * 2 + dx;
                    if x >= width {
                        continue;
                    }
                    let v = data[y * width + x];
                    if !v.is_nan() {
                        sum += v as f64;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                out[oy * out_w + ox] = (sum / count as f64) as f32;
            }
        }
    }
    (out, out_w, out_h)
}

fn build_ifd(
    level: &Level,
    overview: bool,
    bounds: &Bounds,
    crs: &str,
    tile_offsets: &[u32],
) -> IfdBuilder {
    let mut ifd = IfdBuilder::new();
    if overview {
        ifd.long(TAG_NEW_SUBFILE_TYPE, 1);
    }
    ifd.long(TAG_IMAGE_WIDTH, level.width as u32);
    ifd.long(TAG_IMAGE_LENGTH, level.height as u32);
    ifd.short(TAG_BITS_PER_SAMPLE, 32);
    ifd.short(TAG_COMPRESSION, COMPRESSION_DEFLATE);
    ifd.short(TAG_PHOTOMETRIC, 1);
    ifd.short(TAG_SAMPLES_PER_PIXEL, 1);
    ifd.short(TAG_TILE_WIDTH, TILE_SIZE as u16);
    ifd.short(TAG_TILE_LENGTH, TILE_SIZE as u16);
    ifd.longs(TAG_TILE_OFFSETS, tile_offsets);
    let counts: Vec<u32> = level.tiles.iter().map(|t| t.len() as u32).collect();
    ifd.longs(TAG_TILE_BYTE_COUNTS, &counts);
    ifd.short(TAG_SAMPLE_FORMAT, SAMPLE_FORMAT_FLOAT);
    if !overview {
        let sx = (bounds.east - bounds.west) / level.width as f64;
        let sy = (bounds.north - bounds.south) / level.height as f64;
        ifd.doubles(TAG_MODEL_PIXEL_SCALE, &[sx, sy, 0.0]);
        ifd.doubles(
            TAG_MODEL_TIEPOINT,
            &[0.0, 0.0, 0.0, bounds.west, bounds.north, 0.0],
        );
        ifd.shorts(TAG_GEO_KEY_DIRECTORY, &geo_key_directory(crs));
        ifd.ascii(TAG_GDAL_NODATA, "nan");
    }
    ifd
}

/// GeoKey directory binding the raster to an EPSG coordinate system.
/// Geographic codes live in the 4xxx block; everything else is treated
/// as projected.
fn geo_key_directory(crs: &str) -> Vec<u16> {
    let code = parse_epsg(crs);
    let geographic = (4000..=4999).contains(&code);
    let (model_type, cs_key) = if geographic {
        (2, GEO_KEY_GEOGRAPHIC_TYPE)
    } else {
        (1, GEO_KEY_PROJECTED_TYPE)
    };
    vec![
        1, 1, 0, 3, // version, revision 1.0, key count
        1024, 0, 1, model_type, // GTModelType
        1025, 0, 1, 1, // GTRasterType: PixelIsArea
        cs_key, 0, 1, code,
    ]
}

fn parse_epsg(crs: &str) -> u16 {
    let trimmed = crs.trim();
    trimmed
        .strip_prefix("EPSG:")
        .or_else(|| trimmed.strip_prefix("epsg:"))
        .and_then(|code| code.parse().ok())
        .unwrap_or(4326)
}

struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    /// Little-endian value bytes, spilled after the directory when over
    /// four bytes.
    payload: Vec<u8>,
}

struct IfdBuilder {
    entries: Vec<IfdEntry>,
}

impl IfdBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn push(&mut self, tag: u16, field_type: u16, count: u32, payload: Vec<u8>) {
        self.entries.push(IfdEntry {
            tag,
            field_type,
            count,
            payload,
        });
    }

    fn short(&mut self, tag: u16, value: u16) {
        self.push(tag, TYPE_SHORT, 1, value.to_le_bytes().to_vec());
    }

    fn shorts(&mut self, tag: u16, values: &[u16]) {
        let mut payload = Vec::with_capacity(values.len() * 2);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        self.push(tag, TYPE_SHORT, values.len() as u32, payload);
    }

    fn long(&mut self, tag: u16, value: u32) {
        self.push(tag, TYPE_LONG, 1, value.to_le_bytes().to_vec());
    }

    fn longs(&mut self, tag: u16, values: &[u32]) {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        self.push(tag, TYPE_LONG, values.len() as u32, payload);
    }

    fn doubles(&mut self, tag: u16, values: &[f64]) {
        let mut payload = Vec::with_capacity(values.len() * 8);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        self.push(tag, TYPE_DOUBLE, values.len() as u32, payload);
    }

    fn ascii(&mut self, tag: u16, text: &str) {
        let mut payload = text.as_bytes().to_vec();
        payload.push(0);
        self.push(tag, TYPE_ASCII, payload.len() as u32, payload);
    }

    fn directory_size(&self) -> usize {
        2 + self.entries.len() * 12 + 4
    }

    fn external_size(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.payload.len() > 4)
            .map(|e| e.payload.len() + e.payload.len() % 2)
            .sum()
    }

    /// Append the directory at the current end of `out`, spilled values
    /// directly behind it, chaining to `next_ifd`.
    fn write(&mut self, out: &mut Vec<u8>, next_ifd: u32) {
        self.entries.sort_by_key(|e| e.tag);
        let mut ext_cursor = out.len() + self.directory_size();
        let mut ext_data = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.tag.to_le_bytes());
            out.extend_from_slice(&entry.field_type.to_le_bytes());
            out.extend_from_slice(&entry.count.to_le_bytes());
            if entry.payload.len() <= 4 {
                let mut value = [0u8; 4];
                value[..entry.payload.len()].copy_from_slice(&entry.payload);
                out.extend_from_slice(&value);
            } else {
                out.extend_from_slice(&(ext_cursor as u32).to_le_bytes());
                ext_data.extend_from_slice(&entry.payload);
                ext_cursor += entry.payload.len();
                if entry.payload.len() % 2 == 1 {
                    ext_data.push(0);
                    ext_cursor += 1;
                }
            }
        }
        out.extend_from_slice(&next_ifd.to_le_bytes());
        out.extend_from_slice(&ext_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overview_factors() {
        assert!(overview_factors(300, 200).is_empty());
        assert_eq!(overview_factors(1024, 512), vec![2]);
        assert_eq!(overview_factors(2048, 2048), vec![2, 4, 8]);
    }

    #[test]
    fn test_downsample_averages_and_skips_nan() {
        let data = [1.0f32, f32::NAN, 3.0, f32::NAN];
        let (out, w, h) = downsample_2x(&data, 2, 2);
        assert_eq!((w, h), (1, 1));
        assert_eq!(out[0], 2.0);

        let all_nan = [f32::NAN; 4];
        let (out, _, _) = downsample_2x(&all_nan, 2, 2);
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_downsample_odd_dimensions() {
        // 3x3 grid of 1..9; the lone corner pixel survives unchanged.
        let data: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let (out, w, h) = downsample_2x(&data, 3, 3);
        assert_eq!((w, h), (2, 2));
        assert_eq!(out[0], 3.0); // mean of 1,2,4,5
        assert_eq!(out[1], 4.5); // mean of 3,6
        assert_eq!(out[3], 9.0);
    }

    #[test]
    fn test_header_and_first_directory() {
        let data = vec![1.5f32; 4 * 3];
        let bounds = Bounds::new(0.0, 40.0, 4.0, 43.0);
        let cog = write_cog(&data, 4, 3, &bounds, "EPSG:4326").unwrap();

        assert_eq!(&cog[..2], b"II");
        assert_eq!(u16::from_le_bytes([cog[2], cog[3]]), 42);
        assert_eq!(u32::from_le_bytes([cog[4], cog[5], cog[6], cog[7]]), 8);
        // Entry count lives right at the first directory.
        let entries = u16::from_le_bytes([cog[8], cog[9]]);
        assert_eq!(entries, 15);
    }

    #[test]
    fn test_small_raster_has_no_overviews() {
        let data = vec![0.0f32; 10 * 10];
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
        let cog = write_cog(&data, 10, 10, &bounds, "EPSG:4326").unwrap();
        // Single directory chains to zero: next-IFD pointer sits after
        // the 15 entries.
        let next_at = 8 + 2 + 15 * 12;
        let next = u32::from_le_bytes([
            cog[next_at],
            cog[next_at + 1],
            cog[next_at + 2],
            cog[next_at + 3],
        ]);
        assert_eq!(next, 0);
    }

    #[test]
    fn test_geo_key_directory_projected_vs_geographic() {
        let geographic = geo_key_directory("EPSG:4326");
        assert_eq!(&geographic[4..8], &[1024, 0, 1, 2]);
        assert_eq!(&geographic[12..16], &[2048, 0, 1, 4326]);

        let projected = geo_key_directory("EPSG:3857");
        assert_eq!(&projected[4..8], &[1024, 0, 1, 1]);
        assert_eq!(&projected[12..16], &[3072, 0, 1, 3857]);
    }

    #[test]
    fn test_parse_epsg() {
        assert_eq!(parse_epsg("EPSG:3857"), 3857);
        assert_eq!(parse_epsg("epsg:32633"), 32633);
        assert_eq!(parse_epsg("unknown"), 4326);
    }

    #[test]
    fn test_rejects_bad_input() {
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
        assert!(write_cog(&[0.0; 3], 2, 2, &bounds, "EPSG:4326").is_err());
        assert!(write_cog(&[], 0, 0, &bounds, "EPSG:4326").is_err());
    }
}
