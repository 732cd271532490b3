//! Synthetic raster file builders.
//!
//! These builders create minimal but structurally valid GRIB2, GeoTIFF,
//! and NetCDF files with known contents, so format plugins can be tested
//! end to end without bundled binary fixtures.

use std::path::Path;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// Build a minimal GRIB2 message with the specified parameters.
///
/// Messages use grid definition template 3.0 (regular lat/lon), product
/// definition template 4.0 and simple packing (template 5.0). NaN values
/// in the data are encoded through a bitmap section. Multi-message files
/// are just concatenated `build()` outputs.
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    reference_time: DateTime<Utc>,
    // Grid definition, coordinates in microdegrees at first/last cell centers
    ni: u32,
    nj: u32,
    la1: i32,
    lo1: i32,
    la2: i32,
    lo2: i32,
    di: u32,
    dj: u32,
    scanning_mode: u8,
    // Product definition
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    data_values: Vec<f32>,
}

impl Grib2Builder {
    /// 2m temperature on a 10x10 one-degree grid over central Europe,
    /// rows running north to south. Cell-edge bounds come out as
    /// (5, 45, 15, 55).
    pub fn new_temperature() -> Self {
        let ni = 10;
        let nj = 10;
        Self {
            discipline: 0, // meteorological
            center: 7,
            reference_time: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            ni,
            nj,
            la1: 54_500_000, // 54.5 N
            lo1: 5_500_000,  // 5.5 E
            la2: 45_500_000, // 45.5 N
            lo2: 14_500_000, // 14.5 E
            di: 1_000_000,
            dj: 1_000_000,
            scanning_mode: 0, // +i, north-to-south rows
            param_category: 0,
            param_number: 0, // temperature
            level_type: 103, // height above ground
            level_value: 2,  // 2m
            forecast_hour: 0,
            data_values: vec![288.15; (ni * nj) as usize],
        }
    }

    /// 10m U wind component on the temperature preset's grid.
    pub fn new_wind_u() -> Self {
        let mut builder = Self::new_temperature();
        builder.param_category = 2;
        builder.param_number = 2; // u component
        builder.level_value = 10;
        builder.data_values = vec![5.0; (builder.ni * builder.nj) as usize];
        builder
    }

    /// 10m V wind component on the temperature preset's grid.
    pub fn new_wind_v() -> Self {
        let mut builder = Self::new_wind_u();
        builder.param_number = 3; // v component
        builder
    }

    pub fn with_reference_time(mut self, time: DateTime<Utc>) -> Self {
        self.reference_time = time;
        self
    }

    pub fn with_forecast_hour(mut self, hours: u32) -> Self {
        self.forecast_hour = hours;
        self
    }

    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.data_values = vec![0.0; (ni * nj) as usize];
        self.recompute_increments();
        self
    }

    /// First and last cell-center coordinates in degrees. A `la1` south of
    /// `la2` produces a south-to-north file that readers must flip.
    pub fn with_extent(mut self, la1: f64, lo1: f64, la2: f64, lo2: f64) -> Self {
        self.la1 = (la1 * 1e6).round() as i32;
        self.lo1 = (lo1 * 1e6).round() as i32;
        self.la2 = (la2 * 1e6).round() as i32;
        self.lo2 = (lo2 * 1e6).round() as i32;
        self.recompute_increments();
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    fn recompute_increments(&mut self) {
        if self.ni > 1 {
            self.di = (self.lo2 - self.lo1).unsigned_abs() / (self.ni - 1);
        }
        if self.nj > 1 {
            self.dj = (self.la2 - self.la1).unsigned_abs() / (self.nj - 1);
        }
    }

    /// Build the complete GRIB2 message bytes.
    pub fn build(&self) -> Vec<u8> {
        assert_eq!(
            self.data_values.len(),
            (self.ni * self.nj) as usize,
            "data length must match grid size"
        );

        let section1 = self.build_section1();
        let section3 = self.build_section3();
        let section4 = self.build_section4();
        let section5 = self.build_section5();
        let section6 = self.build_section6();
        let section7 = self.build_section7();

        let total_length = 16 // indicator
            + section1.len()
            + section3.len()
            + section4.len()
            + section5.len()
            + section6.len()
            + section7.len()
            + 4; // end section

        let mut message = Vec::with_capacity(total_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]); // reserved
        message.push(self.discipline);
        message.push(2); // edition
        message.extend_from_slice(&(total_length as u64).to_be_bytes());

        message.extend_from_slice(&section1);
        message.extend_from_slice(&section3);
        message.extend_from_slice(&section4);
        message.extend_from_slice(&section5);
        message.extend_from_slice(&section6);
        message.extend_from_slice(&section7);

        message.extend_from_slice(b"7777");
        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1); // section number

        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // sub-center
        section.push(2); // master table version
        section.push(1); // local table version
        section.push(1); // reference time is start of forecast

        section.extend_from_slice(&(self.reference_time.year() as u16).to_be_bytes());
        section.push(self.reference_time.month() as u8);
        section.push(self.reference_time.day() as u8);
        section.push(self.reference_time.hour() as u8);
        section.push(self.reference_time.minute() as u8);
        section.push(self.reference_time.second() as u8);

        section.push(0); // production status (operational)
        section.push(1); // type of data (forecast)
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut section = Vec::new();
        // 14-byte preamble plus the 58 bytes of template 3.0
        section.extend_from_slice(&72u32.to_be_bytes());
        section.push(3); // section number

        section.push(0); // source of grid definition
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0); // no optional point list
        section.push(0); // interpretation of optional list
        section.extend_from_slice(&0u16.to_be_bytes()); // template 3.0 (lat/lon)

        section.push(6); // shape of earth: spherical, radius 6371229m
        section.push(0); // scale factor of radius
        section.extend_from_slice(&0u32.to_be_bytes()); // scaled radius
        section.push(0); // scale factor of major axis
        section.extend_from_slice(&0u32.to_be_bytes()); // scaled major axis
        section.push(0); // scale factor of minor axis
        section.extend_from_slice(&0u32.to_be_bytes()); // scaled minor axis

        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // basic angle
        section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // subdivisions

        section.extend_from_slice(&self.la1.to_be_bytes());
        section.extend_from_slice(&self.lo1.to_be_bytes());
        section.push(48); // resolution and component flags
        section.extend_from_slice(&self.la2.to_be_bytes());
        section.extend_from_slice(&self.lo2.to_be_bytes());
        section.extend_from_slice(&self.di.to_be_bytes());
        section.extend_from_slice(&self.dj.to_be_bytes());
        section.push(self.scanning_mode);
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&34u32.to_be_bytes());
        section.push(4); // section number

        section.extend_from_slice(&0u16.to_be_bytes()); // no coordinate values
        section.extend_from_slice(&0u16.to_be_bytes()); // template 4.0

        section.push(self.param_category);
        section.push(self.param_number);
        section.push(2); // generating process: forecast
        section.push(0); // background process
        section.push(0); // analysis or forecast process
        section.extend_from_slice(&0u16.to_be_bytes()); // hours of cutoff
        section.push(0); // minutes of cutoff
        section.push(1); // time range unit: hours
        section.extend_from_slice(&self.forecast_hour.to_be_bytes());

        section.push(self.level_type); // first fixed surface
        section.push(0); // scale factor
        section.extend_from_slice(&self.level_value.to_be_bytes());

        section.push(255); // no second fixed surface
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference, binary_scale, bits) = self.packing_parameters();
        let num_points = self.present_count() as u32;

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5); // section number

        section.extend_from_slice(&num_points.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // template 5.0
        section.extend_from_slice(&reference.to_be_bytes());
        section.extend_from_slice(&sign_magnitude_i16(binary_scale).to_be_bytes());
        section.extend_from_slice(&0i16.to_be_bytes()); // decimal scale factor
        section.push(bits);
        section.push(0); // original field type: floating point
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        if !self.has_missing() {
            section.extend_from_slice(&6u32.to_be_bytes());
            section.push(6); // section number
            section.push(255); // no bitmap, all points present
            return section;
        }

        let points = self.data_values.len();
        let mut bitmap = vec![0u8; points.div_ceil(8)];
        for (i, value) in self.data_values.iter().enumerate() {
            if !value.is_nan() {
                bitmap[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        section.extend_from_slice(&((6 + bitmap.len()) as u32).to_be_bytes());
        section.push(6); // section number
        section.push(0); // bitmap attached
        section.extend_from_slice(&bitmap);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let packed = self.pack_values();
        let mut section = Vec::new();
        section.extend_from_slice(&((5 + packed.len()) as u32).to_be_bytes());
        section.push(7); // section number
        section.extend_from_slice(&packed);
        section
    }

    fn has_missing(&self) -> bool {
        self.data_values.iter().any(|v| v.is_nan())
    }

    fn present_count(&self) -> usize {
        self.data_values.iter().filter(|v| !v.is_nan()).count()
    }

    /// (reference value, binary scale factor, bits per value) for simple
    /// packing. Unpacking computes `reference + packed * 2^scale`, so the
    /// scale is chosen to make the largest packed value fit in 16 bits.
    /// A constant field packs to zero bits, unless a bitmap is in play:
    /// zero-bit data would erase the missing points.
    fn packing_parameters(&self) -> (f32, i16, u8) {
        let (min_val, max_val) = self
            .data_values
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
                (min.min(v), max.max(v))
            });
        if !min_val.is_finite() {
            // all points missing
            return (0.0, 0, 16);
        }
        let range = max_val - min_val;
        if range == 0.0 {
            let bits = if self.has_missing() { 16 } else { 0 };
            return (min_val, 0, bits);
        }
        let scale = (range / 65535.0).log2().ceil() as i16;
        (min_val, scale, 16)
    }

    fn pack_values(&self) -> Vec<u8> {
        let (reference, binary_scale, bits) = self.packing_parameters();
        if bits == 0 {
            return Vec::new();
        }
        let scale = 2.0_f32.powi(binary_scale as i32);
        let mut packed = Vec::with_capacity(self.present_count() * 2);
        for value in &self.data_values {
            if value.is_nan() {
                continue;
            }
            let raw = ((value - reference) / scale).round() as u16;
            packed.extend_from_slice(&raw.to_be_bytes());
        }
        packed
    }
}

/// GRIB2 stores negative integers as sign-and-magnitude, not two's
/// complement: a set high bit flags the sign and the remaining bits hold
/// the magnitude.
fn sign_magnitude_i16(value: i16) -> u16 {
    if value < 0 {
        0x8000 | value.unsigned_abs()
    } else {
        value as u16
    }
}

/// Build a minimal georeferenced TIFF: little-endian, single IFD,
/// uncompressed strips of 32-bit float samples, with the pixel scale,
/// tiepoint and geo key tags readers need for georeferencing.
pub struct GeotiffBuilder {
    width: usize,
    height: usize,
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    epsg: u16,
    rows_per_strip: usize,
    nodata: Option<String>,
    data: Vec<f32>,
}

impl GeotiffBuilder {
    /// A zero-filled grid with one pixel per unit, bounds (0, 0) to
    /// (width, height), in EPSG:4326.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            west: 0.0,
            south: 0.0,
            east: width as f64,
            north: height as f64,
            epsg: 4326,
            rows_per_strip: height,
            nodata: None,
            data: vec![0.0; width * height],
        }
    }

    /// Cell-edge bounds of the full raster.
    pub fn with_bounds(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.west = west;
        self.south = south;
        self.east = east;
        self.north = north;
        self
    }

    pub fn with_epsg(mut self, epsg: u16) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn with_rows_per_strip(mut self, rows: usize) -> Self {
        self.rows_per_strip = rows;
        self
    }

    /// GDAL-style nodata marker, e.g. `"-9999"` or `"nan"`.
    pub fn with_nodata(mut self, text: &str) -> Self {
        self.nodata = Some(text.to_string());
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data = data;
        self
    }

    /// Serialize the complete TIFF file bytes.
    pub fn build(&self) -> Vec<u8> {
        assert_eq!(
            self.data.len(),
            self.width * self.height,
            "data length must match grid size"
        );
        let rows_per_strip = self.rows_per_strip.clamp(1, self.height.max(1));
        let strip_count = self.height.div_ceil(rows_per_strip);

        // Strip data sits directly after the 8-byte header; the IFD and its
        // spilled values follow. f32 strips keep every offset word-aligned.
        let mut offsets = Vec::with_capacity(strip_count);
        let mut counts = Vec::with_capacity(strip_count);
        let mut cursor = 8u32;
        for strip in 0..strip_count {
            let rows = rows_per_strip.min(self.height - strip * rows_per_strip);
            offsets.push(cursor);
            counts.push((rows * self.width * 4) as u32);
            cursor += (rows * self.width * 4) as u32;
        }
        let ifd_offset = cursor;

        let entries = self.build_entries(rows_per_strip, &offsets, &counts);

        let mut out = Vec::new();
        out.extend_from_slice(b"II");
        out.extend_from_slice(&42u16.to_le_bytes());
        out.extend_from_slice(&ifd_offset.to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }

        let mut spill_cursor = ifd_offset as usize + 2 + entries.len() * 12 + 4;
        let mut spill = Vec::new();
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for entry in &entries {
            out.extend_from_slice(&entry.tag.to_le_bytes());
            out.extend_from_slice(&entry.field_type.to_le_bytes());
            out.extend_from_slice(&entry.count.to_le_bytes());
            if entry.payload.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..entry.payload.len()].copy_from_slice(&entry.payload);
                out.extend_from_slice(&inline);
            } else {
                out.extend_from_slice(&(spill_cursor as u32).to_le_bytes());
                spill.extend_from_slice(&entry.payload);
                spill_cursor += entry.payload.len();
                if entry.payload.len() % 2 == 1 {
                    spill.push(0);
                    spill_cursor += 1;
                }
            }
        }
        out.extend_from_slice(&0u32.to_le_bytes()); // no next IFD
        out.extend_from_slice(&spill);
        out
    }

    fn build_entries(
        &self,
        rows_per_strip: usize,
        offsets: &[u32],
        counts: &[u32],
    ) -> Vec<TiffEntry> {
        let scale_x = (self.east - self.west) / self.width.max(1) as f64;
        let scale_y = (self.north - self.south) / self.height.max(1) as f64;

        let mut entries = vec![
            TiffEntry::longs(256, &[self.width as u32]),  // ImageWidth
            TiffEntry::longs(257, &[self.height as u32]), // ImageLength
            TiffEntry::shorts(258, &[32]),                // BitsPerSample
            TiffEntry::shorts(259, &[1]),                 // uncompressed
            TiffEntry::shorts(262, &[1]),                 // BlackIsZero
            TiffEntry::longs(273, offsets),               // StripOffsets
            TiffEntry::shorts(277, &[1]),                 // SamplesPerPixel
            TiffEntry::longs(278, &[rows_per_strip as u32]),
            TiffEntry::longs(279, counts), // StripByteCounts
            TiffEntry::shorts(339, &[3]),  // IEEE float samples
            TiffEntry::doubles(33550, &[scale_x, scale_y, 0.0]),
            TiffEntry::doubles(33922, &[0.0, 0.0, 0.0, self.west, self.north, 0.0]),
            TiffEntry::shorts(34735, &self.geo_key_directory()),
        ];
        if let Some(nodata) = &self.nodata {
            entries.push(TiffEntry::ascii(42113, nodata));
        }
        entries
    }

    fn geo_key_directory(&self) -> Vec<u16> {
        let geographic = (4000..=4999).contains(&self.epsg);
        let (model_type, cs_key) = if geographic { (2, 2048) } else { (1, 3072) };
        vec![
            1, 1, 0, 3, // version, revision 1.0, key count
            1024, 0, 1, model_type, // GTModelType
            1025, 0, 1, 1, // GTRasterType: PixelIsArea
            cs_key, 0, 1, self.epsg,
        ]
    }
}

/// One IFD entry with its little-endian value bytes.
struct TiffEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    payload: Vec<u8>,
}

impl TiffEntry {
    fn shorts(tag: u16, values: &[u16]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * 2);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        Self { tag, field_type: 3, count: values.len() as u32, payload }
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        Self { tag, field_type: 4, count: values.len() as u32, payload }
    }

    fn doubles(tag: u16, values: &[f64]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * 8);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        Self { tag, field_type: 12, count: values.len() as u32, payload }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut payload = text.as_bytes().to_vec();
        payload.push(0);
        Self { tag, field_type: 2, count: payload.len() as u32, payload }
    }
}

/// Build a NetCDF file with one data variable on a `y`/`x` grid, optional
/// CF time axis, and the usual per-variable attributes (`units`,
/// `_FillValue`, `scale_factor`, `add_offset`).
pub struct NetcdfBuilder {
    var_name: String,
    width: usize,
    height: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    time: Option<(String, Vec<f64>)>,
    units: Option<String>,
    fill_value: Option<f32>,
    scale_factor: Option<f64>,
    add_offset: Option<f64>,
    data: Vec<f32>,
}

impl NetcdfBuilder {
    /// A zero-filled grid with one pixel per unit, cell centers half a
    /// pixel in from bounds (0, 0) to (width, height), north-up.
    pub fn new(var_name: &str, width: usize, height: usize) -> Self {
        let mut builder = Self {
            var_name: var_name.to_string(),
            width,
            height,
            x: Vec::new(),
            y: Vec::new(),
            time: None,
            units: None,
            fill_value: None,
            scale_factor: None,
            add_offset: None,
            data: vec![0.0; width * height],
        };
        builder.set_coords(0.0, 0.0, width as f64, height as f64, false);
        builder
    }

    /// Cell-edge bounds of the full raster; coordinates are written at
    /// cell centers.
    pub fn with_bounds(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        let ascending = self.y.len() > 1 && self.y[0] < self.y[1];
        self.set_coords(west, south, east, north, ascending);
        self
    }

    /// Write the y coordinate south-to-north, producing a file readers
    /// must flip to north-up.
    pub fn with_ascending_y(mut self) -> Self {
        if self.y.len() > 1 && self.y[0] > self.y[1] {
            self.y.reverse();
        }
        self
    }

    /// CF time axis, e.g. `with_times("hours since 2024-01-15 00:00:00",
    /// &[0.0, 6.0])`. With a time axis the data variable becomes
    /// (time, y, x) and `data` must hold one full grid per step.
    pub fn with_times(mut self, units: &str, values: &[f64]) -> Self {
        self.time = Some((units.to_string(), values.to_vec()));
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn with_fill_value(mut self, fill: f32) -> Self {
        self.fill_value = Some(fill);
        self
    }

    pub fn with_scale_offset(mut self, scale: f64, offset: f64) -> Self {
        self.scale_factor = Some(scale);
        self.add_offset = Some(offset);
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data = data;
        self
    }

    fn set_coords(&mut self, west: f64, south: f64, east: f64, north: f64, ascending: bool) {
        let step_x = (east - west) / self.width.max(1) as f64;
        let step_y = (north - south) / self.height.max(1) as f64;
        self.x = (0..self.width)
            .map(|i| west + (i as f64 + 0.5) * step_x)
            .collect();
        self.y = (0..self.height)
            .map(|j| north - (j as f64 + 0.5) * step_y)
            .collect();
        if ascending {
            self.y.reverse();
        }
    }

    /// Create the file at `path`, overwriting any existing file.
    pub fn write(&self, path: &Path) -> Result<(), netcdf::Error> {
        let steps = self.time.as_ref().map(|(_, v)| v.len()).unwrap_or(1);
        assert_eq!(
            self.data.len(),
            steps * self.width * self.height,
            "data length must match grid size times time steps"
        );

        let mut file = netcdf::create(path)?;
        if let Some((_, values)) = &self.time {
            file.add_dimension("time", values.len())?;
        }
        file.add_dimension("y", self.height)?;
        file.add_dimension("x", self.width)?;

        let mut y_var = file.add_variable::<f64>("y", &["y"])?;
        y_var.put_values(&self.y, ..)?;
        let mut x_var = file.add_variable::<f64>("x", &["x"])?;
        x_var.put_values(&self.x, ..)?;
        if let Some((units, values)) = &self.time {
            let mut time_var = file.add_variable::<f64>("time", &["time"])?;
            time_var.put_attribute("units", units.as_str())?;
            time_var.put_values(values, ..)?;
        }

        let dims: &[&str] = if self.time.is_some() {
            &["time", "y", "x"]
        } else {
            &["y", "x"]
        };
        let mut var = file.add_variable::<f32>(&self.var_name, dims)?;
        if let Some(units) = &self.units {
            var.put_attribute("units", units.as_str())?;
        }
        if let Some(fill) = self.fill_value {
            var.put_attribute("_FillValue", fill)?;
        }
        if let Some(scale) = self.scale_factor {
            var.put_attribute("scale_factor", scale)?;
        }
        if let Some(offset) = self.add_offset {
            var.put_attribute("add_offset", offset)?;
        }
        var.put_values(&self.data, ..)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::create_test_grid;

    /// Walk the sections of a single GRIB2 message: (number, offset, length).
    fn grib_sections(message: &[u8]) -> Vec<(u8, usize, usize)> {
        let mut sections = Vec::new();
        let mut offset = 16;
        while offset + 5 <= message.len() && &message[offset..offset + 4] != b"7777" {
            let len = u32::from_be_bytes([
                message[offset],
                message[offset + 1],
                message[offset + 2],
                message[offset + 3],
            ]) as usize;
            sections.push((message[offset + 4], offset, len));
            offset += len;
        }
        sections
    }

    fn grib_section(message: &[u8], number: u8) -> (usize, usize) {
        grib_sections(message)
            .into_iter()
            .find(|s| s.0 == number)
            .map(|s| (s.1, s.2))
            .unwrap_or_else(|| panic!("no section {}", number))
    }

    #[test]
    fn test_grib_message_structure() {
        let message = Grib2Builder::new_temperature().build();
        assert_eq!(&message[0..4], b"GRIB");
        assert_eq!(message[6], 0); // discipline
        assert_eq!(message[7], 2); // edition
        let declared = u64::from_be_bytes(message[8..16].try_into().unwrap());
        assert_eq!(declared as usize, message.len());
        assert_eq!(&message[message.len() - 4..], b"7777");

        let numbers: Vec<u8> = grib_sections(&message).iter().map(|s| s.0).collect();
        assert_eq!(numbers, vec![1, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_grib_packing_reconstructs_first_value() {
        let values: Vec<f32> = (0..100).map(|i| 273.15 + i as f32 * 0.37).collect();
        let message = Grib2Builder::new_temperature().with_data(values.clone()).build();

        let (s5, _) = grib_section(&message, 5);
        let reference = f32::from_be_bytes(message[s5 + 11..s5 + 15].try_into().unwrap());
        let scale_exp = i16::from_be_bytes([message[s5 + 15], message[s5 + 16]]);
        let bits = message[s5 + 19];
        assert_eq!(bits, 16);

        let (s7, len7) = grib_section(&message, 7);
        assert_eq!((len7 - 5) / 2, 100);
        let first_raw = u16::from_be_bytes([message[s7 + 5], message[s7 + 6]]);
        let reconstructed = reference + first_raw as f32 * 2.0_f32.powi(scale_exp as i32);
        crate::assert_approx_eq!(reconstructed, values[0], 0.01);
    }

    #[test]
    fn test_grib_constant_field_packs_to_zero_bits() {
        let message = Grib2Builder::new_temperature().with_constant_value(5.0).build();
        let (s5, _) = grib_section(&message, 5);
        assert_eq!(message[s5 + 19], 0); // bits per value
        let (_, len7) = grib_section(&message, 7);
        assert_eq!(len7, 5); // header only, no packed data
    }

    #[test]
    fn test_grib_bitmap_for_nan_values() {
        let mut data = vec![1.5f32; 16];
        data[3] = f32::NAN;
        let message = Grib2Builder::new_temperature()
            .with_grid(4, 4)
            .with_data(data)
            .build();

        let (s6, len6) = grib_section(&message, 6);
        assert_eq!(message[s6 + 5], 0); // bitmap attached
        assert_eq!(len6, 6 + 2); // 16 points need 2 bitmap bytes
        assert_ne!(message[s6 + 6] & 0b1000_0000, 0); // point 0 present
        assert_eq!(message[s6 + 6] & 0b0001_0000, 0); // point 3 missing

        // 15 present points; constant values still pack in 16 bits here so
        // the missing point survives
        let (s5, _) = grib_section(&message, 5);
        let num_points =
            u32::from_be_bytes(message[s5 + 5..s5 + 9].try_into().unwrap());
        assert_eq!(num_points, 15);
        assert_eq!(message[s5 + 19], 16);
        let (_, len7) = grib_section(&message, 7);
        assert_eq!((len7 - 5) / 2, 15);
    }

    #[test]
    fn test_geotiff_header_and_layout() {
        let tiff = GeotiffBuilder::new(4, 4).with_data(create_test_grid(4, 4)).build();
        assert_eq!(&tiff[0..2], b"II");
        assert_eq!(u16::from_le_bytes([tiff[2], tiff[3]]), 42);

        // one full-image strip, IFD right after
        let ifd = u32::from_le_bytes(tiff[4..8].try_into().unwrap()) as usize;
        assert_eq!(ifd, 8 + 4 * 4 * 4);
        assert_eq!(f32::from_le_bytes(tiff[8..12].try_into().unwrap()), 0.0);
        assert_eq!(f32::from_le_bytes(tiff[12..16].try_into().unwrap()), 1000.0);

        let entry_count = u16::from_le_bytes([tiff[ifd], tiff[ifd + 1]]);
        assert_eq!(entry_count, 13);
    }

    #[test]
    fn test_geotiff_nodata_adds_entry() {
        let tiff = GeotiffBuilder::new(2, 2).with_nodata("-9999").build();
        let ifd = u32::from_le_bytes(tiff[4..8].try_into().unwrap()) as usize;
        let entry_count = u16::from_le_bytes([tiff[ifd], tiff[ifd + 1]]);
        assert_eq!(entry_count, 14);
    }

    #[test]
    fn test_geotiff_strip_chunking() {
        let tiff = GeotiffBuilder::new(4, 5)
            .with_rows_per_strip(2)
            .with_data(vec![1.0; 20])
            .build();
        // strips of 2+2+1 rows still cover the full raster
        let ifd = u32::from_le_bytes(tiff[4..8].try_into().unwrap()) as usize;
        assert_eq!(ifd, 8 + 20 * 4);
    }

    #[test]
    fn test_netcdf_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.nc");
        NetcdfBuilder::new("t2m", 4, 3)
            .with_bounds(10.0, 40.0, 14.0, 43.0)
            .with_units("K")
            .with_data(create_test_grid(4, 3))
            .write(&path)
            .unwrap();

        let file = netcdf::open(&path).unwrap();
        let var = file.variable("t2m").unwrap();
        let dims = var.dimensions();
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0].len(), 3);
        assert_eq!(dims[1].len(), 4);

        let values: Vec<f32> = var.get_values(..).unwrap();
        assert_eq!(values[1], 1000.0);
        let y: Vec<f64> = file.variable("y").unwrap().get_values(..).unwrap();
        assert!(y[0] > y[2]); // north-up: first row is the northernmost
        crate::assert_approx_eq!(y[0], 42.5, 1e-9);
    }

    #[test]
    fn test_netcdf_time_axis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.nc");
        NetcdfBuilder::new("precip", 2, 2)
            .with_times("hours since 2024-01-15 00:00:00", &[0.0, 6.0])
            .with_data(vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0])
            .write(&path)
            .unwrap();

        let file = netcdf::open(&path).unwrap();
        let var = file.variable("precip").unwrap();
        assert_eq!(var.dimensions().len(), 3);
        let times: Vec<f64> = file.variable("time").unwrap().get_values(..).unwrap();
        assert_eq!(times, vec![0.0, 6.0]);
    }
}
