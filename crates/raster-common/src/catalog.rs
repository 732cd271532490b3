//! Catalog configuration model.
//!
//! Catalogs, collections and variables are authored outside this pipeline
//! and consumed here as read-only structs, deserialized from YAML by the
//! service. Nothing in this module mutates them.

use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;

/// Declared source file format for a catalog. Never sniffed per-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Grib,
    Netcdf,
    Geotiff,
    Zarr,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Grib => "grib",
            FileFormat::Netcdf => "netcdf",
            FileFormat::Geotiff => "geotiff",
            FileFormat::Zarr => "zarr",
        }
    }
}

/// How a catalog's boundary is applied to outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipMode {
    /// Full source extent, boundary ignored.
    None,
    /// Crop to the boundary's bounding box, no mask.
    Bbox,
    /// Crop to the bounding box and mask pixels outside the polygon.
    Mask,
}

impl Default for ClipMode {
    fn default() -> Self {
        ClipMode::Mask
    }
}

/// How a variable's array is derived from its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Passthrough,
    UnitConvert,
    VectorMagnitude,
    VectorDirection,
    BandMath,
    Threshold,
    RgbComposite,
}

impl Default for TransformKind {
    fn default() -> Self {
        TransformKind::Passthrough
    }
}

/// Normalization curve used when encoding values to the visual asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    Linear,
    Log,
    Sqrt,
    Diverging,
}

impl Default for ScaleKind {
    fn default() -> Self {
        ScaleKind::Linear
    }
}

impl ScaleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleKind::Linear => "linear",
            ScaleKind::Log => "log",
            ScaleKind::Sqrt => "sqrt",
            ScaleKind::Diverging => "diverging",
        }
    }
}

/// Administrative boundary a catalog's outputs are clipped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    /// `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Outer ring, `[x, y]` pairs. Optional; bbox-only boundaries mask with
    /// the rectangle itself.
    #[serde(default)]
    pub polygon: Option<Vec<[f64; 2]>>,
}

impl Boundary {
    pub fn bounds(&self) -> Bounds {
        Bounds::from_array(self.bbox)
    }

    /// Polygon ring used for mask rasterization. Falls back to the bbox
    /// corners when no explicit polygon is configured.
    pub fn ring(&self) -> Vec<[f64; 2]> {
        match &self.polygon {
            Some(ring) if ring.len() >= 3 => ring.clone(),
            _ => {
                let [w, s, e, n] = self.bbox;
                vec![[w, s], [e, s], [e, n], [w, n]]
            }
        }
    }
}

/// One raw band/field inside a source file, bound to a variable via `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSource {
    /// Band/field name in the source file. For GRIB this is the short name,
    /// for NetCDF the variable name, for GeoTIFF `band_<n>`.
    pub source_name: String,
    /// Vertical dimension selector, e.g. "isobaricInhPa" or "level".
    #[serde(default)]
    pub vertical_dimension: Option<String>,
    #[serde(default)]
    pub vertical_value: Option<f64>,
    /// 1-based band index override for multi-band GeoTIFF sources.
    #[serde(default)]
    pub band_index: Option<usize>,
    #[serde(default)]
    pub source_units: Option<String>,
    /// Operand binding used by transforms: "primary", "u_component",
    /// "v_component", or a band-math identifier such as "nir".
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "primary".to_string()
}

/// A logical, user-facing data layer derived from 1..N sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub transform: TransformKind,
    /// Expression for `band_math` / `threshold` transforms.
    #[serde(default)]
    pub transform_expression: Option<String>,
    /// Key into the fixed unit-conversion table; unknown keys are a no-op.
    #[serde(default)]
    pub unit_conversion: Option<String>,
    /// Display units after conversion.
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub scale: ScaleKind,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
    pub sources: Vec<VariableSource>,
}

impl Variable {
    /// The source read for scalar transforms: role "primary" if declared,
    /// otherwise the first source.
    pub fn primary_source(&self) -> Option<&VariableSource> {
        self.sources
            .iter()
            .find(|s| s.role == "primary")
            .or_else(|| self.sources.first())
    }

    /// Source with an exact role match.
    pub fn source_by_role(&self, role: &str) -> Option<&VariableSource> {
        self.sources.iter().find(|s| s.role == role)
    }

    /// Vector variables carry direction in the visual asset's G channel.
    pub fn is_vector(&self) -> bool {
        self.transform == TransformKind::VectorMagnitude
    }
}

/// A dataset series inside a catalog; all its variables share one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub time_resolution: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub variables: Vec<Variable>,
}

impl Collection {
    /// Active variables in configured order.
    pub fn active_variables(&self) -> Vec<&Variable> {
        let mut vars: Vec<&Variable> = self.variables.iter().filter(|v| v.is_active).collect();
        vars.sort_by_key(|v| v.sort_order);
        vars
    }

    pub fn variable(&self, slug: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.slug == slug)
    }
}

/// Top-level data provider grouping, owner of the format declaration and
/// the clipping boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    pub file_format: FileFormat,
    #[serde(default)]
    pub clip_mode: ClipMode,
    #[serde(default)]
    pub boundary: Option<Boundary>,
    #[serde(default = "default_true")]
    pub archive_source_files: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub collections: Vec<Collection>,
}

impl Catalog {
    pub fn collection(&self, slug: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.slug == slug)
    }
}

/// Root of the catalogs YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub catalogs: Vec<Catalog>,
}

impl CatalogConfig {
    pub fn find_catalog(&self, slug: &str) -> Option<&Catalog> {
        self.catalogs.iter().find(|c| c.slug == slug)
    }
}

fn default_true() -> bool {
    true
}
