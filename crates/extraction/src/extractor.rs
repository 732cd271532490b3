//! Transform dispatch: raw source bands to final variable arrays.
//!
//! A [`VariableExtractor`] wraps one format plugin and applies the
//! variable's configured transform: passthrough, unit conversion, vector
//! magnitude or direction from paired u/v components, free-form band math,
//! or thresholding. All paths return north-up float32 with NaN for nodata.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use formats::{ExtractedBand, FormatPlugin, SourceSelector};
use raster_common::{
    iter_windows, PixelWindow, RasterError, RasterResult, TransformKind, Variable,
    VariableSource, DEFAULT_BLOCK_SIZE,
};
use tracing::warn;

use crate::expression;
use crate::stats::{StatsAccumulator, VariableStats};
use crate::units;

#[derive(Debug, Clone, Copy)]
enum VectorField {
    Magnitude,
    Direction,
}

pub struct VariableExtractor {
    plugin: Arc<dyn FormatPlugin>,
}

impl VariableExtractor {
    pub fn new(plugin: Arc<dyn FormatPlugin>) -> Self {
        Self { plugin }
    }

    /// Extract one variable at one timestamp, optionally restricted to a
    /// pixel window.
    pub fn extract(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> RasterResult<ExtractedBand> {
        let mut band = match variable.transform {
            TransformKind::Passthrough => {
                self.extract_source(path, primary_source(variable)?, timestamp, window)?
            }
            TransformKind::UnitConvert => {
                let mut band =
                    self.extract_source(path, primary_source(variable)?, timestamp, window)?;
                if let Some(conversion) = &variable.unit_conversion {
                    units::apply(&mut band.data, conversion);
                }
                band
            }
            TransformKind::VectorMagnitude => {
                self.extract_vector(path, variable, timestamp, window, VectorField::Magnitude)?
            }
            TransformKind::VectorDirection => {
                self.extract_vector(path, variable, timestamp, window, VectorField::Direction)?
            }
            TransformKind::BandMath => {
                self.extract_band_math(path, variable, timestamp, window)?
            }
            TransformKind::Threshold => {
                self.extract_threshold(path, variable, timestamp, window)?
            }
            TransformKind::RgbComposite => {
                return Err(RasterError::InternalError(
                    "RGB composite extraction is not implemented".to_string(),
                ))
            }
        };
        if variable.units.is_some() {
            band.meta.units = variable.units.clone();
        }
        Ok(band)
    }

    /// Direction companion for a vector variable, for renderers that pack
    /// direction alongside magnitude.
    pub fn extract_direction(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> RasterResult<ExtractedBand> {
        self.extract_vector(path, variable, timestamp, window, VectorField::Direction)
    }

    /// Full statistics for one variable at one timestamp. Never fails:
    /// any error degrades to the all-null value.
    pub fn compute_stats(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> VariableStats {
        match self.try_compute_stats(path, variable, timestamp, window) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(variable = %variable.slug, error = %e, "Statistics computation failed");
                VariableStats::null()
            }
        }
    }

    fn try_compute_stats(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> RasterResult<VariableStats> {
        let streamable = matches!(
            variable.transform,
            TransformKind::Passthrough | TransformKind::UnitConvert
        );
        if streamable && window.is_none() {
            // Stream block by block instead of materializing the raster.
            let source = primary_source(variable)?;
            let selector = SourceSelector::from_source(source);
            let band = self.plugin.open_variable(
                path,
                &source.source_name,
                timestamp,
                None,
                &selector,
            )?;
            let conversion = match variable.transform {
                TransformKind::UnitConvert => variable.unit_conversion.as_deref(),
                _ => None,
            };
            let mut acc = StatsAccumulator::new();
            for w in iter_windows(band.width(), band.height(), DEFAULT_BLOCK_SIZE) {
                let mut values = band.read_window(w)?;
                if let Some(conversion) = conversion {
                    units::apply(&mut values, conversion);
                }
                acc.extend(&values);
            }
            let mut stats = acc.finish();
            stats.bounds = Some(band.bounds());
            return Ok(stats);
        }

        let band = self.extract(path, variable, timestamp, window)?;
        let mut acc = StatsAccumulator::new();
        acc.extend(&band.data);
        let mut stats = acc.finish();
        stats.bounds = Some(band.bounds);
        Ok(stats)
    }

    fn extract_source(
        &self,
        path: &Path,
        source: &VariableSource,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> RasterResult<ExtractedBand> {
        let selector = SourceSelector::from_source(source);
        self.plugin
            .extract_variable(path, &source.source_name, timestamp, window, &selector)
    }

    fn extract_vector(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
        field: VectorField,
    ) -> RasterResult<ExtractedBand> {
        let (u_source, v_source) = vector_sources(variable)?;
        let mut u = self.extract_source(path, u_source, timestamp, window)?;
        let v = self.extract_source(path, v_source, timestamp, window)?;
        if u.width != v.width || u.height != v.height {
            return Err(RasterError::FormatError(format!(
                "Vector component grids differ: {}x{} vs {}x{}",
                u.width, u.height, v.width, v.height
            )));
        }
        match field {
            VectorField::Magnitude => {
                for (a, &b) in u.data.iter_mut().zip(v.data.iter()) {
                    *a = a.hypot(b);
                }
            }
            VectorField::Direction => {
                for (a, &b) in u.data.iter_mut().zip(v.data.iter()) {
                    *a = wind_direction(*a, b);
                }
                u.meta.units = Some("deg".to_string());
            }
        }
        Ok(u)
    }

    fn extract_band_math(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> RasterResult<ExtractedBand> {
        let text = variable.transform_expression.as_deref().ok_or_else(|| {
            RasterError::ExpressionError(format!(
                "Variable '{}' uses band_math without an expression",
                variable.slug
            ))
        })?;
        let compiled = expression::compile(text)?;

        let mut bands: Vec<(String, ExtractedBand)> = Vec::new();
        for name in compiled.identifiers() {
            let source = variable.source_by_role(&name).ok_or_else(|| {
                RasterError::ExpressionError(format!(
                    "Expression '{}' references '{}' but variable '{}' has no source with that role",
                    text, name, variable.slug
                ))
            })?;
            let band = self.extract_source(path, source, timestamp, window)?;
            bands.push((name, band));
        }

        // Constant expressions still need a grid to broadcast over.
        let template = match bands.first() {
            Some(_) => None,
            None => Some(self.extract_source(
                path,
                primary_source(variable)?,
                timestamp,
                window,
            )?),
        };

        if let Some((first_name, first)) = bands.first() {
            for (name, band) in &bands[1..] {
                if band.width != first.width || band.height != first.height {
                    return Err(RasterError::FormatError(format!(
                        "Band '{}' is {}x{} but '{}' is {}x{}",
                        name, band.width, band.height, first_name, first.width, first.height
                    )));
                }
            }
        }

        let len = match &template {
            Some(band) => band.data.len(),
            None => bands[0].1.data.len(),
        };
        let bindings: Vec<(&str, &[f32])> = bands
            .iter()
            .map(|(name, band)| (name.as_str(), band.data.as_slice()))
            .collect();
        let data = compiled.evaluate(&bindings, len)?;

        let mut band = match template {
            Some(band) => band,
            None => bands.swap_remove(0).1,
        };
        band.data = data;
        Ok(band)
    }

    fn extract_threshold(
        &self,
        path: &Path,
        variable: &Variable,
        timestamp: Option<DateTime<Utc>>,
        window: Option<PixelWindow>,
    ) -> RasterResult<ExtractedBand> {
        let text = variable.transform_expression.as_deref().ok_or_else(|| {
            RasterError::ExpressionError(format!(
                "Variable '{}' uses threshold without an expression",
                variable.slug
            ))
        })?;
        let compiled = expression::compile(text)?;
        let mut band =
            self.extract_source(path, primary_source(variable)?, timestamp, window)?;
        let data = compiled.evaluate(&[("data", &band.data)], band.data.len())?;
        band.data = data;
        Ok(band)
    }
}

fn primary_source(variable: &Variable) -> RasterResult<&VariableSource> {
    variable.primary_source().ok_or_else(|| {
        RasterError::ConfigError(format!("Variable '{}' has no sources", variable.slug))
    })
}

fn vector_sources(variable: &Variable) -> RasterResult<(&VariableSource, &VariableSource)> {
    let u = variable
        .source_by_role("u_component")
        .or_else(|| variable.source_by_role("u"));
    let v = variable
        .source_by_role("v_component")
        .or_else(|| variable.source_by_role("v"));
    match (u, v) {
        (Some(u), Some(v)) => Ok((u, v)),
        _ if variable.sources.len() >= 2 => Ok((&variable.sources[0], &variable.sources[1])),
        _ => Err(RasterError::ConfigError(format!(
            "Variable '{}' needs 'u' and 'v' component sources",
            variable.slug
        ))),
    }
}

/// Meteorological wind direction in degrees: the bearing the wind blows
/// from, 0 at north, increasing clockwise. NaN components stay NaN.
fn wind_direction(u: f32, v: f32) -> f32 {
    (u.atan2(v).to_degrees() + 180.0).rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use formats::{BandMeta, FormatPlugin, LazyBand, SourceBand};
    use raster_common::{Bounds, FileFormat, ScaleKind};
    use std::collections::HashMap;

    /// Serves fixed in-memory grids; path arguments are ignored.
    struct StubPlugin {
        width: usize,
        height: usize,
        grids: HashMap<String, Vec<f32>>,
    }

    impl StubPlugin {
        fn new(width: usize, height: usize) -> Self {
            Self {
                width,
                height,
                grids: HashMap::new(),
            }
        }

        fn with_grid(mut self, name: &str, data: Vec<f32>) -> Self {
            assert_eq!(data.len(), self.width * self.height);
            self.grids.insert(name.to_string(), data);
            self
        }
    }

    impl FormatPlugin for StubPlugin {
        fn format(&self) -> FileFormat {
            FileFormat::Geotiff
        }

        fn can_handle(&self, _path: &Path) -> bool {
            true
        }

        fn list_variables(&self, _path: &Path) -> RasterResult<Vec<SourceBand>> {
            Ok(self
                .grids
                .keys()
                .map(|name| SourceBand {
                    name: name.clone(),
                    long_name: None,
                    units: None,
                    dims: vec!["y".to_string(), "x".to_string()],
                    shape: vec![self.height, self.width],
                })
                .collect())
        }

        fn timestamps(&self, _path: &Path, _variable: &str) -> RasterResult<Vec<DateTime<Utc>>> {
            Ok(vec![])
        }

        fn open_variable(
            &self,
            _path: &Path,
            variable: &str,
            _timestamp: Option<DateTime<Utc>>,
            window: Option<PixelWindow>,
            _selector: &SourceSelector,
        ) -> RasterResult<LazyBand> {
            let data = self
                .grids
                .get(variable)
                .cloned()
                .ok_or_else(|| RasterError::NotFound(format!("No grid '{}'", variable)))?;
            let meta = BandMeta {
                bounds: Bounds::new(0.0, 0.0, self.width as f64, self.height as f64),
                crs: "EPSG:4326".to_string(),
                res_x: 1.0,
                res_y: 1.0,
                width: self.width,
                height: self.height,
                flip_y: false,
                units: None,
                timestamp: None,
            };
            let width = self.width;
            let reader = Box::new(move |w: PixelWindow| {
                let mut out = Vec::with_capacity(w.len());
                for r in 0..w.height {
                    let start = (w.y + r) * width + w.x;
                    out.extend_from_slice(&data[start..start + w.width]);
                }
                Ok(out)
            });
            Ok(LazyBand::new(meta, window, reader))
        }
    }

    fn variable(transform: TransformKind, sources: Vec<VariableSource>) -> Variable {
        Variable {
            slug: "test_var".to_string(),
            title: None,
            transform,
            transform_expression: None,
            unit_conversion: None,
            units: None,
            value_min: None,
            value_max: None,
            scale: ScaleKind::Linear,
            is_active: true,
            sort_order: 0,
            sources,
        }
    }

    fn source(name: &str, role: &str) -> VariableSource {
        VariableSource {
            source_name: name.to_string(),
            vertical_dimension: None,
            vertical_value: None,
            band_index: None,
            source_units: None,
            role: role.to_string(),
        }
    }

    fn extractor(plugin: StubPlugin) -> VariableExtractor {
        VariableExtractor::new(Arc::new(plugin))
    }

    #[test]
    fn test_passthrough() {
        let plugin = StubPlugin::new(2, 2).with_grid("raw", vec![1.0, 2.0, 3.0, 4.0]);
        let ex = extractor(plugin);
        let var = variable(TransformKind::Passthrough, vec![source("raw", "primary")]);
        let band = ex.extract(Path::new("unused"), &var, None, None).unwrap();
        assert_eq!(band.data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(band.width, 2);
    }

    #[test]
    fn test_unit_convert_kelvin() {
        let plugin = StubPlugin::new(2, 1).with_grid("t2m", vec![300.0, f32::NAN]);
        let ex = extractor(plugin);
        let mut var = variable(TransformKind::UnitConvert, vec![source("t2m", "primary")]);
        var.unit_conversion = Some("K_to_C".to_string());
        var.units = Some("°C".to_string());
        let band = ex.extract(Path::new("unused"), &var, None, None).unwrap();
        assert!((band.data[0] - 26.85).abs() < 1e-4);
        assert!(band.data[1].is_nan());
        assert_eq!(band.meta.units.as_deref(), Some("°C"));
    }

    #[test]
    fn test_vector_magnitude_and_direction() {
        let plugin = StubPlugin::new(2, 1)
            .with_grid("u10", vec![3.0, 0.0])
            .with_grid("v10", vec![4.0, -5.0]);
        let ex = extractor(plugin);
        let var = variable(
            TransformKind::VectorMagnitude,
            vec![source("u10", "u"), source("v10", "v")],
        );

        let magnitude = ex.extract(Path::new("unused"), &var, None, None).unwrap();
        assert!((magnitude.data[0] - 5.0).abs() < 1e-6);
        assert!((magnitude.data[1] - 5.0).abs() < 1e-6);

        // Southerly flow (u=3, v=4) comes from the south-west.
        let direction = ex
            .extract_direction(Path::new("unused"), &var, None, None)
            .unwrap();
        assert!((direction.data[0] - 216.8699).abs() < 1e-3);
        // Pure northerly flow (u=0, v=-5) blows from the north.
        assert!(direction.data[1].abs() < 1e-3);
        assert_eq!(direction.meta.units.as_deref(), Some("deg"));
    }

    #[test]
    fn test_vector_component_role_names() {
        let plugin = StubPlugin::new(1, 1)
            .with_grid("u10", vec![3.0])
            .with_grid("v10", vec![4.0]);
        let ex = extractor(plugin);
        let var = variable(
            TransformKind::VectorMagnitude,
            vec![source("u10", "u_component"), source("v10", "v_component")],
        );
        let band = ex.extract(Path::new("unused"), &var, None, None).unwrap();
        assert!((band.data[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_band_math_ndvi() {
        let plugin = StubPlugin::new(1, 1)
            .with_grid("b04", vec![0.2])
            .with_grid("b08", vec![0.5]);
        let ex = extractor(plugin);
        let mut var = variable(
            TransformKind::BandMath,
            vec![source("b04", "red"), source("b08", "nir")],
        );
        var.transform_expression = Some("(nir - red) / (nir + red)".to_string());
        let band = ex.extract(Path::new("unused"), &var, None, None).unwrap();
        assert!((band.data[0] - 0.42857143).abs() < 1e-6);
    }

    #[test]
    fn test_band_math_requires_expression_and_roles() {
        let plugin = StubPlugin::new(1, 1).with_grid("b04", vec![0.2]);
        let ex = extractor(plugin);
        let var = variable(TransformKind::BandMath, vec![source("b04", "red")]);
        let err = ex.extract(Path::new("unused"), &var, None, None).unwrap_err();
        assert!(err.to_string().contains("without an expression"));

        let plugin = StubPlugin::new(1, 1).with_grid("b04", vec![0.2]);
        let ex = extractor(plugin);
        let mut var = variable(TransformKind::BandMath, vec![source("b04", "red")]);
        var.transform_expression = Some("red + green".to_string());
        let err = ex.extract(Path::new("unused"), &var, None, None).unwrap_err();
        assert!(err.to_string().contains("no source with that role"));
    }

    #[test]
    fn test_threshold_binds_data() {
        let plugin = StubPlugin::new(3, 1).with_grid("temp", vec![250.0, 280.0, f32::NAN]);
        let ex = extractor(plugin);
        let mut var = variable(TransformKind::Threshold, vec![source("temp", "primary")]);
        var.transform_expression = Some("where(data > 273.15, 1, 0)".to_string());
        let band = ex.extract(Path::new("unused"), &var, None, None).unwrap();
        assert_eq!(band.data[0], 0.0);
        assert_eq!(band.data[1], 1.0);
        assert_eq!(band.data[2], 0.0);
    }

    #[test]
    fn test_rgb_composite_unimplemented() {
        let plugin = StubPlugin::new(1, 1).with_grid("r", vec![0.0]);
        let ex = extractor(plugin);
        let var = variable(TransformKind::RgbComposite, vec![source("r", "primary")]);
        assert!(ex.extract(Path::new("unused"), &var, None, None).is_err());
    }

    #[test]
    fn test_extract_with_window() {
        // 4x4 grid of row*10+col.
        let data: Vec<f32> = (0..16).map(|i| ((i / 4) * 10 + i % 4) as f32).collect();
        let plugin = StubPlugin::new(4, 4).with_grid("raw", data);
        let ex = extractor(plugin);
        let var = variable(TransformKind::Passthrough, vec![source("raw", "primary")]);
        let window = PixelWindow::new(1, 2, 2, 2);
        let band = ex
            .extract(Path::new("unused"), &var, None, Some(window))
            .unwrap();
        assert_eq!(band.width, 2);
        assert_eq!(band.height, 2);
        assert_eq!(band.data, vec![21.0, 22.0, 31.0, 32.0]);
        assert_eq!(band.bounds.to_array(), [1.0, 0.0, 3.0, 2.0]);
    }

    #[test]
    fn test_compute_stats_streaming_matches_materialized() {
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let plugin = StubPlugin::new(10, 10).with_grid("raw", data);
        let ex = extractor(plugin);
        let var = variable(TransformKind::Passthrough, vec![source("raw", "primary")]);

        let streamed = ex.compute_stats(Path::new("unused"), &var, None, None);
        assert_eq!(streamed.min, Some(0.0));
        assert_eq!(streamed.max, Some(99.0));
        assert_eq!(streamed.mean, Some(49.5));
        assert_eq!(streamed.valid_count, 100);

        let windowed = ex.compute_stats(
            Path::new("unused"),
            &var,
            None,
            Some(PixelWindow::new(0, 0, 10, 1)),
        );
        assert_eq!(windowed.min, Some(0.0));
        assert_eq!(windowed.max, Some(9.0));
        assert_eq!(windowed.valid_count, 10);
    }

    #[test]
    fn test_compute_stats_failure_is_null() {
        let plugin = StubPlugin::new(1, 1).with_grid("other", vec![1.0]);
        let ex = extractor(plugin);
        let var = variable(TransformKind::Passthrough, vec![source("missing", "primary")]);
        let stats = ex.compute_stats(Path::new("unused"), &var, None, None);
        assert!(stats.is_null());
    }
}
