//! Data-to-RGBA encoding.
//!
//! Values are scaled into [0, 1] by the variable's configured scale, then
//! quantized into the red channel. The green channel is zero for scalar
//! fields and carries direction for vector fields. Alpha is the validity
//! mask: 255 where data exists, 0 where it was NaN. A client can recover
//! physical values from the red channel given the encoded range.

use raster_common::{RasterError, RasterResult, ScaleKind};

/// Resolved range and scale for one encoding pass.
#[derive(Debug, Clone, Copy)]
pub struct ScaleParams {
    pub vmin: f64,
    pub vmax: f64,
    pub scale: ScaleKind,
}

impl ScaleParams {
    pub fn new(vmin: f64, vmax: f64, scale: ScaleKind) -> Self {
        Self { vmin, vmax, scale }
    }
}

/// Pick the encoding range: configured limits win, then precomputed
/// statistics, then the data itself. A degenerate range is widened so the
/// scale transforms never divide by zero.
pub fn resolve_range(
    config_min: Option<f64>,
    config_max: Option<f64>,
    stats_min: Option<f64>,
    stats_max: Option<f64>,
    data: &[f32],
) -> (f64, f64) {
    let vmin = config_min
        .or(stats_min)
        .unwrap_or_else(|| data_min(data));
    let mut vmax = config_max
        .or(stats_max)
        .unwrap_or_else(|| data_max(data));
    if vmax <= vmin {
        vmax = vmin + 1.0;
    }
    (vmin, vmax)
}

fn data_min(data: &[f32]) -> f64 {
    let m = data
        .iter()
        .filter(|v| !v.is_nan())
        .fold(f64::INFINITY, |m, &v| m.min(v as f64));
    if m.is_finite() {
        m
    } else {
        0.0
    }
}

fn data_max(data: &[f32]) -> f64 {
    let m = data
        .iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NEG_INFINITY, |m, &v| m.max(v as f64));
    if m.is_finite() {
        m
    } else {
        1.0
    }
}

/// Scale one value into [0, 1]. NaN input stays NaN; the caller decides
/// what a NaN slot becomes.
pub fn scale_to_unit(value: f32, params: &ScaleParams) -> f64 {
    let v = value as f64;
    let (vmin, vmax) = (params.vmin, params.vmax);
    match params.scale {
        ScaleKind::Linear => (v - vmin) / (vmax - vmin),
        ScaleKind::Log => {
            // Shift so the whole range is positive before taking logs.
            let shift = 1.0 - vmin.min(0.0);
            let clipped = v.clamp(vmin, vmax);
            ((clipped + shift).ln() - (vmin + shift).ln())
                / ((vmax + shift).ln() - (vmin + shift).ln())
        }
        ScaleKind::Sqrt => {
            let lo = vmin.max(0.0);
            let hi = vmax.max(lo);
            let clipped = v.clamp(lo, hi);
            let span = hi.sqrt() - lo.sqrt();
            if span == 0.0 {
                0.0
            } else {
                (clipped.sqrt() - lo.sqrt()) / span
            }
        }
        ScaleKind::Diverging => {
            let abs_max = vmin.abs().max(vmax.abs());
            if abs_max == 0.0 {
                0.5
            } else {
                0.5 + v / (2.0 * abs_max)
            }
        }
    }
}

fn unit_to_byte(t: f64) -> u8 {
    // Residual NaN from the scale transforms lands at zero; alpha already
    // records validity.
    if t.is_nan() {
        return 0;
    }
    (t * 255.0).clamp(0.0, 255.0) as u8
}

/// Encode a scalar field as RGBA: value in R, zero G and B, validity in A.
pub fn encode_rgba(data: &[f32], params: &ScaleParams) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(data.len() * 4);
    for &value in data {
        if value.is_nan() {
            pixels.extend_from_slice(&[0, 0, 0, 0]);
        } else {
            let byte = unit_to_byte(scale_to_unit(value, params));
            pixels.extend_from_slice(&[byte, 0, 0, 255]);
        }
    }
    pixels
}

/// Encode a vector field as RGBA: magnitude in R, direction in G mapped
/// from [0, 360) onto [0, 255], validity in A.
pub fn encode_vector_rgba(
    magnitude: &[f32],
    direction: &[f32],
    params: &ScaleParams,
) -> RasterResult<Vec<u8>> {
    if magnitude.len() != direction.len() {
        return Err(RasterError::InternalError(format!(
            "Magnitude has {} pixels but direction has {}",
            magnitude.len(),
            direction.len()
        )));
    }
    let mut pixels = Vec::with_capacity(magnitude.len() * 4);
    for (&m, &d) in magnitude.iter().zip(direction.iter()) {
        if m.is_nan() {
            pixels.extend_from_slice(&[0, 0, 0, 0]);
        } else {
            let value = unit_to_byte(scale_to_unit(m, params));
            let dir = if d.is_nan() {
                0
            } else {
                ((d as f64 / 360.0) * 255.0).clamp(0.0, 255.0) as u8
            };
            pixels.extend_from_slice(&[value, dir, 0, 255]);
        }
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(vmin: f64, vmax: f64) -> ScaleParams {
        ScaleParams::new(vmin, vmax, ScaleKind::Linear)
    }

    #[test]
    fn test_linear_temperature_scenario() {
        // 26.85 on a 0..40 range lands at byte 171.
        let params = linear(0.0, 40.0);
        let t = scale_to_unit(26.85, &params);
        assert!((t - 0.671).abs() < 1e-3);
        let pixels = encode_rgba(&[26.85], &params);
        assert_eq!(pixels, vec![171, 0, 0, 255]);
    }

    #[test]
    fn test_linear_is_monotonic() {
        let params = linear(-10.0, 30.0);
        let values = [-10.0f32, -5.0, 0.0, 12.5, 29.0, 30.0];
        let bytes: Vec<u8> = values
            .iter()
            .map(|&v| unit_to_byte(scale_to_unit(v, &params)))
            .collect();
        for pair in bytes.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[5], 255);
    }

    #[test]
    fn test_degenerate_range_widened() {
        let (vmin, vmax) = resolve_range(Some(5.0), Some(5.0), None, None, &[]);
        assert_eq!(vmin, 5.0);
        assert_eq!(vmax, 6.0);
        // No NaN bytes come out of a constant field.
        let pixels = encode_rgba(&[5.0, 5.0], &ScaleParams::new(vmin, vmax, ScaleKind::Linear));
        assert_eq!(pixels, vec![0, 0, 0, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn test_resolve_range_precedence() {
        let data = [1.0f32, 9.0];
        let stats = (Some(2.0), Some(8.0));
        assert_eq!(
            resolve_range(Some(0.0), Some(40.0), stats.0, stats.1, &data),
            (0.0, 40.0)
        );
        assert_eq!(
            resolve_range(None, None, stats.0, stats.1, &data),
            (2.0, 8.0)
        );
        assert_eq!(resolve_range(None, None, None, None, &data), (1.0, 9.0));
        // Endpoints resolve independently.
        assert_eq!(
            resolve_range(Some(0.0), None, stats.0, stats.1, &data),
            (0.0, 8.0)
        );
    }

    #[test]
    fn test_resolve_range_all_nan_data() {
        let data = [f32::NAN, f32::NAN];
        let (vmin, vmax) = resolve_range(None, None, None, None, &data);
        assert!(vmax > vmin);
    }

    #[test]
    fn test_nan_is_transparent_on_every_scale() {
        for scale in [
            ScaleKind::Linear,
            ScaleKind::Log,
            ScaleKind::Sqrt,
            ScaleKind::Diverging,
        ] {
            let params = ScaleParams::new(0.0, 10.0, scale);
            let pixels = encode_rgba(&[f32::NAN], &params);
            assert_eq!(pixels[3], 0, "alpha must be 0 for {:?}", scale);
        }
    }

    #[test]
    fn test_log_scale_orders_values() {
        let params = ScaleParams::new(0.1, 100.0, ScaleKind::Log);
        let low = scale_to_unit(0.1, &params);
        let mid = scale_to_unit(10.0, &params);
        let high = scale_to_unit(100.0, &params);
        assert!(low.abs() < 1e-9);
        assert!((high - 1.0).abs() < 1e-9);
        assert!(low < mid && mid < high);
        // Log spreads the low end wider than linear.
        assert!(mid > 0.5);
    }

    #[test]
    fn test_sqrt_scale_clips_negative() {
        let params = ScaleParams::new(-5.0, 25.0, ScaleKind::Sqrt);
        assert!(scale_to_unit(-5.0, &params).abs() < 1e-9);
        assert!(scale_to_unit(0.0, &params).abs() < 1e-9);
        assert!((scale_to_unit(25.0, &params) - 1.0).abs() < 1e-9);
        // sqrt(9) sits halfway between sqrt(4) and sqrt(16).
        let positive = ScaleParams::new(4.0, 16.0, ScaleKind::Sqrt);
        assert!((scale_to_unit(9.0, &positive) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_diverging_centers_zero() {
        let params = ScaleParams::new(-20.0, 10.0, ScaleKind::Diverging);
        assert!((scale_to_unit(0.0, &params) - 0.5).abs() < 1e-9);
        assert!(scale_to_unit(-20.0, &params).abs() < 1e-9);
        assert!((scale_to_unit(20.0, &params) - 1.0).abs() < 1e-9);

        let zero = ScaleParams::new(0.0, 0.0, ScaleKind::Diverging);
        assert!((scale_to_unit(123.0, &zero) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_vector_encoding_packs_direction() {
        let params = linear(0.0, 10.0);
        let pixels = encode_vector_rgba(&[5.0, f32::NAN], &[180.0, 90.0], &params).unwrap();
        assert_eq!(pixels[0], 127); // half of range
        assert_eq!(pixels[1], 127); // 180 deg -> middle of byte range
        assert_eq!(pixels[2], 0);
        assert_eq!(pixels[3], 255);
        // NaN magnitude is fully transparent regardless of direction.
        assert_eq!(&pixels[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_vector_length_mismatch() {
        let params = linear(0.0, 1.0);
        assert!(encode_vector_rgba(&[1.0, 2.0], &[0.0], &params).is_err());
    }
}
