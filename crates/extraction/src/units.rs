//! Named unit conversions applied after extraction.
//!
//! Conversions are referenced by name from catalog configs. An unknown
//! name passes values through unchanged so a config typo degrades to raw
//! units instead of failing the whole file.

use tracing::debug;

const KNOWN: &[&str] = &["K_to_C", "Pa_to_hPa", "m_to_mm", "ms_to_kmh", "kgm2s_to_mm"];

pub fn is_known(conversion: &str) -> bool {
    KNOWN.contains(&conversion)
}

pub fn convert_value(value: f32, conversion: &str) -> f32 {
    match conversion {
        "K_to_C" => value - 273.15,
        "Pa_to_hPa" => value * 0.01,
        "m_to_mm" => value * 1000.0,
        "ms_to_kmh" => value * 3.6,
        // Flux rate over one hour of accumulation.
        "kgm2s_to_mm" => value * 3600.0,
        _ => value,
    }
}

pub fn apply(values: &mut [f32], conversion: &str) {
    if !is_known(conversion) {
        debug!(conversion, "Unknown unit conversion, passing values through");
        return;
    }
    for v in values.iter_mut() {
        *v = convert_value(*v, conversion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kelvin_to_celsius() {
        assert!((convert_value(300.0, "K_to_C") - 26.85).abs() < 1e-4);
        assert!((convert_value(273.15, "K_to_C")).abs() < 1e-4);
    }

    #[test]
    fn test_pascal_to_hectopascal() {
        assert!((convert_value(101_325.0, "Pa_to_hPa") - 1013.25).abs() < 1e-4);
    }

    #[test]
    fn test_speed_and_precipitation() {
        assert!((convert_value(10.0, "ms_to_kmh") - 36.0).abs() < 1e-4);
        assert!((convert_value(0.005, "m_to_mm") - 5.0).abs() < 1e-4);
        assert!((convert_value(0.001, "kgm2s_to_mm") - 3.6).abs() < 1e-4);
    }

    #[test]
    fn test_unknown_conversion_is_identity() {
        let mut values = vec![1.0, 2.0, f32::NAN];
        apply(&mut values, "furlongs_to_parsecs");
        assert_eq!(values[0], 1.0);
        assert_eq!(values[1], 2.0);
        assert!(values[2].is_nan());
    }

    #[test]
    fn test_apply_preserves_nan() {
        let mut values = vec![300.0, f32::NAN];
        apply(&mut values, "K_to_C");
        assert!((values[0] - 26.85).abs() < 1e-4);
        assert!(values[1].is_nan());
    }
}
