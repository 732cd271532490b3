//! Shared test infrastructure for the raster-ingest workspace: synthetic
//! GRIB2, NetCDF and GeoTIFF file builders, deterministic grid generators,
//! and approximate-equality assertions.
//!
//! Pull it in as a path dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod builders;
pub mod generators;

pub use builders::*;
pub use generators::*;

/// Asserts two floats agree within `epsilon` (default `1e-6` when omitted).
/// Operands are widened to f64 so mixed f32/f64 comparisons work.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_approx_eq!($left, $right, 1e-6)
    };
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left = $left as f64;
        let right = $right as f64;
        let diff = (left - right).abs();
        assert!(
            diff <= $epsilon as f64,
            "values differ by {diff}: {left} vs {right} (epsilon {})",
            $epsilon
        );
    }};
}

/// Asserts two grids match element-wise within `epsilon`, treating a NaN
/// in both as equal. Panics name the first mismatching index.
#[macro_export]
macro_rules! assert_grids_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: &[f32] = $left;
        let right: &[f32] = $right;
        assert_eq!(
            left.len(),
            right.len(),
            "grid lengths differ: {} vs {}",
            left.len(),
            right.len()
        );
        for (i, (a, b)) in left.iter().zip(right.iter()).enumerate() {
            if a.is_nan() && b.is_nan() {
                continue;
            }
            let diff = (*a as f64 - *b as f64).abs();
            if diff > $epsilon as f64 {
                panic!(
                    "grids differ at index {}: left `{:?}`, right `{:?}`, diff `{:?}` > epsilon `{:?}`",
                    i, a, b, diff, $epsilon
                );
            }
        }
    }};
}

#[cfg(test)]
mod tests {

    #[test]
    fn test_approx_eq_within_epsilon() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(-5.5_f32, -5.500001_f64, 0.0001);
    }

    #[test]
    #[should_panic(expected = "values differ")]
    fn test_approx_eq_outside_epsilon() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_grids_approx_eq_treats_nan_as_equal() {
        let a = [1.0_f32, f32::NAN, 3.0];
        let b = [1.0005_f32, f32::NAN, 3.0];
        assert_grids_approx_eq!(&a, &b, 0.001);
    }

    #[test]
    #[should_panic(expected = "grids differ at index 2")]
    fn test_grids_approx_eq_reports_index() {
        let a = [1.0_f32, 2.0, 3.0];
        let b = [1.0_f32, 2.0, 4.0];
        assert_grids_approx_eq!(&a, &b, 0.001);
    }
}
