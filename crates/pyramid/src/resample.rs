//! Grid resampling for pyramid levels.

/// Halve a grid by averaging full 2x2 blocks, dropping any odd remainder
/// row or column. NaN cells are excluded from the mean; a block with no
/// valid cells stays NaN.
pub fn coarsen_2x(data: &[f32], width: usize, height: usize) -> (Vec<f32>, usize, usize) {
    let out_w = width / 2;
    let out_h = height / 2;
    let mut out = vec![f32::NAN; out_w * out_h];
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0.0f64;
            let mut count = 0u32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let v = data[(oy * 2 + dy) * width + ox * 2 + dx];
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

/// Resample a source grid onto explicit target coordinate arrays.
///
/// Source pixels are addressed on the same edge-anchored convention the
/// coordinate arrays are built with: column 0 sits at `west`, the last
/// column at `east`, row 0 at `north`. Interpolation is bilinear; where a
/// neighbor is NaN or the target falls outside the source, the nearest
/// source pixel is used instead.
pub fn resample_to_coords(
    data: &[f32],
    width: usize,
    height: usize,
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    target_x: &[f64],
    target_y: &[f64],
) -> Vec<f32> {
    let mut out = Vec::with_capacity(target_x.len() * target_y.len());
    for &ty in target_y {
        let fy = fractional_index(north, south, height, ty);
        for &tx in target_x {
            let fx = fractional_index(west, east, width, tx);
            out.push(sample_bilinear(data, width, height, fx, fy));
        }
    }
    out
}

/// Map a coordinate onto a fractional index in `[0, len-1]`, clamped.
/// `start` is the coordinate of index 0, `end` of index len-1.
fn fractional_index(start: f64, end: f64, len: usize, coord: f64) -> f64 {
    if len < 2 || start == end {
        return 0.0;
    }
    let f = (coord - start) / (end - start) * (len - 1) as f64;
    f.clamp(0.0, (len - 1) as f64)
}

fn sample_bilinear(data: &[f32], width: usize, height: usize, fx: f64, fy: f64) -> f32 {
    let x0 = fx.floor() as usize;
    let y0 = fy.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let dx = fx - x0 as f64;
    let dy = fy - y0 as f64;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        // Nearest fill when the bilinear stencil is incomplete.
        let nx = if dx < 0.5 { x0 } else { x1 };
        let ny = if dy < 0.5 { y0 } else { y1 };
        return data[ny * width + nx];
    }

    let top = v00 as f64 * (1.0 - dx) + v10 as f64 * dx;
    let bottom = v01 as f64 * (1.0 - dx) + v11 as f64 * dx;
    (top * (1.0 - dy) + bottom * dy) as f32
}

/// Evenly spaced coordinates from `start` to `end` inclusive, matching the
/// convention used for pyramid level axes.
pub fn linspace(start: f64, end: f64, len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (len - 1) as f64;
            (0..len).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    #[test]
    fn test_coarsen_averages_blocks() {
        // 4x2: blocks [1,2,5,6] and [3,4,7,8].
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let (out, w, h) = coarsen_2x(&data, 4, 2);
        assert_eq!((w, h), (2, 1));
        assert_eq!(out, vec![3.5, 5.5]);
    }

    #[test]
    fn test_coarsen_trims_odd_remainder() {
        let data = vec![1.0f32; 5 * 3];
        let (out, w, h) = coarsen_2x(&data, 5, 3);
        assert_eq!((w, h), (2, 1));
        assert_eq!(out, vec![1.0, 1.0]);
    }

    #[test]
    fn test_coarsen_skips_nan() {
        let data = [4.0f32, f32::NAN, f32::NAN, 8.0];
        let (out, _, _) = coarsen_2x(&data, 2, 2);
        assert_eq!(out[0], 6.0);

        let all_nan = [f32::NAN; 4];
        let (out, _, _) = coarsen_2x(&all_nan, 2, 2);
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_linspace_endpoints() {
        let xs = linspace(0.0, 4.0, 5);
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(linspace(2.5, 9.9, 1), vec![2.5]);
        // Descending axes are valid, used for north-to-south y.
        let ys = linspace(44.0, 40.0, 5);
        assert_eq!(ys[0], 44.0);
        assert_eq!(ys[4], 40.0);
    }

    #[test]
    fn test_resample_identity_on_same_grid() {
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let xs = linspace(0.0, 2.0, 3);
        let ys = linspace(1.0, 0.0, 2);
        let out = resample_to_coords(&data, 3, 2, 0.0, 0.0, 2.0, 1.0, &xs, &ys);
        assert_eq!(out, data.to_vec());
    }

    #[test]
    fn test_resample_interpolates_midpoints() {
        // 2x2 going to a single centered point.
        let data = [0.0f32, 10.0, 20.0, 30.0];
        let out = resample_to_coords(&data, 2, 2, 0.0, 0.0, 1.0, 1.0, &[0.5], &[0.5]);
        assert_approx_eq!(out[0] as f64, 15.0, 1e-9);
    }

    #[test]
    fn test_resample_nearest_fill_near_nan() {
        let data = [0.0f32, f32::NAN, 20.0, 30.0];
        // Just right of center, nearest is the NaN corner's column.
        let out = resample_to_coords(&data, 2, 2, 0.0, 0.0, 1.0, 1.0, &[0.4], &[0.9]);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_resample_clamps_outside_bounds() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let out = resample_to_coords(&data, 2, 2, 0.0, 0.0, 1.0, 1.0, &[-5.0, 5.0], &[2.0]);
        assert_eq!(out, vec![1.0, 2.0]);
    }
}
