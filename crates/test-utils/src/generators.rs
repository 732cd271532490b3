//! Deterministic grid generators shared across the test suite.

/// Grid where every cell encodes its own position as `col * 1000 + row`.
///
/// Any windowed or resampled read can then be checked cell-by-cell: the
/// value at `(col, row)` is wrong the moment rows and columns are swapped,
/// flipped, or offset.
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Zero-filled grid with NaN holes at the given `(col, row)` positions.
/// Positions outside the grid are ignored.
pub fn create_grid_with_nans(
    width: usize,
    height: usize,
    nan_positions: &[(usize, usize)],
) -> Vec<f32> {
    let mut data = vec![0.0f32; width * height];
    for &(col, row) in nan_positions {
        if col < width && row < height {
            data[row * width + col] = f32::NAN;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_encodes_position() {
        let grid = create_test_grid(10, 5);
        assert_eq!(grid.len(), 50);
        // Row-major: walking one row advances by 1000 per column.
        assert_eq!(&grid[..3], &[0.0, 1000.0, 2000.0]);
        // Next row starts back at col 0 with row=1.
        assert_eq!(grid[10], 1.0);
        assert_eq!(grid[49], 9004.0);
    }

    #[test]
    fn test_nan_holes_land_row_major() {
        let grid = create_grid_with_nans(10, 10, &[(5, 5), (0, 0), (99, 99)]);
        assert!(grid[0].is_nan());
        assert!(grid[55].is_nan());
        assert_eq!(grid.iter().filter(|v| v.is_nan()).count(), 2);
    }
}
