//! Boundary clipping.
//!
//! A catalog's boundary restricts outputs to a region: [`compute_window`]
//! intersects the boundary bbox with the source extent and snaps it to the
//! source pixel grid, [`create_mask`] rasterizes the boundary polygon, and
//! the apply functions blank data (to NaN) or alpha (to 0) outside it. The
//! window's output bounds are recomputed from the integer pixel offsets, so
//! clipped rasters stay aligned with the source grid instead of drifting to
//! wherever the boundary bbox happened to fall.

use raster_common::{
    Boundary, Bounds, Catalog, ClipMode, PixelWindow, RasterError, RasterResult,
};

/// Pixel-aligned clip region within one source grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipWindow {
    pub x_off: usize,
    pub y_off: usize,
    pub width: usize,
    pub height: usize,
    /// Exact geographic bounds of the integer pixel window.
    pub bounds: Bounds,
    pub res_x: f64,
    pub res_y: f64,
}

impl ClipWindow {
    pub fn pixel_window(&self) -> PixelWindow {
        PixelWindow::new(self.x_off, self.y_off, self.width, self.height)
    }
}

/// Intersect a boundary bbox with the source extent and snap the result to
/// the source pixel grid. Offsets clamp to the raster, the window always
/// spans at least one pixel, and the returned bounds are derived from the
/// clamped integer window.
pub fn compute_window(
    source_bounds: &Bounds,
    source_width: usize,
    source_height: usize,
    boundary: &Bounds,
) -> RasterResult<ClipWindow> {
    if source_width == 0 || source_height == 0 {
        return Err(RasterError::InternalError(format!(
            "Cannot clip an empty {}x{} raster",
            source_width, source_height
        )));
    }

    let intersection = source_bounds.intersection(boundary).ok_or_else(|| {
        RasterError::GeometryError(format!(
            "Boundary {:?} does not intersect source extent {:?}",
            boundary.to_array(),
            source_bounds.to_array()
        ))
    })?;

    let res_x = source_bounds.width() / source_width as f64;
    let res_y = source_bounds.height() / source_height as f64;

    let x_off = ((intersection.west - source_bounds.west) / res_x).floor() as i64;
    let y_off = ((source_bounds.north - intersection.north) / res_y).floor() as i64;
    let x_end = ((intersection.east - source_bounds.west) / res_x).ceil() as i64;
    let y_end = ((source_bounds.north - intersection.south) / res_y).ceil() as i64;

    let x_off = x_off.clamp(0, source_width as i64 - 1) as usize;
    let y_off = y_off.clamp(0, source_height as i64 - 1) as usize;
    let x_end = x_end.clamp(x_off as i64 + 1, source_width as i64) as usize;
    let y_end = y_end.clamp(y_off as i64 + 1, source_height as i64) as usize;

    let width = x_end - x_off;
    let height = y_end - y_off;

    let west = source_bounds.west + x_off as f64 * res_x;
    let north = source_bounds.north - y_off as f64 * res_y;
    let bounds = Bounds::new(
        west,
        north - height as f64 * res_y,
        west + width as f64 * res_x,
        north,
    );

    Ok(ClipWindow {
        x_off,
        y_off,
        width,
        height,
        bounds,
        res_x,
        res_y,
    })
}

/// Rasterize a polygon ring onto a grid: true inside, false outside.
/// Containment is tested at pixel centers with an even-odd ray cast;
/// pixels outside the ring's bbox are rejected without the cast.
pub fn create_mask(ring: &[[f64; 2]], bounds: &Bounds, width: usize, height: usize) -> Vec<bool> {
    let mut mask = vec![false; width * height];
    if ring.len() < 3 || width == 0 || height == 0 {
        return mask;
    }

    let res_x = bounds.width() / width as f64;
    let res_y = bounds.height() / height as f64;

    let mut ring_west = f64::INFINITY;
    let mut ring_south = f64::INFINITY;
    let mut ring_east = f64::NEG_INFINITY;
    let mut ring_north = f64::NEG_INFINITY;
    for p in ring {
        ring_west = ring_west.min(p[0]);
        ring_south = ring_south.min(p[1]);
        ring_east = ring_east.max(p[0]);
        ring_north = ring_north.max(p[1]);
    }

    for row in 0..height {
        let y = bounds.north - (row as f64 + 0.5) * res_y;
        if y < ring_south || y > ring_north {
            continue;
        }
        for col in 0..width {
            let x = bounds.west + (col as f64 + 0.5) * res_x;
            if x < ring_west || x > ring_east {
                continue;
            }
            if point_in_ring(x, y, ring) {
                mask[row * width + col] = true;
            }
        }
    }

    mask
}

fn point_in_ring(x: f64, y: f64, ring: &[[f64; 2]]) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Copy of `data` with pixels outside the mask replaced by NaN.
pub fn apply_geometry_mask(data: &[f32], mask: &[bool]) -> RasterResult<Vec<f32>> {
    if data.len() != mask.len() {
        return Err(RasterError::InternalError(format!(
            "Mask has {} pixels but data has {}",
            mask.len(),
            data.len()
        )));
    }
    Ok(data
        .iter()
        .zip(mask)
        .map(|(&v, &keep)| if keep { v } else { f32::NAN })
        .collect())
}

/// Copy of an RGBA buffer with alpha zeroed outside the mask.
pub fn apply_rgba_mask(pixels: &[u8], mask: &[bool]) -> RasterResult<Vec<u8>> {
    if pixels.len() != mask.len() * 4 {
        return Err(RasterError::InternalError(format!(
            "RGBA buffer is {} bytes, expected {} for the mask",
            pixels.len(),
            mask.len() * 4
        )));
    }
    let mut out = pixels.to_vec();
    for (i, &keep) in mask.iter().enumerate() {
        if !keep {
            out[i * 4 + 3] = 0;
        }
    }
    Ok(out)
}

/// A catalog's boundary plus its clip mode, resolved once per file.
pub struct Clipper {
    boundary: Boundary,
    mode: ClipMode,
}

impl Clipper {
    pub fn new(boundary: Boundary, mode: ClipMode) -> Self {
        Self { boundary, mode }
    }

    /// The clipper for a catalog, or None when the catalog does not clip.
    pub fn from_catalog(catalog: &Catalog) -> Option<Self> {
        match (catalog.clip_mode, &catalog.boundary) {
            (ClipMode::None, _) | (_, None) => None,
            (mode, Some(boundary)) => Some(Self::new(boundary.clone(), mode)),
        }
    }

    pub fn mode(&self) -> ClipMode {
        self.mode
    }

    pub fn compute_window(
        &self,
        source_bounds: &Bounds,
        source_width: usize,
        source_height: usize,
    ) -> RasterResult<ClipWindow> {
        compute_window(
            source_bounds,
            source_width,
            source_height,
            &self.boundary.bounds(),
        )
    }

    /// Polygon mask for a computed window. None in bbox mode, where the
    /// rectangular crop is the whole clip.
    pub fn mask_for(&self, window: &ClipWindow) -> Option<Vec<bool>> {
        match self.mode {
            ClipMode::Mask => Some(create_mask(
                &self.boundary.ring(),
                &window.bounds,
                window.width,
                window.height,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degree_grid() -> Bounds {
        // 20x10 one-degree pixels.
        Bounds::new(-10.0, 40.0, 10.0, 50.0)
    }

    #[test]
    fn test_window_snaps_to_pixel_grid() {
        let source = degree_grid();
        let boundary = Bounds::new(-2.5, 43.2, 4.1, 47.9);
        let w = compute_window(&source, 20, 10, &boundary).unwrap();

        assert_eq!((w.x_off, w.y_off), (7, 2));
        assert_eq!((w.width, w.height), (8, 5));
        assert_eq!(w.bounds.to_array(), [-3.0, 43.0, 5.0, 48.0]);
    }

    #[test]
    fn test_window_bounds_match_pixel_count() {
        let source = Bounds::new(-11.3, 34.7, 5.9, 44.1);
        let boundary = Bounds::new(-9.1, 36.0, 3.3, 43.5);
        let w = compute_window(&source, 517, 301, &boundary).unwrap();

        let width_back = (w.bounds.width() / w.res_x).round() as usize;
        let height_back = (w.bounds.height() / w.res_y).round() as usize;
        assert_eq!((width_back, height_back), (w.width, w.height));
    }

    #[test]
    fn test_window_clamps_to_source() {
        let source = degree_grid();
        let boundary = Bounds::new(-30.0, 0.0, 30.0, 90.0);
        let w = compute_window(&source, 20, 10, &boundary).unwrap();

        assert_eq!((w.x_off, w.y_off), (0, 0));
        assert_eq!((w.width, w.height), (20, 10));
        assert_eq!(w.bounds, source);
    }

    #[test]
    fn test_disjoint_boundary_is_geometry_error() {
        let source = degree_grid();
        let boundary = Bounds::new(100.0, -20.0, 120.0, -10.0);
        let err = compute_window(&source, 20, 10, &boundary).unwrap_err();
        assert!(matches!(err, RasterError::GeometryError(_)));
    }

    #[test]
    fn test_mask_triangle() {
        // Right triangle covering the lower-left half of the unit square.
        let ring = vec![[0.0, 0.0], [4.0, 0.0], [0.0, 4.0]];
        let bounds = Bounds::new(0.0, 0.0, 4.0, 4.0);
        let mask = create_mask(&ring, &bounds, 4, 4);

        // Bottom-left pixel center (0.5, 0.5) is inside, top-right is not.
        assert!(mask[3 * 4]);
        assert!(!mask[3]);
        let inside = mask.iter().filter(|&&m| m).count();
        assert_eq!(inside, 6);
    }

    #[test]
    fn test_mask_rectangle_ring_covers_interior() {
        let ring = vec![[1.0, 1.0], [3.0, 1.0], [3.0, 3.0], [1.0, 3.0]];
        let bounds = Bounds::new(0.0, 0.0, 4.0, 4.0);
        let mask = create_mask(&ring, &bounds, 4, 4);

        for row in 0..4 {
            for col in 0..4 {
                let expected = (1..3).contains(&row) && (1..3).contains(&col);
                assert_eq!(mask[row * 4 + col], expected, "pixel ({}, {})", row, col);
            }
        }
    }

    #[test]
    fn test_degenerate_ring_masks_nothing() {
        let ring = vec![[0.0, 0.0], [1.0, 1.0]];
        let bounds = Bounds::new(0.0, 0.0, 4.0, 4.0);
        assert!(create_mask(&ring, &bounds, 4, 4).iter().all(|&m| !m));
    }

    #[test]
    fn test_apply_geometry_mask_copies() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let mask = vec![true, false, true, false];
        let out = apply_geometry_mask(&data, &mask).unwrap();

        assert_eq!(out[0], 1.0);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 3.0);
        assert!(out[3].is_nan());
        assert_eq!(data[1], 2.0);
    }

    #[test]
    fn test_apply_rgba_mask_zeroes_alpha_only() {
        let pixels = vec![10, 20, 30, 255, 40, 50, 60, 255];
        let mask = vec![true, false];
        let out = apply_rgba_mask(&pixels, &mask).unwrap();

        assert_eq!(out, vec![10, 20, 30, 255, 40, 50, 60, 0]);
        assert_eq!(pixels[7], 255);
    }

    #[test]
    fn test_apply_mask_length_mismatch() {
        assert!(apply_geometry_mask(&[1.0], &[true, false]).is_err());
        assert!(apply_rgba_mask(&[0, 0, 0, 255], &[true, true]).is_err());
    }

    #[test]
    fn test_clipper_from_catalog_respects_mode() {
        let mut catalog = raster_common::Catalog {
            slug: "weather".into(),
            title: None,
            provider: None,
            license: None,
            file_format: raster_common::FileFormat::Grib,
            clip_mode: ClipMode::Mask,
            boundary: Some(Boundary {
                bbox: [-10.0, 40.0, 10.0, 50.0],
                polygon: None,
            }),
            archive_source_files: true,
            is_active: true,
            collections: vec![],
        };

        assert!(Clipper::from_catalog(&catalog).is_some());

        catalog.clip_mode = ClipMode::None;
        assert!(Clipper::from_catalog(&catalog).is_none());

        catalog.clip_mode = ClipMode::Bbox;
        catalog.boundary = None;
        assert!(Clipper::from_catalog(&catalog).is_none());
    }

    #[test]
    fn test_bbox_mode_has_no_mask() {
        let boundary = Boundary {
            bbox: [0.0, 0.0, 4.0, 4.0],
            polygon: None,
        };
        let window = ClipWindow {
            x_off: 0,
            y_off: 0,
            width: 4,
            height: 4,
            bounds: Bounds::new(0.0, 0.0, 4.0, 4.0),
            res_x: 1.0,
            res_y: 1.0,
        };

        let bbox = Clipper::new(boundary.clone(), ClipMode::Bbox);
        assert!(bbox.mask_for(&window).is_none());

        let mask = Clipper::new(boundary, ClipMode::Mask);
        let m = mask.mask_for(&window).unwrap();
        assert!(m.iter().all(|&inside| inside));
    }
}
