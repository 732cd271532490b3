//! Pixel windows and the chunked-read tiler.

/// Default tile edge for chunked processing. 2048x2048 f32 is 16 MiB per
/// window buffer, which keeps peak memory bounded even for hemispheric grids.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// A rectangular pixel sub-region of a raster, in row/column space.
///
/// `x` is the column offset, `y` the row offset from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-raster window.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp this window to a raster of the given dimensions. Windows that
    /// start beyond the raster collapse to zero size.
    pub fn clamp_to(&self, raster_width: usize, raster_height: usize) -> Self {
        let x = self.x.min(raster_width);
        let y = self.y.min(raster_height);
        Self {
            x,
            y,
            width: self.width.min(raster_width - x),
            height: self.height.min(raster_height - y),
        }
    }
}

/// Row-major tiling of a raster extent into blocks of at most
/// `block_size` x `block_size` pixels. The last row/column of tiles is
/// clipped to the remaining extent.
pub fn iter_windows(width: usize, height: usize, block_size: usize) -> WindowIter {
    WindowIter {
        width,
        height,
        block_size: block_size.max(1),
        x: 0,
        y: 0,
    }
}

pub struct WindowIter {
    width: usize,
    height: usize,
    block_size: usize,
    x: usize,
    y: usize,
}

impl Iterator for WindowIter {
    type Item = PixelWindow;

    fn next(&mut self) -> Option<PixelWindow> {
        if self.y >= self.height || self.width == 0 {
            return None;
        }

        let w = self.block_size.min(self.width - self.x);
        let h = self.block_size.min(self.height - self.y);
        let window = PixelWindow::new(self.x, self.y, w, h);

        self.x += self.block_size;
        if self.x >= self.width {
            self.x = 0;
            self.y += self.block_size;
        }

        Some(window)
    }
}
