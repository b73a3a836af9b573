use std::fmt;

use crate::surface::{Ratio, SurfaceSpec};
use crate::Resolution;

/// Window and source rectangles of a surface, in pixels
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    /// Window size on the display
    pub size: [i32; 2],
    /// Window position on the display
    pub pos: [i32; 2],
    /// Part of the buffer shown in the window
    pub source_size: [i32; 2],
    /// Offset of the shown part within the buffer
    pub source_pos: [i32; 2],
}

fn scale(ratio: Ratio, base: Resolution) -> [i32; 2] {
    [
        (ratio.x * base.width as f64) as i32,
        (ratio.y * base.height as f64) as i32,
    ]
}

impl WindowGeometry {
    /// Computes the geometry of a surface on `display` showing buffers of `buffer` size
    ///
    /// A non-positive window size falls back to the whole display. A source rectangle that is
    /// empty or reaches past the buffer is clamped to the buffer.
    ///
    /// # Example
    ///
    /// ```
    /// use surfcam::surface::{Ratio, SurfaceSpec, WindowGeometry};
    /// use surfcam::Resolution;
    ///
    /// let spec = SurfaceSpec {
    ///     window_size: Ratio::new(0.5, 0.5),
    ///     window_pos: Ratio::new(0.25, 0.25),
    ///     ..SurfaceSpec::default()
    /// };
    /// let geo = WindowGeometry::new(&spec, Resolution::new(1920, 1080), Resolution::new(1280, 720));
    /// assert_eq!(geo.rect(), [480, 270, 960, 540]);
    /// ```
    pub fn new(spec: &SurfaceSpec, display: Resolution, buffer: Resolution) -> Self {
        let mut size = scale(spec.window_size, display);
        if size[0] <= 0 || size[1] <= 0 {
            size = [display.width as i32, display.height as i32];
        }

        let mut geometry = WindowGeometry {
            size,
            pos: scale(spec.window_pos, display),
            source_size: scale(spec.source_size, buffer),
            source_pos: scale(spec.source_pos, buffer),
        };
        geometry.clamp_source(buffer);
        geometry
    }

    /// Moves and resizes the window, keeping the source rectangle
    pub fn reposition(&mut self, size: Ratio, pos: Ratio, display: Resolution) {
        self.size = scale(size, display);
        self.pos = scale(pos, display);
    }

    fn clamp_source(&mut self, buffer: Resolution) {
        let (width, height) = (buffer.width as i32, buffer.height as i32);
        if self.source_size[0] <= 0
            || self.source_size[1] <= 0
            || self.source_size[0] + self.source_pos[0] > width
            || self.source_size[1] + self.source_pos[1] > height
        {
            self.source_size = [width - self.source_pos[0], height - self.source_pos[1]];
        }
    }

    /// The window rectangle as `[x, y, width, height]`
    pub fn rect(&self) -> [i32; 4] {
        [self.pos[0], self.pos[1], self.size[0], self.size[1]]
    }
}

impl fmt::Display for WindowGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window {}x{} at ({}, {}), source {}x{} at ({}, {})",
            self.size[0],
            self.size[1],
            self.pos[0],
            self.pos[1],
            self.source_size[0],
            self.source_size[1],
            self.source_pos[0],
            self.source_pos[1],
        )
    }
}
