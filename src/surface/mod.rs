//! Display surface collaborator
//!
//! A surface is a presentable window whose buffers are shared with the capture device for
//! zero-copy delivery. The core only needs to allocate buffers, post one of them and toggle
//! visibility; everything else about the windowing system stays behind [`SurfaceProvider`].

use std::{fmt, io, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::memory::NativeHandle;
use crate::{FourCC, Resolution};

pub mod geometry;
pub use geometry::WindowGeometry;

#[cfg(target_os = "linux")]
pub mod host;
#[cfg(target_os = "linux")]
pub use host::{HostSurface, HostSurfaceProvider};

/// Pair of scale factors, relative to a display or buffer size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ratio {
    pub x: f64,
    pub y: f64,
}

impl Ratio {
    pub const fn new(x: f64, y: f64) -> Self {
        Ratio { x, y }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// How a surface is placed on its display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceSpec {
    /// Window size as ratio of the display size
    pub window_size: Ratio,
    /// Window position as ratio of the display size
    pub window_pos: Ratio,
    /// Visible part of the buffer as ratio of the buffer size
    pub source_size: Ratio,
    /// Offset of the visible part as ratio of the buffer size
    pub source_pos: Ratio,
    /// Index of the display the window goes to
    pub display: u32,
    /// Position in the Z plane, compositor default if unset
    pub zorder: Option<i32>,
    /// Initial visibility
    pub visible: bool,
}

impl Default for SurfaceSpec {
    fn default() -> Self {
        SurfaceSpec {
            window_size: Ratio::new(1.0, 1.0),
            window_pos: Ratio::new(0.0, 0.0),
            source_size: Ratio::new(1.0, 1.0),
            source_pos: Ratio::new(0.0, 0.0),
            display: 0,
            zorder: None,
            visible: true,
        }
    }
}

/// A surface buffer as exposed to the capture side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceBuffer {
    /// Handle the capture device writes through
    pub handle: NativeHandle,
    /// CPU address of the buffer memory
    pub ptr: *mut u8,
    /// Bytes per line
    pub stride: u32,
    /// Size of the buffer in bytes
    pub size: u32,
}

// The pointer is only an address exported by the compositor; it is never dereferenced by the
// core.
unsafe impl Send for SurfaceBuffer {}
unsafe impl Sync for SurfaceBuffer {}

/// A presentable drawing surface
///
/// All methods take `&self`: presentation happens on the session's delivery worker while
/// visibility is toggled from the control thread.
pub trait Surface: Send + Sync {
    /// Allocate `count` buffers of the given geometry
    ///
    /// Returns the buffers in presentation index order.
    fn allocate_buffers(&self, count: usize, size: Resolution) -> io::Result<Vec<SurfaceBuffer>>;

    /// Post the buffer at `index` for presentation
    fn present(&self, index: usize) -> io::Result<()>;

    /// Show or hide the surface
    fn set_visible(&self, visible: bool) -> io::Result<()>;

    /// Resize and move the window, both relative to the display size
    fn set_geometry(&self, size: Ratio, pos: Ratio) -> io::Result<()> {
        let _ = (size, pos);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "surface cannot be reconfigured",
        ))
    }
}

/// Display surface protocol
pub trait SurfaceProvider: Send + Sync {
    /// Create a surface for buffers of `size` in `format`
    fn create_surface(
        &self,
        spec: &SurfaceSpec,
        size: Resolution,
        format: FourCC,
    ) -> io::Result<Arc<dyn Surface>>;
}
