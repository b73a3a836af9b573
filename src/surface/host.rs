//! Headless surfaces backed by host shared memory
//!
//! Every buffer is a memfd mapped into this process. The descriptor doubles as the native
//! handle, so it can be passed to any capture backend that accepts OS handles. Presentation
//! only records which buffer is in front, which is what a compositor would scan out.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::memory::{Mmap, NativeHandle};
use crate::surface::{Ratio, Surface, SurfaceBuffer, SurfaceProvider, SurfaceSpec, WindowGeometry};
use crate::{FourCC, Resolution};

/// Line alignment applied to every buffer
const STRIDE_ALIGN: u32 = 64;

/// Creates [`HostSurface`]s on a fixed set of displays
#[derive(Debug, Clone)]
pub struct HostSurfaceProvider {
    displays: Vec<Resolution>,
}

impl HostSurfaceProvider {
    /// Returns a provider for displays of the given sizes, indexed by display id
    pub fn new(displays: Vec<Resolution>) -> Self {
        HostSurfaceProvider { displays }
    }
}

impl HostSurfaceProvider {
    /// Creates a surface with its concrete type
    pub fn create(
        &self,
        spec: &SurfaceSpec,
        size: Resolution,
        format: FourCC,
    ) -> io::Result<HostSurface> {
        let display_size = *self.displays.get(spec.display as usize).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no display with id {}", spec.display),
            )
        })?;
        let bpp = format.bytes_per_pixel().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported surface format {}", format),
            )
        })?;

        let geometry = WindowGeometry::new(spec, display_size, size);
        debug!(
            display = spec.display,
            size = %display_size,
            %geometry,
            %format,
            "host surface created"
        );

        Ok(HostSurface {
            display: display_size,
            format,
            bpp,
            state: Mutex::new(HostState {
                geometry,
                buffers: Vec::new(),
                visible: spec.visible,
                front: None,
                posts: 0,
            }),
        })
    }
}

impl SurfaceProvider for HostSurfaceProvider {
    fn create_surface(
        &self,
        spec: &SurfaceSpec,
        size: Resolution,
        format: FourCC,
    ) -> io::Result<Arc<dyn Surface>> {
        Ok(Arc::new(self.create(spec, size, format)?))
    }
}

#[derive(Debug)]
struct HostBuffer {
    // unmapped before the descriptor is closed
    map: Mmap,
    fd: OwnedFd,
    stride: u32,
}

#[derive(Debug)]
struct HostState {
    geometry: WindowGeometry,
    buffers: Vec<HostBuffer>,
    visible: bool,
    front: Option<usize>,
    posts: u64,
}

/// Surface whose buffers live in memfd-backed shared memory
#[derive(Debug)]
pub struct HostSurface {
    display: Resolution,
    format: FourCC,
    bpp: u32,
    state: Mutex<HostState>,
}

fn memfd(name: &str, len: usize) -> io::Result<OwnedFd> {
    let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

impl HostSurface {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pixel format of the surface
    pub fn format(&self) -> FourCC {
        self.format
    }

    /// Index of the buffer posted last
    pub fn front(&self) -> Option<usize> {
        self.lock().front
    }

    /// Number of successful posts
    pub fn posts(&self) -> u64 {
        self.lock().posts
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.lock().geometry
    }
}

/// Aligned stride and total length of one buffer, `None` if either does not fit in `u32`
fn buffer_layout(size: Resolution, bpp: u32) -> Option<(u32, u32)> {
    let line = size.width.checked_mul(bpp)?;
    let stride = line.checked_add(STRIDE_ALIGN - 1)? / STRIDE_ALIGN * STRIDE_ALIGN;
    let len = stride.checked_mul(size.height)?;
    Some((stride, len))
}

impl Surface for HostSurface {
    fn allocate_buffers(&self, count: usize, size: Resolution) -> io::Result<Vec<SurfaceBuffer>> {
        if !size.is_valid() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid buffer size {}", size),
            ));
        }
        let (stride, size_bytes) = buffer_layout(size, self.bpp).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer size {} overflows", size),
            )
        })?;
        let len = size_bytes as usize;

        let mut buffers = Vec::with_capacity(count);
        for index in 0..count {
            let fd = memfd(&format!("surfcam-{}", index), len)?;
            let map = Mmap::map(fd.as_raw_fd(), len)?;
            trace!(index, fd = fd.as_raw_fd(), ptr = ?map.as_ptr(), len, "host buffer mapped");
            buffers.push(HostBuffer { map, fd, stride });
        }

        let exported = buffers
            .iter()
            .map(|buf| SurfaceBuffer {
                handle: NativeHandle(buf.fd.as_raw_fd() as i64),
                ptr: buf.map.as_ptr(),
                stride: buf.stride,
                size: size_bytes,
            })
            .collect();

        let mut state = self.lock();
        state.buffers = buffers;
        state.front = None;
        debug!(count, %size, stride, "host buffers allocated");
        Ok(exported)
    }

    fn present(&self, index: usize) -> io::Result<()> {
        let mut state = self.lock();
        if index >= state.buffers.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no surface buffer {}", index),
            ));
        }
        state.front = Some(index);
        state.posts += 1;
        trace!(index, rect = ?state.geometry.rect(), "buffer posted");
        Ok(())
    }

    fn set_visible(&self, visible: bool) -> io::Result<()> {
        self.lock().visible = visible;
        Ok(())
    }

    fn set_geometry(&self, size: Ratio, pos: Ratio) -> io::Result<()> {
        let mut state = self.lock();
        state.geometry.reposition(size, pos, self.display);
        debug!(geometry = %state.geometry, "host surface reconfigured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HostSurfaceProvider {
        HostSurfaceProvider::new(vec![Resolution::new(1920, 1080)])
    }

    #[test]
    fn buffers_are_mapped_and_aligned() {
        let surface = provider()
            .create(&SurfaceSpec::default(), Resolution::new(100, 10), FourCC::UYVY)
            .unwrap();
        let buffers = surface.allocate_buffers(3, Resolution::new(100, 10)).unwrap();

        assert_eq!(buffers.len(), 3);
        for buf in &buffers {
            assert_eq!(buf.stride, 256);
            assert_eq!(buf.size, 2560);
            assert!(!buf.ptr.is_null());
        }
        assert_ne!(buffers[0].handle, buffers[1].handle);

        // the mapping is writable
        unsafe { buffers[2].ptr.write_bytes(0x80, buffers[2].size as usize) };
    }

    #[test]
    fn present_tracks_the_front_buffer() {
        let surface = provider()
            .create(&SurfaceSpec::default(), Resolution::new(64, 64), FourCC::RGBA)
            .unwrap();
        surface.allocate_buffers(2, Resolution::new(64, 64)).unwrap();

        surface.present(1).unwrap();
        surface.present(0).unwrap();
        assert!(surface.present(2).is_err());
        assert_eq!(surface.front(), Some(0));
        assert_eq!(surface.posts(), 2);
        assert_eq!(surface.format(), FourCC::RGBA);
    }

    #[test]
    fn visibility_and_geometry() {
        let spec = SurfaceSpec {
            visible: false,
            ..SurfaceSpec::default()
        };
        let surface = provider()
            .create(&spec, Resolution::new(1920, 1080), FourCC::UYVY)
            .unwrap();
        assert!(!surface.is_visible());
        surface.set_visible(true).unwrap();
        assert!(surface.is_visible());

        surface
            .set_geometry(Ratio::new(0.5, 0.5), Ratio::new(0.5, 0.0))
            .unwrap();
        assert_eq!(surface.geometry().rect(), [960, 0, 960, 540]);
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        let surface = provider()
            .create(&SurfaceSpec::default(), Resolution::new(64, 64), FourCC::RGBA)
            .unwrap();

        // the line length alone overflows
        let err = surface
            .allocate_buffers(2, Resolution::new(u32::MAX / 2, 2))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        // every line fits, the whole buffer does not
        let err = surface
            .allocate_buffers(2, Resolution::new(65536, 65536))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        assert_eq!(buffer_layout(Resolution::new(100, 10), 2), Some((256, 2560)));
        assert_eq!(buffer_layout(Resolution::new(u32::MAX / 4, 1), 4), None);
    }

    #[test]
    fn rejects_unknown_display_and_format() {
        let spec = SurfaceSpec {
            display: 3,
            ..SurfaceSpec::default()
        };
        assert_eq!(
            provider()
                .create(&spec, Resolution::new(64, 64), FourCC::UYVY)
                .unwrap_err()
                .kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            provider()
                .create(&SurfaceSpec::default(), Resolution::new(64, 64), FourCC::new(b"MJPG"))
                .unwrap_err()
                .kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
