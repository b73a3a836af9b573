use tracing::debug;

use crate::buffer::{BufferDescriptor, BufferSet};
use crate::error::BindError;
use crate::memory::Memory;
use crate::surface::SurfaceBuffer;
use crate::CaptureAttributes;

/// Translates surface buffers into the descriptor set registered with the capture device
///
/// Exactly `attrs.buffer_count` descriptors are produced, one per surface buffer and in surface
/// buffer order. Surplus surface buffers (the presentation slack) are not exposed to the device.
/// Each descriptor is a single plane of the attribute geometry whose size is `stride * height`.
///
/// # Arguments
///
/// * `surface` - Buffers allocated by the display surface
/// * `attrs` - Resolved capture attributes
///
/// # Example
///
/// ```
/// use surfcam::io::binder;
/// use surfcam::memory::NativeHandle;
/// use surfcam::surface::SurfaceBuffer;
/// use surfcam::{CaptureAttributes, FourCC, InputId};
///
/// let surface: Vec<SurfaceBuffer> = (0..3)
///     .map(|i| SurfaceBuffer {
///         handle: NativeHandle(i),
///         ptr: std::ptr::null_mut(),
///         stride: 1280,
///         size: 1280 * 480,
///     })
///     .collect();
/// let attrs = CaptureAttributes {
///     format: Some(FourCC::UYVY),
///     width: Some(640),
///     height: Some(480),
///     buffer_count: 2,
///     ..CaptureAttributes::new("cam", InputId(0))
/// };
///
/// let set = binder::bind(&surface, &attrs).unwrap();
/// assert_eq!(set.len(), 2);
/// assert_eq!(set.get(1).unwrap().size, 1280 * 480);
/// ```
pub fn bind(surface: &[SurfaceBuffer], attrs: &CaptureAttributes) -> Result<BufferSet, BindError> {
    let format = attrs.format.ok_or(BindError::UnresolvedFormat)?;
    let (width, height) = match (attrs.width, attrs.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        (width, height) => return Err(BindError::InvalidGeometry { width, height }),
    };

    let required = attrs.buffer_count as usize;
    if required == 0 || surface.len() < required {
        return Err(BindError::NotEnoughBuffers {
            required,
            available: surface.len(),
        });
    }

    let mut buffers = Vec::with_capacity(required);
    for (index, buf) in surface.iter().take(required).enumerate() {
        let size = buf
            .stride
            .checked_mul(height)
            .ok_or(BindError::InvalidGeometry {
                width: Some(width),
                height: Some(height),
            })?;
        let desc = BufferDescriptor {
            planes: 1,
            width,
            height,
            stride: buf.stride,
            size,
            handle: buf.handle,
        };
        debug!(index, descriptor = %desc, "bound surface buffer");
        buffers.push(desc);
    }

    Ok(BufferSet::new(format, Memory::OsHandle, buffers))
}
