use std::{fmt, slice};

use crate::memory::{Memory, NativeHandle};
use crate::{FourCC, Timestamp};

/// Per-buffer geometry and memory handle as expected by the capture device
///
/// Descriptors are derived from surface buffers once during session setup and never change
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Number of image planes, always 1 for surface-backed buffers
    pub planes: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per line
    pub stride: u32,
    /// Size of the plane in bytes (stride * height)
    pub size: u32,
    /// Memory the device writes into
    pub handle: NativeHandle,
}

impl fmt::Display for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} stride {} size {}",
            self.handle, self.width, self.height, self.stride, self.size
        )
    }
}

/// The complete buffer list registered with a capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSet {
    /// Pixel format shared by all buffers
    pub format: FourCC,
    /// How the descriptor handles are to be interpreted
    pub memory: Memory,
    buffers: Vec<BufferDescriptor>,
}

impl BufferSet {
    pub fn new(format: FourCC, memory: Memory, buffers: Vec<BufferDescriptor>) -> Self {
        BufferSet {
            format,
            memory,
            buffers,
        }
    }

    /// Number of buffers in the set
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Access a single buffer
    pub fn get(&self, index: usize) -> Option<&BufferDescriptor> {
        self.buffers.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, BufferDescriptor> {
        self.buffers.iter()
    }
}

impl<'a> IntoIterator for &'a BufferSet {
    type Item = &'a BufferDescriptor;
    type IntoIter = slice::Iter<'a, BufferDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.buffers.iter()
    }
}

/// Buffer metadata, mostly used not to convolute the main buffer structs
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Sequence number, counting the frames
    pub sequence: u32,
    /// Time of capture (usually set by the driver)
    pub timestamp: Timestamp,
}

impl Metadata {
    /// Returns a buffer metadata description
    ///
    /// # Arguments
    ///
    /// * `sequence` - Sequence number as counted by the driver
    /// * `timestamp` - Timestamp as reported by the driver
    ///
    /// # Example
    ///
    /// ```
    /// use surfcam::{buffer::Metadata, Timestamp};
    ///
    /// let ts = Timestamp::new(0 /* sec */, 0 /* usec */);
    /// let meta = Metadata::new(0, ts);
    /// ```
    pub fn new(sequence: u32, timestamp: Timestamp) -> Self {
        Metadata {
            sequence,
            timestamp,
        }
    }
}

/// A filled buffer handed out by the capture device
///
/// Until it is released back, the buffer at `index` belongs to the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Index into the registered buffer set
    pub index: usize,
    pub meta: Metadata,
}

impl Frame {
    pub fn new(index: usize, meta: Metadata) -> Self {
        Frame { index, meta }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buffer {} seq {} at {}",
            self.index, self.meta.sequence, self.meta.timestamp
        )
    }
}
