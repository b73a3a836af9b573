use std::{fmt, io, sync::Weak, time::Duration};

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferSet, Frame};
use crate::event::{EventMask, EventSink};

pub mod info;
pub use info::{InputDiscovery, InputInfo, InputList};

pub mod virt;
pub use virt::VirtualDevice;

/// Stable identifier of a physical or virtual camera input
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputId(pub u32);

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for InputId {
    fn from(id: u32) -> Self {
        InputId(id)
    }
}

/// Runtime handle of an opened input, as handed out by the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub const fn from_raw(raw: u64) -> Self {
        DeviceHandle(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Capture device protocol
///
/// The driver boundary producing frames into pre-registered buffers. All calls may come from
/// different threads: commands from the control thread, frame fetch and release from the
/// session's delivery worker.
pub trait CaptureDevice: Send + Sync {
    /// Opens the given input and returns its runtime handle
    fn open(&self, input: InputId) -> io::Result<DeviceHandle>;

    /// Registers the buffers the device is allowed to fill
    ///
    /// # Arguments
    ///
    /// * `handle` - Handle returned by [`CaptureDevice::open`]
    /// * `buffers` - Descriptor set, one entry per shared buffer
    fn register_buffers(&self, handle: DeviceHandle, buffers: &BufferSet) -> io::Result<()>;

    /// Registers the receiver of events selected by `mask`
    ///
    /// Only a weak reference is kept so the sink's owner controls its lifetime.
    fn register_event_sink(
        &self,
        handle: DeviceHandle,
        sink: Weak<dyn EventSink>,
        mask: EventMask,
    ) -> io::Result<()>;

    /// Start streaming into the registered buffers
    fn start(&self, handle: DeviceHandle) -> io::Result<()>;

    /// Stop streaming, all buffers return to the device
    fn stop(&self, handle: DeviceHandle) -> io::Result<()>;

    /// Remove the next filled buffer from the drivers' outgoing queue
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] if no frame became ready within `timeout`.
    fn next_frame(&self, handle: DeviceHandle, timeout: Duration) -> io::Result<Frame>;

    /// Hand a previously fetched buffer back to the device
    fn release_frame(&self, handle: DeviceHandle, index: usize) -> io::Result<()>;

    /// Close the handle, no further calls are valid for it
    fn close(&self, handle: DeviceHandle);
}
