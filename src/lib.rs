//! Camera capture sessions bound to display surface buffers
//!
//! A [`CaptureSession`] shares the buffers of a display surface with a capture device, so frames
//! are captured straight into memory the display can scan out. A worker per session presents
//! every filled buffer and hands the previous one back to the device. The [`SessionRegistry`]
//! owns all sessions and routes device events to them.
//!
//! Platform specifics sit behind the [`device::CaptureDevice`], [`surface::Surface`] and
//! [`device::InputDiscovery`] traits. [`device::VirtualDevice`] and the host memory surfaces in
//! [`surface`] implement them in software.

pub mod attributes;
pub use attributes::CaptureAttributes;

pub mod buffer;

pub mod config;
pub use config::Config;

pub mod device;
pub use device::{DeviceHandle, InputId};

pub mod error;

pub mod event;

mod fourcc;
pub use fourcc::FourCC;

mod framesize;
pub use framesize::Resolution;

pub mod io;

pub mod memory;

pub mod registry;
pub use registry::SessionRegistry;

pub mod session;
pub use session::{CaptureSession, Command, State};

pub mod surface;

mod timestamp;
pub use timestamp::Timestamp;
