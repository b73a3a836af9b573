//! Buffer handshake between the capture device and the display surface

pub mod binder;
pub use binder::bind;

pub mod delivery;
pub use delivery::FrameSignal;
