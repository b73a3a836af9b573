//! Device-originated events and the sink they are delivered to

use std::fmt;

use crate::device::DeviceHandle;

bitflags::bitflags! {
    /// Events a capture device is asked to report
    #[derive(PartialEq, Eq, Hash, Debug, Default, Clone, Copy)]
    pub struct EventMask: u32 {
        /// A filled buffer can be fetched
        const FRAME_READY   = 0x00000001;
        /// The input signal appeared or disappeared
        const INPUT_SIGNAL  = 0x00000002;
        /// Unrecoverable device failure
        const ERROR         = 0x00000004;
    }
}

impl From<u32> for EventMask {
    fn from(mask: u32) -> Self {
        Self::from_bits_truncate(mask)
    }
}

impl From<EventMask> for u32 {
    fn from(mask: EventMask) -> Self {
        mask.bits()
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of the physical input signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    Valid,
    Lost,
}

impl fmt::Display for InputSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            InputSignal::Valid => write!(f, "valid"),
            InputSignal::Lost => write!(f, "lost"),
        }
    }
}

/// An event emitted by a capture device, including its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    FrameReady,
    InputSignal(InputSignal),
    /// Driver specific error code
    Error(u32),
}

impl Event {
    /// The mask bit that has to be registered for this event to be delivered
    pub fn kind(&self) -> EventMask {
        match self {
            Event::FrameReady => EventMask::FRAME_READY,
            Event::InputSignal(_) => EventMask::INPUT_SIGNAL,
            Event::Error(_) => EventMask::ERROR,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::FrameReady => write!(f, "frame ready"),
            Event::InputSignal(signal) => write!(f, "input signal {}", signal),
            Event::Error(code) => write!(f, "error {:#x}", code),
        }
    }
}

/// Receiver of device events
///
/// Handed to the capture device at registration time. Devices call it from their own
/// dispatch thread, so implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, handle: DeviceHandle, event: Event);
}
