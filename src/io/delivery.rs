//! Frame delivery loop
//!
//! One worker per session moves buffers from the capture device to the display and back. It is
//! the only place where buffer ownership flips, which keeps the handshake simple: the buffer on
//! screen is held until its successor has been fetched and posted, then released. At most one
//! presented buffer is held at any time and buffers go back in the order they were fetched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::{io, time::Duration};

use tracing::{debug, trace, warn};

use crate::device::{CaptureDevice, DeviceHandle};
use crate::error::FrameError;
use crate::surface::Surface;

#[derive(Debug, Default)]
struct SignalState {
    pending: usize,
    running: bool,
}

/// Counted frame-ready wakeup shared between the event path and the delivery worker
///
/// Every notification allows exactly one frame fetch. The running flag lives under the same lock
/// as the counter, so a shutdown can never slip in between the worker's check and its wait.
#[derive(Debug, Default)]
pub struct FrameSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announce one ready frame
    pub fn notify(&self) {
        self.lock().pending += 1;
        self.cond.notify_one();
    }

    /// Enter the running state, dropping notifications from before
    pub fn arm(&self) {
        let mut state = self.lock();
        state.running = true;
        state.pending = 0;
    }

    /// Leave the running state and wake the worker so it can exit
    pub fn shutdown(&self) {
        self.lock().running = false;
        self.cond.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of notifications not yet consumed
    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    /// Block until a frame is announced or the signal is shut down
    ///
    /// Returns `false` once the signal is no longer running, even if notifications are pending.
    pub fn wait(&self) -> bool {
        let mut state = self.lock();
        while state.running && state.pending == 0 {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !state.running {
            return false;
        }
        state.pending -= 1;
        true
    }
}

/// Everything the delivery worker needs, moved onto its thread
pub(crate) struct Delivery {
    pub name: String,
    pub device: Arc<dyn CaptureDevice>,
    pub handle: DeviceHandle,
    pub surface: Arc<dyn Surface>,
    pub signal: Arc<FrameSignal>,
    pub buffer_count: usize,
    pub timeout: Duration,
    /// Buffer currently on screen and still held from the device
    pub previous: Option<usize>,
    pub delivered: Arc<AtomicU64>,
}

impl Delivery {
    /// Runs the loop on a dedicated thread
    ///
    /// Joining the thread yields the buffer still held when the loop exited.
    pub fn spawn(self) -> io::Result<JoinHandle<Option<usize>>> {
        thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> Option<usize> {
        debug!(session = %self.name, handle = %self.handle, "delivery loop running");
        while self.signal.wait() {
            match self.step() {
                Ok(()) => {}
                Err(FrameError::Timeout) => {
                    warn!(session = %self.name, timeout = ?self.timeout, "frame fetch timed out")
                }
                Err(e) => warn!(session = %self.name, error = %e, "frame dropped"),
            }
        }
        debug!(session = %self.name, previous = ?self.previous, "delivery loop exited");
        self.previous
    }

    fn step(&mut self) -> Result<(), FrameError> {
        let frame = self.device.next_frame(self.handle, self.timeout)?;
        if frame.index >= self.buffer_count {
            return Err(FrameError::OutOfRange {
                index: frame.index,
                count: self.buffer_count,
            });
        }

        trace!(session = %self.name, %frame, "presenting");
        match self.surface.present(frame.index) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(session = %self.name, index = frame.index, error = %e, "present failed"),
        }

        if let Some(previous) = self.previous {
            // a failed release keeps the old index pending, the new frame is not recorded
            self.device
                .release_frame(self.handle, previous)
                .map_err(|source| FrameError::Release {
                    index: previous,
                    source,
                })?;
            trace!(session = %self.name, index = previous, "released");
        }
        self.previous = Some(frame.index);
        Ok(())
    }
}
