//! Capture session state machine
//!
//! A session binds one camera input to one display surface:
//!
//! ```text
//! INIT --open--> OPEN --start--> START <--stop/start--> STOP
//!                    any state --device error--> ERROR
//! ```
//!
//! Commands are serialized by a session-level lock, so a start and a stop issued from different
//! threads never interleave. The delivery worker is spawned lazily by the first `start` and
//! joined by every `stop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::buffer::BufferSet;
use crate::device::{CaptureDevice, DeviceHandle};
use crate::error::{CommandError, SetupError};
use crate::event::{Event, EventMask, EventSink, InputSignal};
use crate::io::binder;
use crate::io::delivery::{Delivery, FrameSignal};
use crate::surface::{Surface, SurfaceBuffer};
use crate::CaptureAttributes;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Unrecoverable device failure, only stop and teardown are accepted
    Error,
    /// Constructed, device not opened
    Init,
    /// Device opened, buffers and event sink registered
    Open,
    /// Delivering frames
    Start,
    /// Opened but not delivering
    Stop,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            State::Error => write!(f, "ERROR"),
            State::Init => write!(f, "INIT"),
            State::Open => write!(f, "OPEN"),
            State::Start => write!(f, "START"),
            State::Stop => write!(f, "STOP"),
        }
    }
}

/// Application command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
        }
    }
}

/// Resources acquired by `open` and driven by commands
#[derive(Default)]
struct Control {
    handle: Option<DeviceHandle>,
    buffers: Option<BufferSet>,
    worker: Option<JoinHandle<Option<usize>>>,
    /// Buffer held from the device while no worker runs
    previous: Option<usize>,
    /// The device accepted a start and has not been stopped since
    streaming: bool,
}

/// One camera input bound to one display surface
pub struct CaptureSession {
    attrs: CaptureAttributes,
    device: Arc<dyn CaptureDevice>,
    surface: Arc<dyn Surface>,
    timeout: Duration,
    signal: Arc<FrameSignal>,
    delivered: Arc<AtomicU64>,
    state: Mutex<State>,
    control: Mutex<Control>,
}

impl CaptureSession {
    /// Returns a session in the `INIT` state
    ///
    /// # Arguments
    ///
    /// * `attrs` - Resolved capture attributes
    /// * `device` - Capture device serving `attrs.input`
    /// * `surface` - Surface the frames are presented on
    /// * `timeout` - Poll timeout for a single frame
    pub fn new(
        attrs: CaptureAttributes,
        device: Arc<dyn CaptureDevice>,
        surface: Arc<dyn Surface>,
        timeout: Duration,
    ) -> Self {
        CaptureSession {
            attrs,
            device,
            surface,
            timeout,
            signal: Arc::new(FrameSignal::new()),
            delivered: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(State::Init),
            control: Mutex::new(Control::default()),
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `state` unless the session faulted, returns `false` if it did
    fn advance(&self, state: State) -> bool {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == State::Error {
            return false;
        }
        if *current != state {
            info!(session = %self.attrs.name, from = %*current, to = %state, "state change");
            *current = state;
        }
        true
    }

    /// Moves to `state` even out of `ERROR`
    fn force_state(&self, state: State) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            info!(session = %self.attrs.name, from = %*current, to = %state, "state change");
            *current = state;
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.attrs.name
    }

    pub fn attributes(&self) -> &CaptureAttributes {
        &self.attrs
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    /// Device handle, if the session is open
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.lock_control().handle
    }

    /// Number of frames presented so far
    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Buffer held from the device while no worker runs
    pub fn previous_index(&self) -> Option<usize> {
        self.lock_control().previous
    }

    /// Whether a delivery worker exists
    pub fn has_worker(&self) -> bool {
        self.lock_control().worker.is_some()
    }

    /// Opens the device and registers buffers and event sink
    ///
    /// On failure everything acquired so far is released again and the session stays in
    /// `INIT`.
    ///
    /// # Arguments
    ///
    /// * `buffers` - Surface buffers to share with the device
    /// * `sink` - Receiver of the device's frame-ready, signal and error events
    pub fn open(
        &self,
        buffers: &[SurfaceBuffer],
        sink: Weak<dyn EventSink>,
    ) -> Result<DeviceHandle, SetupError> {
        let mut ctl = self.lock_control();
        if ctl.handle.is_some() || self.state() != State::Init {
            return Err(SetupError::AlreadyOpen);
        }

        let set = binder::bind(buffers, &self.attrs)?;
        debug!(session = %self.attrs.name, count = set.len(), format = %set.format, "buffers bound");

        let input = self.attrs.input;
        let handle = self
            .device
            .open(input)
            .map_err(|source| SetupError::Open { input, source })?;

        if let Err(e) = self.device.register_buffers(handle, &set) {
            self.device.close(handle);
            return Err(SetupError::RegisterBuffers(e));
        }
        let mask = EventMask::FRAME_READY | EventMask::INPUT_SIGNAL | EventMask::ERROR;
        if let Err(e) = self.device.register_event_sink(handle, sink, mask) {
            self.device.close(handle);
            return Err(SetupError::RegisterSink(e));
        }

        ctl.handle = Some(handle);
        ctl.buffers = Some(set);
        self.advance(State::Open);
        Ok(handle)
    }

    /// Starts frame delivery and shows the surface
    ///
    /// Succeeds without effect if already started. If the device refuses to start, the state
    /// is left unchanged; a worker spawned for this attempt keeps waiting for frames. A device
    /// error raised while the start is in flight wins: the call fails with
    /// [`CommandError::Faulted`] and the session stays in `ERROR`.
    pub fn start(&self) -> Result<(), CommandError> {
        let mut ctl = self.lock_control();
        match self.state() {
            State::Start => return Ok(()),
            State::Init => return Err(CommandError::NotOpen),
            State::Error => return Err(CommandError::Faulted),
            State::Open | State::Stop => {}
        }
        let handle = ctl.handle.ok_or(CommandError::NotOpen)?;

        if ctl.worker.is_none() {
            self.signal.arm();
            let delivery = Delivery {
                name: self.attrs.name.clone(),
                device: self.device.clone(),
                handle,
                surface: self.surface.clone(),
                signal: self.signal.clone(),
                buffer_count: ctl.buffers.as_ref().map_or(0, BufferSet::len),
                timeout: self.timeout,
                previous: ctl.previous,
                delivered: self.delivered.clone(),
            };
            match delivery.spawn() {
                Ok(worker) => {
                    ctl.worker = Some(worker);
                    ctl.previous = None;
                }
                Err(e) => {
                    self.signal.shutdown();
                    return Err(CommandError::Spawn(e));
                }
            }
        }

        if let Err(e) = self.device.start(handle) {
            error!(session = %self.attrs.name, error = %e, "device start failed");
            return Err(CommandError::device("start")(e));
        }
        ctl.streaming = true;
        if !self.advance(State::Start) {
            return Err(CommandError::Faulted);
        }
        if let Err(e) = self.surface.set_visible(true) {
            warn!(session = %self.attrs.name, error = %e, "failed to show surface");
        }
        Ok(())
    }

    /// Stops frame delivery and hides the surface
    ///
    /// The worker is joined before the device is stopped. Succeeds without effect if already
    /// stopped. A faulted session is wound down as well but stays in `ERROR`, also when the
    /// fault arrives while the stop is in progress.
    pub fn stop(&self) -> Result<(), CommandError> {
        let mut ctl = self.lock_control();
        match self.state() {
            State::Stop => return Ok(()),
            State::Init => return Err(CommandError::NotOpen),
            State::Open | State::Start | State::Error => {}
        }
        let handle = ctl.handle.ok_or(CommandError::NotOpen)?;

        self.join_worker(&mut ctl);
        if let Err(e) = self.surface.set_visible(false) {
            warn!(session = %self.attrs.name, error = %e, "failed to hide surface");
        }
        if let Err(e) = self.device.stop(handle) {
            error!(session = %self.attrs.name, error = %e, "device stop failed");
            return Err(CommandError::device("stop")(e));
        }

        // a stopped device owns all buffers again
        ctl.previous = None;
        ctl.streaming = false;
        self.advance(State::Stop);
        Ok(())
    }

    /// Dispatches an application command
    pub fn control(&self, command: Command) -> Result<(), CommandError> {
        debug!(session = %self.attrs.name, %command, "control");
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
        }
    }

    /// Reacts to a change of the input signal
    pub fn handle_signal(&self, signal: InputSignal) {
        match signal {
            InputSignal::Valid => {
                if let Err(e) = self.start() {
                    error!(session = %self.attrs.name, error = %e, "start on valid signal failed");
                }
            }
            InputSignal::Lost => {
                info!(session = %self.attrs.name, "input signal lost");
            }
        }
    }

    /// Wakes the delivery worker for one ready frame
    pub fn notify_frame(&self) {
        self.signal.notify();
    }

    /// Reacts to a device event
    pub fn route(&self, event: Event) {
        match event {
            Event::FrameReady => self.notify_frame(),
            Event::InputSignal(signal) => {
                debug!(session = %self.attrs.name, %signal, "input signal");
                self.handle_signal(signal);
            }
            Event::Error(code) => self.fault(code),
        }
    }

    /// Marks the session as failed after an unrecoverable device error
    pub fn fault(&self, code: u32) {
        error!(session = %self.attrs.name, code, "device reported an unrecoverable error");
        self.force_state(State::Error);
    }

    fn join_worker(&self, ctl: &mut Control) {
        self.signal.shutdown();
        if let Some(worker) = ctl.worker.take() {
            match worker.join() {
                Ok(previous) => ctl.previous = previous,
                Err(_) => error!(session = %self.attrs.name, "delivery worker panicked"),
            }
        }
    }

    /// Releases everything the session acquired, in reverse order
    ///
    /// Joins the worker, stops a streaming device, drops the descriptor set and closes the
    /// device handle. Safe to call on a partially set up, faulted or already closed session.
    pub fn close(&self) {
        let mut ctl = self.lock_control();
        self.join_worker(&mut ctl);

        if let (Some(handle), true) = (ctl.handle, ctl.streaming) {
            if let Err(e) = self.device.stop(handle) {
                warn!(session = %self.attrs.name, error = %e, "device stop on close failed");
            }
            if let Err(e) = self.surface.set_visible(false) {
                warn!(session = %self.attrs.name, error = %e, "failed to hide surface");
            }
        }
        ctl.streaming = false;

        ctl.buffers = None;
        ctl.previous = None;
        if let Some(handle) = ctl.handle.take() {
            self.device.close(handle);
            info!(session = %self.attrs.name, %handle, "session closed");
        }
        self.force_state(State::Init);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("attrs", &self.attrs)
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}
