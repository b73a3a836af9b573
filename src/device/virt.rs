//! In-process capture device
//!
//! [`VirtualDevice`] behaves like a driver that owns a queue of filled buffers per opened
//! input. Frames are produced on demand with [`VirtualDevice::capture`] or
//! [`VirtualDevice::emit_frame`], which also raise the frame-ready event on the registered sink.
//!
//! The device keeps strict books about buffer ownership: a buffer fetched with `next_frame` is
//! outstanding until released, releasing a buffer the application does not hold fails, and
//! `stop` reclaims everything. Faults (failed open, start, release, timeouts, ..) can be
//! injected per handle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::buffer::{BufferSet, Frame, Metadata};
use crate::device::{CaptureDevice, DeviceHandle, InputDiscovery, InputId, InputInfo};
use crate::event::{Event, EventMask, EventSink, InputSignal};
use crate::Timestamp;

#[derive(Default)]
struct Channel {
    input: InputId,
    buffers: Option<BufferSet>,
    sink: Option<Weak<dyn EventSink>>,
    mask: EventMask,
    streaming: bool,
    sequence: u32,
    cursor: usize,

    ready: VecDeque<Frame>,
    outstanding: Vec<usize>,
    released: Vec<usize>,
    release_attempts: Vec<usize>,

    start_failures: u32,
    stop_failures: u32,
    release_failures: u32,
    timeouts: u32,
}

#[derive(Default)]
struct State {
    channels: HashMap<DeviceHandle, Channel>,
    failing_inputs: HashSet<InputId>,
    fail_registration: bool,
    fail_sink_registration: bool,
    /// Signal raised as soon as a sink is registered for the input
    announced: HashMap<InputId, InputSignal>,
    closed: Vec<DeviceHandle>,
}

/// Software capture device, see the module documentation
pub struct VirtualDevice {
    inputs: Vec<InputInfo>,
    next_handle: AtomicU64,
    epoch: Instant,
    state: Mutex<State>,
    ready: Condvar,
}

fn not_found(handle: DeviceHandle) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("unknown device handle {}", handle),
    )
}

impl VirtualDevice {
    /// Returns a device serving the given inputs
    pub fn new(inputs: Vec<InputInfo>) -> Self {
        VirtualDevice {
            inputs,
            next_handle: AtomicU64::new(0x1000),
            epoch: Instant::now(),
            state: Mutex::new(State::default()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_channel<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&mut Channel) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut state = self.lock();
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or_else(|| not_found(handle))?;
        f(channel)
    }

    fn notify(&self, handle: DeviceHandle, event: Event) -> io::Result<()> {
        let sink = self.with_channel(handle, |ch| {
            if ch.mask.contains(event.kind()) {
                Ok(ch.sink.clone())
            } else {
                Ok(None)
            }
        })?;

        // the state lock is released here, sinks are free to call back into the device
        if let Some(sink) = sink.and_then(|sink| sink.upgrade()) {
            trace!(%handle, %event, "dispatching event");
            sink.dispatch(handle, event);
        }
        Ok(())
    }

    /// Makes every following `open` of `input` fail
    pub fn fail_open(&self, input: InputId) {
        self.lock().failing_inputs.insert(input);
    }

    /// Makes the next buffer registration fail
    pub fn fail_buffer_registration(&self) {
        self.lock().fail_registration = true;
    }

    /// Makes the next event sink registration fail
    pub fn fail_sink_registration(&self) {
        self.lock().fail_sink_registration = true;
    }

    /// Makes every following sink registration for `input` raise `signal` right away
    ///
    /// Mirrors drivers that report the current signal state on registration, before the
    /// caller has seen the handle returned by `open`.
    pub fn announce_signal(&self, input: InputId, signal: InputSignal) {
        self.lock().announced.insert(input, signal);
    }

    /// Makes the next `count` start calls on `handle` fail
    pub fn fail_starts(&self, handle: DeviceHandle, count: u32) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            ch.start_failures = count;
            Ok(())
        })
    }

    /// Makes the next `count` stop calls on `handle` fail
    pub fn fail_stops(&self, handle: DeviceHandle, count: u32) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            ch.stop_failures = count;
            Ok(())
        })
    }

    /// Makes the next `count` release calls on `handle` fail
    pub fn fail_releases(&self, handle: DeviceHandle, count: u32) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            ch.release_failures = count;
            Ok(())
        })
    }

    /// Makes the next `count` frame fetches on `handle` time out immediately
    pub fn time_out(&self, handle: DeviceHandle, count: u32) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            ch.timeouts = count;
            Ok(())
        })
    }

    /// Marks buffer `index` as filled and raises the frame-ready event
    ///
    /// The index is taken as-is, which allows exercising consumers against a misbehaving
    /// driver. Use [`VirtualDevice::capture`] for well-formed frames.
    pub fn emit_frame(&self, handle: DeviceHandle, index: usize) -> io::Result<()> {
        let timestamp = Timestamp::from(self.epoch.elapsed());
        self.with_channel(handle, |ch| {
            if !ch.streaming {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "device is not streaming",
                ));
            }
            let frame = Frame::new(index, Metadata::new(ch.sequence, timestamp));
            ch.sequence = ch.sequence.wrapping_add(1);
            ch.ready.push_back(frame);
            Ok(())
        })?;
        self.ready.notify_all();
        self.notify(handle, Event::FrameReady)
    }

    /// Fills the next buffer the device owns and raises the frame-ready event
    ///
    /// Returns the index of the filled buffer. Fails with [`io::ErrorKind::WouldBlock`] if the
    /// application holds or has pending every registered buffer.
    pub fn capture(&self, handle: DeviceHandle) -> io::Result<usize> {
        let index = self.with_channel(handle, |ch| {
            let count = ch.buffers.as_ref().map_or(0, BufferSet::len);
            for step in 0..count {
                let index = (ch.cursor + step) % count;
                let busy = ch.outstanding.contains(&index)
                    || ch.ready.iter().any(|frame| frame.index == index);
                if !busy {
                    ch.cursor = (index + 1) % count;
                    return Ok(index);
                }
            }
            Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no buffer available for capture",
            ))
        })?;
        self.emit_frame(handle, index)?;
        Ok(index)
    }

    /// Raises an input signal event
    pub fn emit_signal(&self, handle: DeviceHandle, signal: InputSignal) -> io::Result<()> {
        self.notify(handle, Event::InputSignal(signal))
    }

    /// Raises an error event
    pub fn emit_error(&self, handle: DeviceHandle, code: u32) -> io::Result<()> {
        self.notify(handle, Event::Error(code))
    }

    /// Buffers successfully released by the application, in release order
    pub fn released(&self, handle: DeviceHandle) -> Vec<usize> {
        self.with_channel(handle, |ch| Ok(ch.released.clone()))
            .unwrap_or_default()
    }

    /// Every release call, including failed ones, in call order
    pub fn release_attempts(&self, handle: DeviceHandle) -> Vec<usize> {
        self.with_channel(handle, |ch| Ok(ch.release_attempts.clone()))
            .unwrap_or_default()
    }

    /// Buffers currently held by the application
    pub fn outstanding(&self, handle: DeviceHandle) -> Vec<usize> {
        self.with_channel(handle, |ch| Ok(ch.outstanding.clone()))
            .unwrap_or_default()
    }

    /// The buffer set registered for `handle`
    pub fn buffers(&self, handle: DeviceHandle) -> Option<BufferSet> {
        self.with_channel(handle, |ch| Ok(ch.buffers.clone()))
            .ok()
            .flatten()
    }

    pub fn is_streaming(&self, handle: DeviceHandle) -> bool {
        self.with_channel(handle, |ch| Ok(ch.streaming))
            .unwrap_or(false)
    }

    pub fn is_open(&self, handle: DeviceHandle) -> bool {
        self.lock().channels.contains_key(&handle)
    }

    /// Whether `handle` was opened and closed again
    pub fn was_closed(&self, handle: DeviceHandle) -> bool {
        self.lock().closed.contains(&handle)
    }

    /// Handle of the opened channel serving `input`
    pub fn handle_of(&self, input: InputId) -> Option<DeviceHandle> {
        self.lock()
            .channels
            .iter()
            .find(|(_, ch)| ch.input == input)
            .map(|(handle, _)| *handle)
    }
}

impl InputDiscovery for VirtualDevice {
    fn list_inputs(&self) -> io::Result<Vec<InputInfo>> {
        Ok(self.inputs.clone())
    }
}

impl CaptureDevice for VirtualDevice {
    fn open(&self, input: InputId) -> io::Result<DeviceHandle> {
        if !self.inputs.iter().any(|info| info.id == input) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such input {}", input),
            ));
        }

        let mut state = self.lock();
        if state.failing_inputs.contains(&input) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("input {} refused to open", input),
            ));
        }

        let handle = DeviceHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.channels.insert(
            handle,
            Channel {
                input,
                ..Channel::default()
            },
        );
        debug!(%input, %handle, "virtual input opened");
        Ok(handle)
    }

    fn register_buffers(&self, handle: DeviceHandle, buffers: &BufferSet) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_registration {
            state.fail_registration = false;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer registration rejected",
            ));
        }
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or_else(|| not_found(handle))?;
        channel.buffers = Some(buffers.clone());
        channel.cursor = 0;
        Ok(())
    }

    fn register_event_sink(
        &self,
        handle: DeviceHandle,
        sink: Weak<dyn EventSink>,
        mask: EventMask,
    ) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_sink_registration {
            state.fail_sink_registration = false;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "event sink registration rejected",
            ));
        }
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or_else(|| not_found(handle))?;
        channel.sink = Some(sink);
        channel.mask = mask;
        let input = channel.input;
        let announced = state.announced.get(&input).copied();
        drop(state);

        if let Some(signal) = announced {
            debug!(%input, %handle, %signal, "announcing input signal");
            self.notify(handle, Event::InputSignal(signal))?;
        }
        Ok(())
    }

    fn start(&self, handle: DeviceHandle) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            if ch.start_failures > 0 {
                ch.start_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "injected start failure"));
            }
            if ch.buffers.is_none() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no buffers registered",
                ));
            }
            ch.streaming = true;
            Ok(())
        })
    }

    fn stop(&self, handle: DeviceHandle) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            if ch.stop_failures > 0 {
                ch.stop_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "injected stop failure"));
            }
            ch.streaming = false;
            ch.ready.clear();
            ch.outstanding.clear();
            Ok(())
        })?;
        self.ready.notify_all();
        Ok(())
    }

    fn next_frame(&self, handle: DeviceHandle, timeout: Duration) -> io::Result<Frame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            {
                let ch = state
                    .channels
                    .get_mut(&handle)
                    .ok_or_else(|| not_found(handle))?;
                if ch.timeouts > 0 {
                    ch.timeouts -= 1;
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "injected timeout"));
                }
                if let Some(frame) = ch.ready.pop_front() {
                    ch.outstanding.push(frame.index);
                    return Ok(frame);
                }
                if !ch.streaming {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "device is not streaming",
                    ));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no frame ready",
                ));
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn release_frame(&self, handle: DeviceHandle, index: usize) -> io::Result<()> {
        self.with_channel(handle, |ch| {
            ch.release_attempts.push(index);
            if ch.release_failures > 0 {
                ch.release_failures -= 1;
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "injected release failure",
                ));
            }
            match ch.outstanding.iter().position(|&held| held == index) {
                Some(pos) => {
                    ch.outstanding.remove(pos);
                    ch.released.push(index);
                    Ok(())
                }
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("buffer {} is not held by the application", index),
                )),
            }
        })
    }

    fn close(&self, handle: DeviceHandle) {
        let mut state = self.lock();
        if state.channels.remove(&handle).is_some() {
            state.closed.push(handle);
            debug!(%handle, "virtual input closed");
        }
        drop(state);
        self.ready.notify_all();
    }
}
