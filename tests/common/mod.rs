//! Shared helpers for the integration tests
//!
//! Sessions run against the in-process `VirtualDevice` and a surface that records every call
//! instead of displaying anything.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use std::{io, ptr, thread};

use surfcam::device::{InputInfo, InputList, VirtualDevice};
use surfcam::event::{Event, EventSink};
use surfcam::memory::NativeHandle;
use surfcam::surface::{Surface, SurfaceBuffer, SurfaceProvider, SurfaceSpec};
use surfcam::{
    CaptureAttributes, CaptureSession, DeviceHandle, FourCC, InputId, Resolution,
    SessionRegistry,
};

pub const FRAME_TIMEOUT: Duration = Duration::from_millis(200);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `cond` until it holds or five seconds have passed
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// A 1080p UYVY input
pub fn input(id: u32) -> InputInfo {
    InputInfo {
        id: InputId(id),
        formats: vec![FourCC::UYVY, FourCC::YUYV],
        resolution: Resolution::new(1920, 1080),
        fps: 60.0,
    }
}

/// Fully resolved attributes for a small UYVY stream
pub fn attrs(name: &str, input: u32, buffer_count: u32) -> CaptureAttributes {
    CaptureAttributes {
        format: Some(FourCC::UYVY),
        width: Some(640),
        height: Some(480),
        buffer_count,
        ..CaptureAttributes::new(name, InputId(input))
    }
}

/// Event sink for sessions driven without a registry
pub fn no_sink() -> Weak<dyn EventSink> {
    Weak::<NullSink>::new()
}

struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, _handle: DeviceHandle, _event: Event) {}
}

#[derive(Default)]
struct Calls {
    presented: Vec<usize>,
    visibility: Vec<bool>,
    present_failures: u32,
}

/// Surface recording presentations and visibility changes
#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Calls>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Indices presented successfully, in order
    pub fn presented(&self) -> Vec<usize> {
        self.calls.lock().unwrap().presented.clone()
    }

    pub fn visibility(&self) -> Vec<bool> {
        self.calls.lock().unwrap().visibility.clone()
    }

    /// Makes the next `count` presentations fail
    pub fn fail_presents(&self, count: u32) {
        self.calls.lock().unwrap().present_failures = count;
    }
}

impl Surface for RecordingSurface {
    fn allocate_buffers(&self, count: usize, size: Resolution) -> io::Result<Vec<SurfaceBuffer>> {
        let stride = size.width * 2;
        Ok((0..count)
            .map(|i| SurfaceBuffer {
                handle: NativeHandle(100 + i as i64),
                ptr: ptr::null_mut(),
                stride,
                size: stride * size.height,
            })
            .collect())
    }

    fn present(&self, index: usize) -> io::Result<()> {
        let mut calls = self.calls.lock().unwrap();
        if calls.present_failures > 0 {
            calls.present_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "present rejected"));
        }
        calls.presented.push(index);
        Ok(())
    }

    fn set_visible(&self, visible: bool) -> io::Result<()> {
        self.calls.lock().unwrap().visibility.push(visible);
        Ok(())
    }
}

/// Hands out recording surfaces and keeps them for inspection
#[derive(Default)]
pub struct RecordingSurfaceProvider {
    surfaces: Mutex<Vec<Arc<RecordingSurface>>>,
}

impl RecordingSurfaceProvider {
    /// The `n`th surface created
    pub fn surface(&self, n: usize) -> Arc<RecordingSurface> {
        self.surfaces.lock().unwrap()[n].clone()
    }

    pub fn created(&self) -> usize {
        self.surfaces.lock().unwrap().len()
    }
}

impl SurfaceProvider for RecordingSurfaceProvider {
    fn create_surface(
        &self,
        _spec: &SurfaceSpec,
        _size: Resolution,
        _format: FourCC,
    ) -> io::Result<Arc<dyn Surface>> {
        let surface = RecordingSurface::new();
        self.surfaces.lock().unwrap().push(surface.clone());
        Ok(surface)
    }
}

/// A registry over a virtual device with recording surfaces
pub struct Fixture {
    pub device: Arc<VirtualDevice>,
    pub surfaces: Arc<RecordingSurfaceProvider>,
    pub registry: Arc<SessionRegistry>,
}

impl Fixture {
    pub fn new(inputs: Vec<InputInfo>) -> Self {
        init_tracing();
        let device = Arc::new(VirtualDevice::new(inputs.clone()));
        let surfaces = Arc::new(RecordingSurfaceProvider::default());
        let registry = SessionRegistry::with_inputs(
            device.clone(),
            surfaces.clone(),
            InputList::new(inputs),
            FRAME_TIMEOUT,
        );
        Fixture {
            device,
            surfaces,
            registry,
        }
    }

    /// Creates an opened session on `input`
    pub fn open(&self, input: u32, buffer_count: u32) -> (DeviceHandle, Arc<CaptureSession>) {
        let handle = self
            .registry
            .create_session(
                &SurfaceSpec::default(),
                attrs(&format!("cam{}", input), input, buffer_count),
            )
            .unwrap();
        let session = self.registry.session(handle).unwrap();
        (handle, session)
    }
}
