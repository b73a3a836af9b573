//! Error types of the capture core
//!
//! Collaborators report failures as [`std::io::Error`]; the core converts them at the call site
//! into one of the typed errors below.

use std::io;

use thiserror::Error;

use crate::device::{DeviceHandle, InputId};

/// Session setup failed, the session has to be discarded
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("input {0} is not known to the discovery layer")]
    UnknownInput(InputId),

    #[error("input {0} already has an active session")]
    InputBusy(InputId),

    #[error("session is already open")]
    AlreadyOpen,

    #[error("buffer binding failed: {0}")]
    Bind(#[from] BindError),

    #[error("surface setup failed: {0}")]
    Surface(#[source] io::Error),

    #[error("failed to open input {input}: {source}")]
    Open {
        input: InputId,
        #[source]
        source: io::Error,
    },

    #[error("failed to register buffers: {0}")]
    RegisterBuffers(#[source] io::Error),

    #[error("failed to register event sink: {0}")]
    RegisterSink(#[source] io::Error),

    #[error("input discovery failed: {0}")]
    Discovery(#[source] io::Error),

    #[error("no camera inputs discovered after {attempts} attempts")]
    NoInputs { attempts: u32 },
}

/// Surface buffers could not be translated into capture buffer descriptors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("surface provides {available} buffers, {required} required")]
    NotEnoughBuffers { required: usize, available: usize },

    #[error("pixel format is not resolved")]
    UnresolvedFormat,

    #[error("invalid buffer geometry {width:?}x{height:?}")]
    InvalidGeometry {
        width: Option<u32>,
        height: Option<u32>,
    },
}

/// A start/stop command was rejected, the session state is unchanged
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("session is not open")]
    NotOpen,

    #[error("session is faulted after a device error")]
    Faulted,

    #[error("no session for input {0}")]
    UnknownInput(InputId),

    #[error("no session for device handle {0}")]
    UnknownHandle(DeviceHandle),

    #[error("failed to spawn delivery worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("device {op} failed: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    pub(crate) fn device(op: &'static str) -> impl FnOnce(io::Error) -> CommandError {
        move |source| CommandError::Device { op, source }
    }
}

/// Transient failure inside the frame delivery loop
///
/// These never leave the delivery worker; they are logged and the loop carries on.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("timed out waiting for a frame")]
    Timeout,

    #[error("failed to fetch frame: {0}")]
    Fetch(#[source] io::Error),

    #[error("device returned buffer {index}, only {count} registered")]
    OutOfRange { index: usize, count: usize },

    #[error("failed to release buffer {index}: {source}")]
    Release {
        index: usize,
        #[source]
        source: io::Error,
    },
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => FrameError::Timeout,
            _ => FrameError::Fetch(e),
        }
    }
}

/// Configuration could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
