//! Session registry
//!
//! The registry owns every capture session and is the single event sink handed to the capture
//! device. Device events carry only a handle, so the registry keeps two indexes: one by device
//! handle for event routing and one by input id for application commands. Both are updated
//! together under one lock.
//!
//! A device may raise events for a handle before `create_session` has published it, e.g. the
//! current input signal right after the event sink is registered. While any session is being
//! opened such events are parked and replayed once the handle is known.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::device::{CaptureDevice, DeviceHandle, InputDiscovery, InputId, InputList};
use crate::error::{BindError, CommandError, SetupError};
use crate::event::{Event, EventSink};
use crate::session::{CaptureSession, Command};
use crate::surface::{SurfaceProvider, SurfaceSpec};
use crate::CaptureAttributes;

#[derive(Default)]
struct Tables {
    by_handle: HashMap<DeviceHandle, Arc<CaptureSession>>,
    by_input: HashMap<InputId, DeviceHandle>,
    /// Sessions between `open` and publication
    opening: usize,
    /// Events for handles not yet published
    early: Vec<(DeviceHandle, Event)>,
}

impl Tables {
    /// Removes the parked events of `handle`, dropping all others once nothing is opening
    fn take_early(&mut self, handle: Option<DeviceHandle>) -> Vec<Event> {
        let mut taken = Vec::new();
        self.early.retain(|&(parked, event)| {
            if Some(parked) == handle {
                taken.push(event);
                false
            } else {
                true
            }
        });
        if self.opening == 0 && !self.early.is_empty() {
            debug!(count = self.early.len(), "dropping events for handles that never opened");
            self.early.clear();
        }
        taken
    }
}

/// Owner of all capture sessions of a process
pub struct SessionRegistry {
    me: Weak<SessionRegistry>,
    device: Arc<dyn CaptureDevice>,
    surfaces: Arc<dyn SurfaceProvider>,
    inputs: InputList,
    frame_timeout: Duration,
    tables: RwLock<Tables>,
}

impl SessionRegistry {
    /// Discovers the available inputs and returns an empty registry
    ///
    /// Discovery is retried as configured in `config.discovery`.
    ///
    /// # Arguments
    ///
    /// * `device` - Capture device shared by all sessions
    /// * `surfaces` - Provider of display surfaces
    /// * `discovery` - Input discovery layer
    /// * `config` - Runtime configuration
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        surfaces: Arc<dyn SurfaceProvider>,
        discovery: &dyn InputDiscovery,
        config: &Config,
    ) -> Result<Arc<Self>, SetupError> {
        let inputs = InputList::query(discovery, &config.discovery)?;
        Ok(Self::with_inputs(
            device,
            surfaces,
            inputs,
            config.frame_timeout(),
        ))
    }

    /// Returns an empty registry for inputs discovered elsewhere
    pub fn with_inputs(
        device: Arc<dyn CaptureDevice>,
        surfaces: Arc<dyn SurfaceProvider>,
        inputs: InputList,
        frame_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| SessionRegistry {
            me: me.clone(),
            device,
            surfaces,
            inputs,
            frame_timeout,
            tables: RwLock::new(Tables::default()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inputs known to this registry
    pub fn inputs(&self) -> &InputList {
        &self.inputs
    }

    /// Creates and opens a session for `attrs.input`
    ///
    /// Unset attributes are filled in from the input's native mode. The surface is asked for one
    /// buffer more than the device gets, so presentation always has a spare. On success the
    /// session is reachable by its device handle and its input id. It is in `OPEN` unless an
    /// event the device raised during the open, such as a valid input signal, moved it on.
    pub fn create_session(
        &self,
        spec: &SurfaceSpec,
        mut attrs: CaptureAttributes,
    ) -> Result<DeviceHandle, SetupError> {
        let input = attrs.input;
        let info = self
            .inputs
            .get(input)
            .ok_or(SetupError::UnknownInput(input))?;
        attrs.resolve(info);
        if self.read().by_input.contains_key(&input) {
            return Err(SetupError::InputBusy(input));
        }

        let size = attrs.resolution().ok_or(BindError::InvalidGeometry {
            width: attrs.width,
            height: attrs.height,
        })?;
        let format = attrs.format.ok_or(BindError::UnresolvedFormat)?;
        let surface = self
            .surfaces
            .create_surface(spec, size, format)
            .map_err(SetupError::Surface)?;
        let buffers = surface
            .allocate_buffers(attrs.buffer_count as usize + 1, size)
            .map_err(SetupError::Surface)?;
        debug!(session = %attrs.name, count = buffers.len(), "surface buffers allocated");

        let session = Arc::new(CaptureSession::new(
            attrs,
            self.device.clone(),
            surface,
            self.frame_timeout,
        ));
        let sink: Weak<dyn EventSink> = self.me.clone();
        self.write().opening += 1;
        let opened = session.open(&buffers, sink);

        let mut tables = self.write();
        tables.opening -= 1;
        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                tables.take_early(None);
                return Err(e);
            }
        };
        let early = tables.take_early(Some(handle));
        if tables.by_input.contains_key(&input) {
            drop(tables);
            session.close();
            return Err(SetupError::InputBusy(input));
        }
        tables.by_input.insert(input, handle);
        tables.by_handle.insert(handle, session.clone());
        drop(tables);

        info!(session = %session.name(), %input, %handle, attrs = %session.attributes(), "session created");
        for event in early {
            debug!(session = %session.name(), %event, "replaying early event");
            session.route(event);
        }
        Ok(handle)
    }

    /// Creates every session listed in `config`, starting the ones marked `autostart`
    ///
    /// Stops at the first session that cannot be set up. A failed autostart is logged and the
    /// session is kept.
    pub fn create_configured(&self, config: &Config) -> Result<Vec<DeviceHandle>, SetupError> {
        let mut handles = Vec::with_capacity(config.sessions.len());
        for entry in &config.sessions {
            let handle = self.create_session(&entry.surface, entry.capture.clone())?;
            if entry.autostart {
                if let Err(e) = self.start(handle) {
                    error!(session = %entry.capture.name, error = %e, "autostart failed");
                }
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Routes a device event to the session owning `handle`
    ///
    /// Events for handles without a session are parked while a session is being opened and
    /// dropped otherwise.
    pub fn dispatch_event(&self, handle: DeviceHandle, event: Event) {
        let session = match self.session(handle) {
            Some(session) => session,
            None => {
                let mut tables = self.write();
                match tables.by_handle.get(&handle) {
                    Some(session) => session.clone(),
                    None if tables.opening > 0 => {
                        debug!(%handle, %event, "event before the session was published, parked");
                        tables.early.push((handle, event));
                        return;
                    }
                    None => {
                        warn!(%handle, %event, "event for unknown device handle");
                        return;
                    }
                }
            }
        };
        session.route(event);
    }

    /// Applies an application command to the session of `input`
    pub fn control(&self, input: InputId, command: Command) -> Result<(), CommandError> {
        self.session_by_input(input)
            .ok_or(CommandError::UnknownInput(input))?
            .control(command)
    }

    pub fn start(&self, handle: DeviceHandle) -> Result<(), CommandError> {
        self.session(handle)
            .ok_or(CommandError::UnknownHandle(handle))?
            .start()
    }

    pub fn stop(&self, handle: DeviceHandle) -> Result<(), CommandError> {
        self.session(handle)
            .ok_or(CommandError::UnknownHandle(handle))?
            .stop()
    }

    /// Looks up a session by device handle
    pub fn session(&self, handle: DeviceHandle) -> Option<Arc<CaptureSession>> {
        self.read().by_handle.get(&handle).cloned()
    }

    /// Looks up a session by input id
    pub fn session_by_input(&self, input: InputId) -> Option<Arc<CaptureSession>> {
        let tables = self.read();
        let handle = tables.by_input.get(&input)?;
        tables.by_handle.get(handle).cloned()
    }

    /// Handles of all sessions
    pub fn handles(&self) -> Vec<DeviceHandle> {
        self.read().by_handle.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_handle.is_empty()
    }

    /// Tears down the session of `input`
    ///
    /// Returns `false` if there was none.
    pub fn remove(&self, input: InputId) -> bool {
        let session = {
            let mut tables = self.write();
            match tables.by_input.remove(&input) {
                Some(handle) => tables.by_handle.remove(&handle),
                None => None,
            }
        };

        match session {
            Some(session) => {
                session.close();
                info!(%input, "session removed");
                true
            }
            None => false,
        }
    }

    /// Tears down all sessions
    pub fn shutdown(&self) {
        let sessions: Vec<_> = {
            let mut tables = self.write();
            tables.by_input.clear();
            tables.by_handle.drain().map(|(_, session)| session).collect()
        };
        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "shutting down capture sessions");
        for session in sessions {
            session.close();
        }
    }
}

impl EventSink for SessionRegistry {
    fn dispatch(&self, handle: DeviceHandle, event: Event) {
        self.dispatch_event(handle, event);
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
