use std::collections::BTreeMap;
use std::{fmt, io, thread};

use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::device::InputId;
use crate::error::SetupError;
use crate::{FourCC, Resolution};

/// Describes a camera input as reported by the discovery layer
#[derive(Debug, Clone, PartialEq)]
pub struct InputInfo {
    /// Logical input id
    pub id: InputId,
    /// Supported pixel formats, the first one is the native format
    pub formats: Vec<FourCC>,
    /// Native resolution
    pub resolution: Resolution,
    /// Native frame rate
    pub fps: f32,
}

impl InputInfo {
    /// The format the input delivers without conversion
    pub fn native_format(&self) -> Option<FourCC> {
        self.formats.first().copied()
    }
}

impl fmt::Display for InputInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input {}: {} @ {} fps", self.id, self.resolution, self.fps)?;
        if let Some(format) = self.native_format() {
            write!(f, " ({})", format)?;
        }
        Ok(())
    }
}

/// Input discovery protocol
pub trait InputDiscovery {
    /// Returns all inputs currently known to the platform
    ///
    /// An empty list is valid while the platform is still bringing up its inputs.
    fn list_inputs(&self) -> io::Result<Vec<InputInfo>>;
}

/// Snapshot of discovered inputs, indexed by id
#[derive(Debug, Default, Clone)]
pub struct InputList {
    inputs: BTreeMap<InputId, InputInfo>,
}

impl InputList {
    /// Builds a list from already discovered inputs
    pub fn new(inputs: Vec<InputInfo>) -> Self {
        InputList {
            inputs: inputs.into_iter().map(|info| (info.id, info)).collect(),
        }
    }

    /// Queries the discovery layer until it reports at least one input
    ///
    /// Empty answers and errors are retried every `config.interval` up to `config.attempts`
    /// times (forever if zero). The error of the last attempt is returned once the budget is
    /// exhausted.
    pub fn query<D: InputDiscovery + ?Sized>(
        discovery: &D,
        config: &DiscoveryConfig,
    ) -> Result<Self, SetupError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let last_err = match discovery.list_inputs() {
                Ok(inputs) if !inputs.is_empty() => {
                    info!(count = inputs.len(), "discovered camera inputs");
                    for input in &inputs {
                        info!("{}", input);
                    }
                    return Ok(InputList::new(inputs));
                }
                Ok(_) => {
                    debug!(attempt, "no camera inputs reported yet");
                    None
                }
                Err(e) => {
                    warn!(attempt, error = %e, "input discovery failed");
                    Some(e)
                }
            };

            if config.attempts != 0 && attempt >= config.attempts {
                return Err(match last_err {
                    Some(e) => SetupError::Discovery(e),
                    None => SetupError::NoInputs { attempts: attempt },
                });
            }
            thread::sleep(config.interval());
        }
    }

    /// Looks up an input by id
    pub fn get(&self, id: InputId) -> Option<&InputInfo> {
        self.inputs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputInfo> {
        self.inputs.values()
    }
}
