use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::{InputId, InputInfo};
use crate::{FourCC, Resolution};

/// Number of buffers shared with the capture device unless configured otherwise
pub const DEFAULT_BUFFER_COUNT: u32 = 5;

/// Describes what a capture session delivers
///
/// Format and resolution may be left unset, in which case they are taken from the input's
/// native capability when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureAttributes {
    /// Human readable session name
    pub name: String,
    /// Logical input the session captures from
    pub input: InputId,
    /// Pixel format of the shared buffers
    pub format: Option<FourCC>,
    /// Buffer width in pixels
    pub width: Option<u32>,
    /// Buffer height in pixels
    pub height: Option<u32>,
    /// Number of buffers registered with the device
    pub buffer_count: u32,
}

impl Default for CaptureAttributes {
    fn default() -> Self {
        CaptureAttributes {
            name: String::new(),
            input: InputId::default(),
            format: None,
            width: None,
            height: None,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

impl CaptureAttributes {
    /// Returns attributes for `input` with everything else left to discovery
    ///
    /// # Example
    ///
    /// ```
    /// use surfcam::{CaptureAttributes, InputId};
    /// let attrs = CaptureAttributes::new("rear", InputId(2));
    /// assert_eq!(attrs.buffer_count, 5);
    /// assert!(!attrs.is_resolved());
    /// ```
    pub fn new(name: impl Into<String>, input: InputId) -> Self {
        CaptureAttributes {
            name: name.into(),
            input,
            ..CaptureAttributes::default()
        }
    }

    /// Whether format and resolution are all set
    pub fn is_resolved(&self) -> bool {
        self.format.is_some() && self.width.is_some() && self.height.is_some()
    }

    /// The buffer resolution, if both dimensions are set
    pub fn resolution(&self) -> Option<Resolution> {
        Some(Resolution::new(self.width?, self.height?))
    }

    /// Fills unset fields from the input's native capability
    ///
    /// Width and height are replaced together if either is missing.
    pub fn resolve(&mut self, input: &InputInfo) {
        if self.width.is_none() || self.height.is_none() {
            self.width = Some(input.resolution.width);
            self.height = Some(input.resolution.height);
        }
        if self.format.is_none() {
            self.format = input.native_format();
        }
    }
}

impl fmt::Display for CaptureAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (input {}): ", self.name, self.input)?;
        match self.resolution() {
            Some(res) => write!(f, "{}", res)?,
            None => write!(f, "native size")?,
        }
        match self.format {
            Some(format) => write!(f, " {}", format)?,
            None => write!(f, " native format")?,
        }
        write!(f, ", {} buffers", self.buffer_count)
    }
}
