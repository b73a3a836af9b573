use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Frame or buffer geometry in pixels
pub struct Resolution {
    /// Width of the frame (in pixels).
    pub width: u32,
    /// Height of the frame (in pixels).
    pub height: u32,
}

impl Resolution {
    /// Returns a resolution
    ///
    /// # Example
    ///
    /// ```
    /// use surfcam::Resolution;
    /// let res = Resolution::new(1920, 1080);
    /// assert_eq!(res.to_string(), "1920x1080");
    /// ```
    pub const fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    /// Whether both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Resolution { width, height }
    }
}
