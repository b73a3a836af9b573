use std::{fmt, str};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Packed YUV 4:2:2, the native format of most automotive camera inputs
    pub const UYVY: FourCC = FourCC::new(b"UYVY");
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    pub const NV12: FourCC = FourCC::new(b"NV12");
    pub const RGBA: FourCC = FourCC::new(b"RGBA");

    #[allow(clippy::trivially_copy_pass_by_ref)]
    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use surfcam::FourCC;
    /// let fourcc = FourCC::new(b"UYVY");
    /// assert_eq!(fourcc, FourCC::UYVY);
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }

    /// Bytes per pixel of the first plane, if the layout is known
    ///
    /// Planar formats report the luma plane only.
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match *self {
            FourCC::UYVY | FourCC::YUYV => Some(2),
            FourCC::NV12 => Some(1),
            FourCC::RGBA => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.str() {
            Ok(string) => write!(f, "{}", string),
            Err(_) => write!(f, "{:#010x}", u32::from(*self)),
        }
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}

impl TryFrom<&str> for FourCC {
    type Error = String;

    fn try_from(code: &str) -> Result<Self, Self::Error> {
        let bytes = code.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(format!("invalid four character code: {:?}", code));
        }

        let mut repr = [0u8; 4];
        repr.copy_from_slice(bytes);
        Ok(FourCC::new(&repr))
    }
}

impl TryFrom<String> for FourCC {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        FourCC::try_from(code.as_str())
    }
}

impl From<FourCC> for String {
    fn from(fourcc: FourCC) -> Self {
        fourcc.to_string()
    }
}
