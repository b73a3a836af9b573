use std::{fmt, io, ptr::NonNull};

/// Memory used for buffer exchange
///
/// Tells the capture device how to interpret the handle stored in each buffer descriptor.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    UserPtr     = 1,
    DmaBuf      = 2,
    OsHandle    = 3,
}

impl TryFrom<u32> for Memory {
    type Error = ();

    fn try_from(repr: u32) -> Result<Self, Self::Error> {
        match repr {
            1 => Ok(Memory::UserPtr),
            2 => Ok(Memory::DmaBuf),
            3 => Ok(Memory::OsHandle),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Memory::UserPtr => write!(f, "user pointer"),
            Memory::DmaBuf => write!(f, "DMA buffered"),
            Memory::OsHandle => write!(f, "OS handle"),
        }
    }
}

/// Opaque handle of a memory region shared between the capture device and the compositor
///
/// The value is only meaningful to the layer that produced it (a file descriptor, a
/// compositor-side buffer id, ..).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub i64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Memory-mapped region
///
/// Shared mapping of a file descriptor, typically a memfd handed to the capture device.
/// The device writes into it while the compositor reads, so no safe slice view is exposed.
///
/// The destructor automatically unmaps the memory.
pub struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain shared memory; synchronization of its contents is the business of the
// buffer ownership protocol between device and display.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Maps `len` bytes of `fd` read/write and shared
    pub fn map(fd: libc::c_int, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        match NonNull::new(ptr as *mut u8) {
            Some(ptr) => Ok(Mmap { ptr, len }),
            None => Err(io::Error::new(io::ErrorKind::Other, "mmap returned null")),
        }
    }

    /// Base address of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            // ignore errors
            let _ = libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

impl fmt::Debug for Mmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mmap")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
