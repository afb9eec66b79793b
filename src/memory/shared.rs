//! Shared-memory master clock.
//!
//! The engine that owns the clock source (usually the audio side) creates a
//! small memfd-backed region and publishes `(frame number, timestamp)` pairs
//! into it. Another pipeline, possibly in another process, maps the same fd
//! and reads the latest pair to anchor video frames to the audio clock.
//!
//! The region is described by an [`AvTransSharedMemory`] descriptor, which is
//! what crosses process boundaries (as JSON, with the fd passed separately).
//!
//! # Layout
//!
//! ```text
//! offset 0   u32  sequence (odd while a write is in progress)
//! offset 4   u32  frame number
//! offset 8   i64  timestamp
//! ```

use crate::error::{Error, MetaError, Result};
use crate::util::{parse_object, require_str};
use rustix::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};
use serde_json::json;
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering, fence};

/// Minimum region size able to hold the clock.
pub const CLOCK_REGION_LEN: usize = 16;

const SEQ_OFFSET: usize = 0;
const FRAME_OFFSET: usize = 4;
const TIMESTAMP_OFFSET: usize = 8;
const MAX_READ_RETRIES: usize = 64;
const MAX_NAME_LEN: usize = 256;

/// Descriptor of a shared memory region.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AvTransSharedMemory {
    /// File descriptor of the region in the current process.
    pub fd: i32,
    /// Size of the region in bytes.
    pub size: i32,
    /// Debug name of the region.
    pub name: String,
}

impl AvTransSharedMemory {
    /// Whether the descriptor points at a usable region.
    pub fn is_valid(&self) -> bool {
        self.fd > 0 && self.size > 0 && !self.name.is_empty()
    }

    /// Serialize as JSON text.
    pub fn marshal(&self) -> String {
        json!({"fd": self.fd, "size": self.size, "name": self.name}).to_string()
    }

    /// Parse JSON text produced by [`AvTransSharedMemory::marshal`].
    pub fn unmarshal(text: &str) -> std::result::Result<Self, MetaError> {
        let obj = parse_object(text)?;
        let int_field = |key: &'static str| {
            let value = obj.get(key).ok_or(MetaError::MissingField(key))?;
            value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or(MetaError::InvalidField(key))
        };
        let memory = Self {
            fd: int_field("fd")?,
            size: int_field("size")?,
            name: require_str(&obj, "name", MAX_NAME_LEN)?.to_string(),
        };
        if !memory.is_valid() {
            return Err(MetaError::InvalidField("fd"));
        }
        Ok(memory)
    }
}

/// A `(frame number, timestamp)` sample of the master clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockUnit {
    /// Frame number of the clock source.
    pub frame_num: u32,
    /// Timestamp of that frame.
    pub pts: i64,
}

/// A mapped master-clock region.
pub struct SharedClock {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
    name: String,
}

impl SharedClock {
    /// Create a new clock region.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is too small or if `memfd_create`,
    /// `ftruncate` or `mmap` fails.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size < CLOCK_REGION_LEN {
            return Err(Error::SharedMemory(format!(
                "region of {size} bytes cannot hold the clock"
            )));
        }
        let cname = CString::new(name).map_err(|e| Error::SharedMemory(e.to_string()))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, size as u64)?;
        Self::map(fd, size, name)
    }

    /// Map the region described by `memory`.
    ///
    /// The fd is duplicated; the descriptor's fd stays owned by the caller.
    ///
    /// # Safety
    ///
    /// `memory.fd` must be an open fd for the duration of this call. A file
    /// shorter than `memory.size` is rejected before mapping.
    pub unsafe fn open(memory: &AvTransSharedMemory) -> Result<Self> {
        if !memory.is_valid() || (memory.size as usize) < CLOCK_REGION_LEN {
            return Err(Error::SharedMemory(format!(
                "invalid descriptor {}",
                memory.marshal()
            )));
        }
        let borrowed = unsafe { BorrowedFd::borrow_raw(memory.fd) };
        let fd = rustix::io::fcntl_dupfd_cloexec(borrowed, 0)?;
        let stat = rustix::fs::fstat(&fd)?;
        if stat.st_size < i64::from(memory.size) {
            return Err(Error::SharedMemory(format!(
                "region {} is {} bytes, descriptor claims {}",
                memory.name, stat.st_size, memory.size
            )));
        }
        Self::map(fd, memory.size as usize, &memory.name)
    }

    fn map(fd: OwnedFd, len: usize, name: &str) -> Result<Self> {
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::SharedMemory("mmap returned null".into()))?;
        Ok(Self {
            fd,
            ptr,
            len,
            name: name.to_string(),
        })
    }

    /// Descriptor of this region for hand-over to another pipeline.
    pub fn descriptor(&self) -> AvTransSharedMemory {
        AvTransSharedMemory {
            fd: self.fd.as_raw_fd(),
            size: self.len as i32,
            name: self.name.clone(),
        }
    }

    /// Publish a clock sample.
    pub fn write(&self, unit: ClockUnit) {
        let seq = self.seq();
        let start = seq.load(Ordering::Relaxed);
        seq.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.frame().store(unit.frame_num, Ordering::Relaxed);
        self.timestamp().store(unit.pts, Ordering::Relaxed);
        seq.store(start.wrapping_add(2), Ordering::Release);
    }

    /// Read the latest clock sample.
    ///
    /// Returns `None` if nothing was published yet or the writer kept the
    /// region busy for every retry.
    pub fn read(&self) -> Option<ClockUnit> {
        let seq = self.seq();
        for _ in 0..MAX_READ_RETRIES {
            let before = seq.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let unit = ClockUnit {
                frame_num: self.frame().load(Ordering::Relaxed),
                pts: self.timestamp().load(Ordering::Relaxed),
            };
            fence(Ordering::Acquire);
            if seq.load(Ordering::Relaxed) == before {
                return (before != 0).then_some(unit);
            }
        }
        None
    }

    fn seq(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned, at least CLOCK_REGION_LEN long
        // and lives as long as `self`.
        unsafe { &*(self.ptr.as_ptr().add(SEQ_OFFSET) as *const AtomicU32) }
    }

    fn frame(&self) -> &AtomicU32 {
        // SAFETY: as in `seq`.
        unsafe { &*(self.ptr.as_ptr().add(FRAME_OFFSET) as *const AtomicU32) }
    }

    fn timestamp(&self) -> &AtomicI64 {
        // SAFETY: as in `seq`; offset 8 is 8-byte aligned.
        unsafe { &*(self.ptr.as_ptr().add(TIMESTAMP_OFFSET) as *const AtomicI64) }
    }
}

impl Drop for SharedClock {
    fn drop(&mut self) {
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

impl std::fmt::Debug for SharedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedClock")
            .field("fd", &self.fd.as_raw_fd())
            .field("len", &self.len)
            .field("name", &self.name)
            .finish()
    }
}

// SAFETY: all access to the mapping goes through atomics.
unsafe impl Send for SharedClock {}
unsafe impl Sync for SharedClock {}

impl AsFd for SharedClock {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_marshal() {
        let memory = AvTransSharedMemory {
            fd: 12,
            size: 4096,
            name: "av_sync".into(),
        };
        assert_eq!(AvTransSharedMemory::unmarshal(&memory.marshal()).unwrap(), memory);
        assert!(AvTransSharedMemory::unmarshal(r#"{"fd":0,"size":4096,"name":"x"}"#).is_err());
        assert!(AvTransSharedMemory::unmarshal(r#"{"fd":3,"size":"big","name":"x"}"#).is_err());
        assert!(AvTransSharedMemory::unmarshal("not json").is_err());
    }

    #[test]
    fn test_open_rejects_short_file() {
        let file = tempfile::tempfile().unwrap();
        let memory = AvTransSharedMemory {
            fd: file.as_raw_fd(),
            size: 64,
            name: "short".into(),
        };
        // SAFETY: `file` stays open until the end of the test.
        let result = unsafe { SharedClock::open(&memory) };
        assert!(matches!(result, Err(Error::SharedMemory(_))));

        file.set_len(64).unwrap();
        // SAFETY: as above.
        let clock = unsafe { SharedClock::open(&memory) }.unwrap();
        assert_eq!(clock.read(), None);
    }

    #[test]
    fn test_clock_publish_and_read() {
        let clock = SharedClock::create("clock-test", 4096).unwrap();
        assert_eq!(clock.read(), None);
        clock.write(ClockUnit {
            frame_num: 3,
            pts: 1_000,
        });
        assert_eq!(
            clock.read(),
            Some(ClockUnit {
                frame_num: 3,
                pts: 1_000
            })
        );
    }

    #[test]
    fn test_open_shares_region() {
        let owner = SharedClock::create("clock-share", CLOCK_REGION_LEN).unwrap();
        let reader = unsafe { SharedClock::open(&owner.descriptor()).unwrap() };
        owner.write(ClockUnit {
            frame_num: 9,
            pts: 42,
        });
        assert_eq!(reader.read().map(|u| u.frame_num), Some(9));
    }

    #[test]
    fn test_region_too_small() {
        assert!(SharedClock::create("tiny", 4).is_err());
    }
}
