//! Positional byte sinks for decoded article data
//!
//! The yEnc decoder places each part at the absolute offset its
//! `=ypart` header declares, so all it needs from the destination is a
//! positional write and a flush. Production writes go through a shared
//! writable mapping of the destination file; tests use an in-memory
//! buffer.

use std::cell::UnsafeCell;
use std::fs::File;
use std::io;
use std::sync::Mutex;

use memmap2::MmapMut;

/// Capability consumed by the decoder: positional write plus flush.
///
/// `write_at` takes `&self` so concurrent segment tasks can write into
/// one sink without locking; callers must only write disjoint ranges.
pub trait SinkWrite: Send + Sync {
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;
}

/// Writable shared mapping over a pre-sized destination file.
///
/// The mapping length is fixed at creation; writes past the end are
/// rejected rather than growing the file. Disjointness of concurrent
/// writes is guaranteed by the yEnc part offsets, not by this type.
pub struct MappedSink {
    map: UnsafeCell<MmapMut>,
    len: u64,
}

// SAFETY: all mutation goes through `write_at`, whose callers write
// disjoint, bounds-checked ranges of the mapping.
unsafe impl Sync for MappedSink {}

impl MappedSink {
    /// Map `file` writable. The file must already be sized; mapping an
    /// empty file is an error on most platforms, so callers skip the
    /// sink entirely for zero-length outputs.
    pub fn new(file: &File) -> io::Result<Self> {
        // SAFETY: the engine keeps the file untouched (no truncate, no
        // writes through other handles) for the life of the mapping.
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(Self {
            len: map.len() as u64,
            map: UnsafeCell::new(map),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl SinkWrite for MappedSink {
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write offset overflow"))?;
        if end > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at {} past mapping end {}", buf.len(), offset, self.len),
            ));
        }
        // SAFETY: range checked above; concurrent writers cover
        // disjoint ranges per the trait contract.
        unsafe {
            let map = &mut *self.map.get();
            std::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                map.as_mut_ptr().add(offset as usize),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Schedule the dirty pages for write-back without waiting for the
    /// disk. The unmap on drop completes the hand-over to the kernel.
    fn flush(&self) -> io::Result<()> {
        // SAFETY: flush_async takes no references into the mapping that
        // could alias an in-progress write; callers flush after their
        // writers have finished.
        unsafe { &*self.map.get() }.flush_async()
    }
}

/// In-memory sink used by the decoder tests.
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new(len: usize) -> Self {
        Self {
            buf: Mutex::new(vec![0; len]),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf.into_inner().expect("sink lock poisoned")
    }
}

impl SinkWrite for BufferSink {
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.buf.lock().expect("sink lock poisoned");
        let end = offset as usize + buf.len();
        if end > guard.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write past end of buffer",
            ));
        }
        guard[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
