//! Reference-counted wrapper around one physical page buffer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::memory::{MemoryHandle, PagePool};

/// A reference-counted handle to one physical page buffer.
///
/// A single buffer can back more than one logical borrower (e.g. during
/// concurrent read views), so the underlying [`MemoryHandle`] may only be
/// recycled once every borrower is gone. The refcount starts at 0; every
/// consumer calls [`increment_refs`] before use and [`decrement_refs`] when
/// done.
///
/// The handle itself never recycles its buffer: the owner that observes the
/// transition to 0 calls [`recycle`]. This keeps the "who frees" decision in
/// the page-table lifecycle, which is the only place with enough context to
/// make it.
///
/// [`increment_refs`]: SharedPageHandle::increment_refs
/// [`decrement_refs`]: SharedPageHandle::decrement_refs
/// [`recycle`]: SharedPageHandle::recycle
pub struct SharedPageHandle {
    /// The physical page buffer; `None` once recycled.
    buffer: Mutex<Option<MemoryHandle>>,

    /// Pool the buffer is returned to when the last reference is dropped.
    pool: Arc<PagePool>,

    /// Count of logical borrowers.
    refs: AtomicU32,

    /// Internal id of the owning file.
    file_id: u32,

    /// Index of the page within its file.
    page_index: u64,
}

impl SharedPageHandle {
    /// Wrap a buffer obtained from `pool`. The refcount starts at 0.
    pub fn new(buffer: MemoryHandle, pool: Arc<PagePool>, file_id: u32, page_index: u64) -> Self {
        Self {
            buffer: Mutex::new(Some(buffer)),
            pool,
            refs: AtomicU32::new(0),
            file_id,
            page_index,
        }
    }

    /// Register one more borrower. Returns the new refcount.
    pub fn increment_refs(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one borrower. Returns the new refcount.
    ///
    /// The caller that observes 0 is responsible for calling [`recycle`].
    ///
    /// # Errors
    /// `ReferenceUnderflow` when there was no borrower to drop.
    ///
    /// [`recycle`]: SharedPageHandle::recycle
    pub fn decrement_refs(&self) -> Result<u32> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                refs.checked_sub(1)
            })
            .map(|previous| previous - 1)
            .map_err(|_| Error::ReferenceUnderflow {
                file_id: self.file_id,
                page_index: self.page_index,
            })
    }

    /// Current refcount.
    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Return the buffer to its pool.
    ///
    /// Must only be called by the owner that observed the refcount reach 0;
    /// a second call is a no-op.
    pub fn recycle(&self) -> Result<()> {
        debug_assert_eq!(self.refs(), 0, "recycling a still-referenced page");

        let buffer = self.buffer.lock().take();
        match buffer {
            Some(buffer) => self.pool.release(buffer),
            None => Ok(()),
        }
    }

    /// Zero-fill the buffer.
    pub fn clear(&self) -> Result<()> {
        let mut buffer = self.buffer.lock();
        buffer
            .as_mut()
            .ok_or_else(|| self.recycled_error())?
            .clear();
        Ok(())
    }

    /// Copy `data` into the buffer at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut buffer = self.buffer.lock();
        buffer
            .as_mut()
            .ok_or_else(|| self.recycled_error())?
            .write_at(offset, data)
    }

    /// Copy bytes at `offset` out of the buffer into `out`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let buffer = self.buffer.lock();
        buffer
            .as_ref()
            .ok_or_else(|| self.recycled_error())?
            .read_at(offset, out)
    }

    /// Internal id of the owning file.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Index of the page within its file.
    pub fn page_index(&self) -> u64 {
        self.page_index
    }

    fn recycled_error(&self) -> Error {
        Error::InvalidArgument(format!(
            "page {} of file {} was already recycled",
            self.page_index, self.file_id
        ))
    }
}
