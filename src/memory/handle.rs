//! Owned handle to one off-heap allocation.

use std::alloc::Layout;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use crate::common::{Error, Result};
use crate::memory::Intention;

/// Alignment of every off-heap allocation.
///
/// Fixed at construction; the layout is rebuilt from `size` on deallocation,
/// so it must never vary per handle.
pub(crate) const ALLOCATION_ALIGNMENT: usize = 8;

/// An owned, move-only handle to one off-heap memory block.
///
/// A `MemoryHandle` is produced by [`DirectMemoryAllocator::allocate`] and
/// consumed by [`DirectMemoryAllocator::deallocate`]. Because it is affine
/// (no `Clone`), a given address is associated with at most one live handle
/// at a time, and forgetting to hand it back shows up as an unused owned
/// value — in addition to the runtime leak registry.
///
/// Equality and hashing are defined over `(address, size)` only; the
/// intention tag is diagnostic.
///
/// # Thread Safety
/// The handle exclusively owns its block, so moving it across threads is
/// sound even though it holds a raw pointer.
///
/// [`DirectMemoryAllocator::allocate`]: crate::memory::DirectMemoryAllocator::allocate
/// [`DirectMemoryAllocator::deallocate`]: crate::memory::DirectMemoryAllocator::deallocate
pub struct MemoryHandle {
    addr: NonNull<u8>,
    size: u32,
    intention: Intention,
}

// SAFETY: the handle is the unique owner of its allocation; no aliasing
// views escape except through &self/&mut self borrows.
unsafe impl Send for MemoryHandle {}
unsafe impl Sync for MemoryHandle {}

impl MemoryHandle {
    /// Wrap a freshly allocated block.
    ///
    /// `addr` must point to a live allocation of exactly `size` bytes with
    /// [`ALLOCATION_ALIGNMENT`], owned by no other handle.
    pub(crate) fn new(addr: NonNull<u8>, size: u32, intention: Intention) -> Self {
        Self {
            addr,
            size,
            intention,
        }
    }

    /// Raw address of the block, for registry bookkeeping.
    #[inline]
    pub fn address(&self) -> usize {
        self.addr.as_ptr() as usize
    }

    /// Size of the block in bytes.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Why this block was allocated.
    #[inline]
    pub fn intention(&self) -> Intention {
        self.intention
    }

    /// Allocation layout of the block.
    pub(crate) fn layout(&self) -> Layout {
        // Size was validated at allocation time, the layout cannot fail.
        Layout::from_size_align(self.size as usize, ALLOCATION_ALIGNMENT)
            .expect("allocation layout was validated at allocation time")
    }

    /// Byte view over the whole block.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: we own `size` bytes at `addr` for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.addr.as_ptr(), self.size as usize) }
    }

    /// Mutable byte view over the whole block.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: exclusive borrow of the unique owner.
        unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr(), self.size as usize) }
    }

    /// Zero-fill the whole block.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }

    /// Copy `data` into the block at `offset`.
    ///
    /// # Errors
    /// `InvalidArgument` if the write would run past the end of the block.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.size as usize)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "write of {} bytes at offset {} exceeds block size {}",
                    data.len(),
                    offset,
                    self.size
                ))
            })?;

        self.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy bytes at `offset` out of the block into `out`.
    ///
    /// # Errors
    /// `InvalidArgument` if the read would run past the end of the block.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(out.len())
            .filter(|&end| end <= self.size as usize)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "read of {} bytes at offset {} exceeds block size {}",
                    out.len(),
                    offset,
                    self.size
                ))
            })?;

        out.copy_from_slice(&self.as_slice()[offset..end]);
        Ok(())
    }
}

impl PartialEq for MemoryHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.size == other.size
    }
}

impl Eq for MemoryHandle {}

impl Hash for MemoryHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
        self.size.hash(state);
    }
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("addr", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .field("intention", &self.intention)
            .finish()
    }
}
