//! Off-heap memory allocator with leak tracking.

use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, warn};
use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::memory::handle::{MemoryHandle, ALLOCATION_ALIGNMENT};
use crate::memory::profile::MemoryProfile;
use crate::memory::Intention;

/// Manages all allocations/deallocations of off-heap memory, and tracks the
/// presence of memory leaks.
///
/// One allocator is constructed per cache instance at start-up and threaded
/// through every component that needs allocation — there is no hidden global
/// singleton.
///
/// # Thread Safety
/// - `memory_consumption`: atomic counter, lock-free
/// - `leak registry`: `Mutex<HashMap>` — touched only when tracking is on
/// - `profile`: per-intention atomic counters — touched only when profiling
///   is on
///
/// # Leak tracking
/// With `track_leaks` enabled, every successful [`allocate`] records the
/// block's address together with a captured backtrace; every [`deallocate`]
/// removes the record. [`check_leaks`] reports whatever is still registered
/// — allocations that were never explicitly handed back. Set
/// `RUST_BACKTRACE=1` to get full call sites in the report.
///
/// This is advisory bookkeeping, not a substitute for deterministic
/// deallocation: the [`MemoryHandle`] being move-only already turns most
/// leak bugs into visibly unused values.
///
/// [`allocate`]: DirectMemoryAllocator::allocate
/// [`deallocate`]: DirectMemoryAllocator::deallocate
/// [`check_leaks`]: DirectMemoryAllocator::check_leaks
pub struct DirectMemoryAllocator {
    /// Bytes of off-heap memory currently allocated through this allocator.
    memory_consumption: AtomicU64,

    /// Live allocations by address, present only when tracking is enabled.
    tracked: Option<Mutex<HashMap<usize, LeakRecord>>>,

    /// Per-intention consumption counters, present only when profiling is
    /// enabled.
    profile: Option<Arc<MemoryProfile>>,
}

/// Call-site context of one live allocation.
struct LeakRecord {
    size: u32,
    intention: Intention,
    allocated_at: Backtrace,
}

impl DirectMemoryAllocator {
    /// Create an allocator.
    ///
    /// `track_leaks` keeps the live-allocation registry; `profile_memory`
    /// accumulates per-[`Intention`] counters.
    pub fn new(track_leaks: bool, profile_memory: bool) -> Self {
        Self {
            memory_consumption: AtomicU64::new(0),
            tracked: track_leaks.then(|| Mutex::new(HashMap::new())),
            profile: profile_memory.then(|| Arc::new(MemoryProfile::new())),
        }
    }

    /// Allocate a chunk of off-heap memory of the given size.
    ///
    /// If `clear` is set the chunk is zero-filled. The `intention` tag is
    /// used for memory profiling only.
    ///
    /// # Errors
    /// - `InvalidArgument` if `size` is 0
    /// - `AllocationFailed` if the native allocation cannot be satisfied;
    ///   never retried internally — retrying or freeing other memory is the
    ///   caller's decision
    pub fn allocate(&self, size: u32, clear: bool, intention: Intention) -> Result<MemoryHandle> {
        if size == 0 {
            return Err(Error::InvalidArgument(
                "size of allocated memory can not be 0".to_string(),
            ));
        }

        let layout = Layout::from_size_align(size as usize, ALLOCATION_ALIGNMENT)
            .map_err(|e| Error::InvalidArgument(format!("invalid allocation layout: {}", e)))?;

        // SAFETY: layout has non-zero size, validated above.
        let raw = unsafe {
            if clear {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };

        let addr = NonNull::new(raw).ok_or(Error::AllocationFailed { size })?;
        let handle = MemoryHandle::new(addr, size, intention);

        self.memory_consumption
            .fetch_add(size as u64, Ordering::Relaxed);

        if let Some(profile) = &self.profile {
            profile.record_alloc(intention, size);
        }

        self.track(&handle);

        Ok(handle)
    }

    /// Return an allocated chunk back to the OS.
    ///
    /// Consumes the handle; double frees are unrepresentable for callers
    /// because the handle is move-only.
    pub fn deallocate(&self, handle: MemoryHandle) {
        if let Some(tracked) = &self.tracked {
            let removed = tracked.lock().remove(&handle.address());
            if removed.is_none() {
                // A handle this allocator never produced, or an internal
                // double free. Skip the native free to avoid heap
                // corruption.
                error!(
                    "DIRECT-TRACK: untracked off-heap memory handle {:#x} detected",
                    handle.address()
                );
                debug_assert!(false, "untracked memory handle passed to deallocate");
                return;
            }
        }

        let layout = handle.layout();
        let size = handle.size();
        let addr = handle.address() as *mut u8;

        // SAFETY: `handle` owns the allocation, was produced by `allocate`
        // with this exact layout, and is consumed here.
        unsafe { dealloc(addr, layout) };

        self.memory_consumption
            .fetch_sub(size as u64, Ordering::Relaxed);

        if let Some(profile) = &self.profile {
            profile.record_dealloc(handle.intention(), size);
        }
    }

    /// Amount of off-heap memory currently consumed through this allocator,
    /// in bytes.
    pub fn memory_consumption(&self) -> u64 {
        self.memory_consumption.load(Ordering::Relaxed)
    }

    /// Per-intention memory profile, when profiling is enabled.
    pub fn profile(&self) -> Option<&Arc<MemoryProfile>> {
        self.profile.as_ref()
    }

    /// Verify that every handle produced by this allocator was freed.
    ///
    /// Logs one error per outstanding allocation (with its captured call
    /// site) plus a warning when the consumption counter is non-zero, and
    /// returns the number of leaked handles. Fails a debug assertion when
    /// anything leaked.
    pub fn check_leaks(&self) -> usize {
        let mut leaked = 0;

        if let Some(tracked) = &self.tracked {
            let tracked = tracked.lock();
            for (addr, record) in tracked.iter() {
                error!(
                    "DIRECT-TRACK: unreleased off-heap memory handle {:#x} of {} bytes \
                     ({}) detected, allocated at:\n{}",
                    addr, record.size, record.intention, record.allocated_at
                );
                leaked += 1;
            }
        }

        let consumption = self.memory_consumption();
        if consumption > 0 {
            warn!(
                "DIRECT-TRACK: memory consumption is not zero ({} bytes), it may indicate \
                 presence of memory leaks",
                consumption
            );
        }

        debug_assert!(
            leaked == 0 && consumption == 0,
            "{} leaked handle(s), {} bytes outstanding",
            leaked,
            consumption
        );

        leaked
    }

    /// Add the handle to the leak registry together with its call site.
    fn track(&self, handle: &MemoryHandle) {
        if let Some(tracked) = &self.tracked {
            tracked.lock().insert(
                handle.address(),
                LeakRecord {
                    size: handle.size(),
                    intention: handle.intention(),
                    allocated_at: Backtrace::capture(),
                },
            );
        }
    }
}
