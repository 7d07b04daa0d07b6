//! Per-page bookkeeping record.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::RawRwLock;

use crate::cache::SharedPageHandle;
use crate::common::{Error, ExternalFileId, Result};

/// Per-(file, page-index) cache metadata: the shared page handle, a dirty
/// flag, an active-borrower count and a reader/writer lock guarding the
/// bytes.
///
/// # Lock discipline
/// The page lock is held across the caller's entire load/release window, so
/// it is a raw lock with explicit acquire/release pairs instead of an RAII
/// guard. Every `acquire_*` must be matched by exactly one `release_*` of
/// the same mode on the same thread; an unpaired release corrupts the lock
/// state. The RAII layer in [`crate::cache::guard`] wraps these pairs for
/// callers that can keep the borrow lexical.
///
/// # Usage counting
/// `usages` counts successful loads that were not yet released. An entry
/// must never be evicted or freed while `usages > 0`, and a release without
/// a matching load is rejected.
pub struct CacheEntry {
    /// External id of the owning file.
    file_id: ExternalFileId,

    /// Index of the page within its file.
    page_index: u64,

    /// The physical page backing this entry.
    page: Arc<SharedPageHandle>,

    /// Whether this entry was created by page allocation (as opposed to a
    /// load of an existing page).
    newly_allocated: bool,

    /// Set when a writer releases the page with `changed = true`. Advisory;
    /// consumed by flush/WAL layers outside this crate.
    dirty: AtomicBool,

    /// Number of loads not yet matched by a release.
    usages: AtomicU32,

    /// Reader/writer lock over the page bytes.
    lock: RawRwLock,
}

impl CacheEntry {
    /// Create an entry backed by `page`.
    pub fn new(
        file_id: ExternalFileId,
        page_index: u64,
        page: Arc<SharedPageHandle>,
        newly_allocated: bool,
    ) -> Self {
        Self {
            file_id,
            page_index,
            page,
            newly_allocated,
            dirty: AtomicBool::new(false),
            usages: AtomicU32::new(0),
            lock: RawRwLock::INIT,
        }
    }

    // ========================================================================
    // Page lock
    // ========================================================================

    /// Block until shared access to the page bytes is granted.
    pub fn acquire_shared_lock(&self) {
        self.lock.lock_shared();
    }

    /// Release one shared hold. Must pair with a prior
    /// [`acquire_shared_lock`] on this thread.
    ///
    /// [`acquire_shared_lock`]: CacheEntry::acquire_shared_lock
    pub fn release_shared_lock(&self) {
        // SAFETY: pairing contract documented on the type; the cache facade
        // only calls this from `release_from_read`, mirroring a prior
        // `load_for_read`.
        unsafe { self.lock.unlock_shared() }
    }

    /// Block until exclusive access to the page bytes is granted.
    pub fn acquire_exclusive_lock(&self) {
        self.lock.lock_exclusive();
    }

    /// Release the exclusive hold. Must pair with a prior
    /// [`acquire_exclusive_lock`] on this thread.
    ///
    /// [`acquire_exclusive_lock`]: CacheEntry::acquire_exclusive_lock
    pub fn release_exclusive_lock(&self) {
        // SAFETY: pairing contract documented on the type.
        unsafe { self.lock.unlock_exclusive() }
    }

    /// Try to take the exclusive lock without blocking.
    pub fn try_acquire_exclusive_lock(&self) -> bool {
        self.lock.try_lock_exclusive()
    }

    // ========================================================================
    // Usage counting
    // ========================================================================

    /// Record one successful load. Returns the new usage count.
    pub fn increment_usages(&self) -> u32 {
        self.usages.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record one release. Returns the new usage count.
    ///
    /// # Errors
    /// `UsageCountUnderflow` when there was no unreleased load; the count is
    /// left untouched.
    pub fn decrement_usages(&self) -> Result<u32> {
        self.usages
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |usages| {
                usages.checked_sub(1)
            })
            .map(|previous| previous - 1)
            .map_err(|_| Error::UsageCountUnderflow {
                file_id: self.file_id.internal_id(),
                page_index: self.page_index,
            })
    }

    /// Number of loads not yet released.
    pub fn usages(&self) -> u32 {
        self.usages.load(Ordering::Acquire)
    }

    // ========================================================================
    // Page bytes
    // ========================================================================

    /// The shared handle backing this entry.
    pub fn page(&self) -> &Arc<SharedPageHandle> {
        &self.page
    }

    /// Copy `data` into the page at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.page.write_at(offset, data)
    }

    /// Copy page bytes at `offset` into `out`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.page.read_at(offset, out)
    }

    // ========================================================================
    // Flags and identity
    // ========================================================================

    /// Mark the page as modified. Advisory.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Whether the page was modified since creation/load.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Whether this entry was created by `allocate_new_page`.
    pub fn is_newly_allocated(&self) -> bool {
        self.newly_allocated
    }

    /// External id of the owning file.
    pub fn file_id(&self) -> ExternalFileId {
        self.file_id
    }

    /// Index of the page within its file.
    pub fn page_index(&self) -> u64 {
        self.page_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DirectMemoryAllocator, Intention, PagePool};

    fn create_entry() -> CacheEntry {
        let allocator = Arc::new(DirectMemoryAllocator::new(false, false));
        let pool = Arc::new(PagePool::new(allocator, 256, 4));
        let buffer = pool.acquire(true, Intention::Test).unwrap();
        let page = Arc::new(SharedPageHandle::new(buffer, pool, 1, 0));
        page.increment_refs();
        CacheEntry::new(ExternalFileId::compose(0, 1), 0, page, true)
    }

    #[test]
    fn test_usage_counting() {
        let entry = create_entry();

        assert_eq!(entry.usages(), 0);
        assert_eq!(entry.increment_usages(), 1);
        assert_eq!(entry.increment_usages(), 2);
        assert_eq!(entry.decrement_usages().unwrap(), 1);
        assert_eq!(entry.decrement_usages().unwrap(), 0);
    }

    #[test]
    fn test_mismatched_release_rejected() {
        let entry = create_entry();

        assert!(matches!(
            entry.decrement_usages(),
            Err(Error::UsageCountUnderflow { .. })
        ));
        assert_eq!(entry.usages(), 0);
    }

    #[test]
    fn test_shared_lock_allows_many_holders() {
        let entry = create_entry();

        entry.acquire_shared_lock();
        entry.acquire_shared_lock();
        // An exclusive attempt must not succeed while readers hold the lock.
        assert!(!entry.try_acquire_exclusive_lock());

        entry.release_shared_lock();
        entry.release_shared_lock();

        assert!(entry.try_acquire_exclusive_lock());
        entry.release_exclusive_lock();
    }

    #[test]
    fn test_exclusive_lock_blocks_other_writers() {
        use std::thread;

        let entry = Arc::new(create_entry());
        entry.acquire_exclusive_lock();

        let other = Arc::clone(&entry);
        let waiter = thread::spawn(move || {
            other.acquire_exclusive_lock();
            other.release_exclusive_lock();
        });

        // The waiter cannot finish until we release.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());

        entry.release_exclusive_lock();
        waiter.join().unwrap();
    }

    #[test]
    fn test_dirty_flag() {
        let entry = create_entry();
        assert!(!entry.is_dirty());

        entry.mark_dirty();
        assert!(entry.is_dirty());
    }

    #[test]
    fn test_page_byte_access() {
        let entry = create_entry();

        entry.write_at(0, &[0xAB; 8]).unwrap();
        let mut out = [0u8; 8];
        entry.read_at(0, &mut out).unwrap();
        assert_eq!(out, [0xAB; 8]);
    }
}
