//! Per-file page table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::error;

use crate::cache::{CacheEntry, SharedPageHandle};
use crate::common::{Error, ExternalFileId, Result};
use crate::memory::{Intention, PagePool};

/// The page table of one logical in-memory file.
///
/// Maps page indices to cache entries. Indices are handed out monotonically
/// from 0 with no gaps: [`add_new_page`] races are resolved with an
/// optimistic insert-if-absent loop, so the set of indices ever assigned
/// under concurrent allocation is exactly `{0, …, n-1}`.
///
/// Every entry holds one *creation reference* on its shared page handle,
/// owned by this table and dropped by [`clear`]. Loads add usage counts on
/// top, never extra references.
///
/// # Thread Safety
/// The table is a `DashMap`, so page lookup and allocation on one file
/// never block on directory-level operations or on other files.
///
/// [`add_new_page`]: MemoryFile::add_new_page
/// [`clear`]: MemoryFile::clear
pub struct MemoryFile {
    /// Id of the cache instance owning this file.
    storage_id: u32,

    /// Internal file id within the owning cache.
    id: u32,

    /// Pool that page buffers are drawn from and recycled to.
    pool: Arc<PagePool>,

    /// Index → entry map.
    pages: DashMap<u64, Arc<CacheEntry>>,

    /// Highest assigned index + 1; 0 when the file is empty.
    filled_up_to: AtomicU64,
}

impl MemoryFile {
    pub fn new(storage_id: u32, id: u32, pool: Arc<PagePool>) -> Self {
        Self {
            storage_id,
            id,
            pool,
            pages: DashMap::new(),
            filled_up_to: AtomicU64::new(0),
        }
    }

    /// Internal file id within the owning cache.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// External id of this file.
    pub fn external_id(&self) -> ExternalFileId {
        ExternalFileId::compose(self.storage_id, self.id)
    }

    /// Look up an existing page.
    ///
    /// Returns `None` if the index was never allocated. Usage counting is
    /// the caller's concern (the facade increments before exposing the
    /// entry).
    pub fn load_page(&self, index: u64) -> Option<Arc<CacheEntry>> {
        self.pages.get(&index).map(|entry| Arc::clone(entry.value()))
    }

    /// Allocate the next page index and back it with a zero-filled buffer
    /// from the pool.
    ///
    /// Optimistic retry loop: compute the candidate index, obtain a fresh
    /// page, insert only if the slot is still vacant; when another thread
    /// wins the race for the same index, recycle the fresh page and retry
    /// against the new maximum. No two callers ever receive the same index
    /// and no index is skipped.
    ///
    /// # Errors
    /// `AllocationFailed` when a backing buffer cannot be obtained. Never
    /// retried; only index-race conflicts loop.
    pub fn add_new_page(&self) -> Result<Arc<CacheEntry>> {
        loop {
            let index = self.filled_up_to.load(Ordering::Acquire);

            let buffer = self.pool.acquire(true, Intention::AddNewPageInCache)?;
            let page = Arc::new(SharedPageHandle::new(
                buffer,
                Arc::clone(&self.pool),
                self.id,
                index,
            ));
            // Creation reference, owned by this table until clear().
            page.increment_refs();

            let entry = Arc::new(CacheEntry::new(
                self.external_id(),
                index,
                Arc::clone(&page),
                true,
            ));

            match self.pages.entry(index) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&entry));
                    self.filled_up_to.fetch_max(index + 1, Ordering::AcqRel);
                    return Ok(entry);
                }
                Entry::Occupied(_) => {
                    // Lost the race for this index; hand the fresh page
                    // back and retry with the advanced maximum.
                    if page.decrement_refs()? == 0 {
                        page.recycle()?;
                    }
                }
            }
        }
    }

    /// Index of the highest page + 1, or 0 if the file is empty.
    pub fn size(&self) -> u64 {
        self.filled_up_to.load(Ordering::Acquire)
    }

    /// Number of resident pages.
    pub fn used_pages(&self) -> u64 {
        self.pages.len() as u64
    }

    /// Drop every entry, recycling page buffers as their refcounts reach 0,
    /// and reset the index counter.
    ///
    /// # Errors
    /// `PagesStillInUse` when any entry still had unreleased loads. Cleanup
    /// completes regardless; the error is reported afterwards.
    pub fn clear(&self) -> Result<()> {
        let entries: Vec<Arc<CacheEntry>> = self
            .pages
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        self.pages.clear();
        self.filled_up_to.store(0, Ordering::Release);

        let mut still_in_use = 0;
        let mut first_error: Option<Error> = None;

        for entry in entries {
            if entry.usages() > 0 {
                still_in_use += 1;
            }

            let page = entry.page();
            match page.decrement_refs() {
                Ok(0) => {
                    if let Err(e) = page.recycle() {
                        first_error.get_or_insert(e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if still_in_use > 0 {
            if let Some(e) = &first_error {
                error!(
                    "cleanup error for file {} suppressed by still-in-use report: {}",
                    self.id, e
                );
            }
            return Err(Error::PagesStillInUse {
                file_id: self.id,
                pages: still_in_use,
            });
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DirectMemoryAllocator;

    fn create_file(pool_capacity: usize) -> (Arc<PagePool>, MemoryFile) {
        let allocator = Arc::new(DirectMemoryAllocator::new(false, false));
        let pool = Arc::new(PagePool::new(allocator, 256, pool_capacity));
        let file = MemoryFile::new(1, 7, Arc::clone(&pool));
        (pool, file)
    }

    #[test]
    fn test_monotonic_indices() {
        let (_pool, file) = create_file(4);

        for expected in 0..5 {
            let entry = file.add_new_page().unwrap();
            assert_eq!(entry.page_index(), expected);
        }

        assert_eq!(file.size(), 5);
        assert_eq!(file.used_pages(), 5);
    }

    #[test]
    fn test_load_existing_and_missing() {
        let (_pool, file) = create_file(4);

        let created = file.add_new_page().unwrap();
        let loaded = file.load_page(0).unwrap();
        assert!(Arc::ptr_eq(&created, &loaded));

        assert!(file.load_page(1).is_none());
    }

    #[test]
    fn test_clear_recycles_pages() {
        let (pool, file) = create_file(8);

        for _ in 0..3 {
            file.add_new_page().unwrap();
        }
        assert_eq!(pool.pooled_pages(), 0);

        file.clear().unwrap();

        assert_eq!(file.size(), 0);
        assert_eq!(file.used_pages(), 0);
        assert_eq!(pool.pooled_pages(), 3);
    }

    #[test]
    fn test_clear_reports_checked_out_pages() {
        let (pool, file) = create_file(8);

        let entry = file.add_new_page().unwrap();
        entry.increment_usages();
        file.add_new_page().unwrap();

        let result = file.clear();
        assert!(matches!(
            result,
            Err(Error::PagesStillInUse { file_id: 7, pages: 1 })
        ));

        // Cleanup completed anyway.
        assert_eq!(file.used_pages(), 0);
        assert_eq!(pool.pooled_pages(), 2);
    }

    #[test]
    fn test_clear_reports_still_in_use_over_recycle_error() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (_pool, file) = create_file(8);

        let checked_out = file.add_new_page().unwrap();
        checked_out.increment_usages();

        // Steal the second entry's creation reference so its cleanup fails.
        let broken = file.add_new_page().unwrap();
        broken.page().decrement_refs().unwrap();

        let result = file.clear();
        assert!(matches!(
            result,
            Err(Error::PagesStillInUse { file_id: 7, pages: 1 })
        ));
        assert_eq!(file.used_pages(), 0);
    }

    #[test]
    fn test_reallocation_after_clear_starts_at_zero() {
        let (_pool, file) = create_file(4);

        file.add_new_page().unwrap();
        file.add_new_page().unwrap();
        file.clear().unwrap();

        let entry = file.add_new_page().unwrap();
        assert_eq!(entry.page_index(), 0);
    }

    #[test]
    fn test_concurrent_allocation_no_duplicates_no_gaps() {
        use std::thread;

        let (_pool, file) = create_file(16);
        let file = Arc::new(file);

        let mut handles = vec![];
        for _ in 0..8 {
            let file = Arc::clone(&file);
            handles.push(thread::spawn(move || {
                let mut indices = Vec::with_capacity(50);
                for _ in 0..50 {
                    indices.push(file.add_new_page().unwrap().page_index());
                }
                indices
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        let expected: Vec<u64> = (0..400).collect();
        assert_eq!(all, expected);
        assert_eq!(file.size(), 400);
    }
}
