//! Recycling pool for page-sized memory blocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::memory::{DirectMemoryAllocator, Intention, MemoryHandle};

/// A capacity-bounded recycler of page-sized [`MemoryHandle`]s.
///
/// Page-sized allocations dominate database workloads; recycling avoids
/// allocator churn and keeps a working set of warm pages resident. Handles
/// returned while the pool is full are deallocated instead of pooled.
///
/// # Thread Safety
/// - `free_list`: `Mutex<Vec<_>>` — LIFO for cache locality
/// - `pool_size`: atomic mirror of the free-list length, so observers never
///   take the lock
pub struct PagePool {
    allocator: Arc<DirectMemoryAllocator>,

    /// Size of every handle this pool hands out, in bytes.
    page_size: u32,

    /// Maximum number of handles kept on the free list.
    capacity: usize,

    /// Recycled handles, most recently released first.
    free_list: Mutex<Vec<MemoryHandle>>,

    /// Current free-list length.
    pool_size: AtomicUsize,
}

impl PagePool {
    /// Create a pool handing out `page_size`-byte blocks and keeping at most
    /// `capacity` of them for reuse.
    pub fn new(allocator: Arc<DirectMemoryAllocator>, page_size: u32, capacity: usize) -> Self {
        assert!(page_size > 0, "page_size must be > 0");

        Self {
            allocator,
            page_size,
            capacity,
            free_list: Mutex::new(Vec::with_capacity(capacity)),
            pool_size: AtomicUsize::new(0),
        }
    }

    /// Obtain a page-sized block, reusing a pooled one when available.
    ///
    /// A reused block still contains whatever its previous owner wrote
    /// unless `clear` is set.
    ///
    /// # Errors
    /// `AllocationFailed` when the free list is empty and the native
    /// allocation cannot be satisfied.
    pub fn acquire(&self, clear: bool, intention: Intention) -> Result<MemoryHandle> {
        let pooled = {
            let mut free_list = self.free_list.lock();
            let handle = free_list.pop();
            if handle.is_some() {
                self.pool_size.store(free_list.len(), Ordering::Relaxed);
            }
            handle
        };

        match pooled {
            Some(mut handle) => {
                if clear {
                    handle.clear();
                }
                Ok(handle)
            }
            None => self.allocator.allocate(self.page_size, clear, intention),
        }
    }

    /// Return a block to the pool, or deallocate it when the pool is full.
    ///
    /// # Errors
    /// `InvalidArgument` if the handle's size differs from the pool's page
    /// size; the handle is deallocated before the error is returned so the
    /// block is not leaked.
    pub fn release(&self, handle: MemoryHandle) -> Result<()> {
        if handle.size() != self.page_size {
            let size = handle.size();
            self.allocator.deallocate(handle);
            return Err(Error::InvalidArgument(format!(
                "released handle of size {} into a pool of page size {}",
                size, self.page_size
            )));
        }

        let overflow = {
            let mut free_list = self.free_list.lock();
            if free_list.len() < self.capacity {
                free_list.push(handle);
                self.pool_size.store(free_list.len(), Ordering::Relaxed);
                None
            } else {
                Some(handle)
            }
        };

        if let Some(handle) = overflow {
            self.allocator.deallocate(handle);
        }

        Ok(())
    }

    /// Deallocate every pooled handle and empty the free list.
    ///
    /// Called on shutdown; acquiring after a clear simply allocates fresh
    /// blocks.
    pub fn clear(&self) {
        let drained: Vec<MemoryHandle> = {
            let mut free_list = self.free_list.lock();
            self.pool_size.store(0, Ordering::Relaxed);
            free_list.drain(..).collect()
        };

        for handle in drained {
            self.allocator.deallocate(handle);
        }
    }

    /// Number of handles currently held on the free list.
    pub fn pooled_pages(&self) -> usize {
        self.pool_size.load(Ordering::Relaxed)
    }

    /// Size of the blocks this pool recycles, in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Maximum number of pooled handles.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The allocator backing this pool.
    pub fn allocator(&self) -> &Arc<DirectMemoryAllocator> {
        &self.allocator
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_pool(page_size: u32, capacity: usize) -> PagePool {
        let allocator = Arc::new(DirectMemoryAllocator::new(false, false));
        PagePool::new(allocator, page_size, capacity)
    }

    #[test]
    fn test_acquire_allocates_when_empty() {
        let pool = create_pool(512, 4);

        let handle = pool.acquire(true, Intention::Test).unwrap();
        assert_eq!(handle.size(), 512);
        assert_eq!(pool.pooled_pages(), 0);
        assert_eq!(pool.allocator().memory_consumption(), 512);

        pool.release(handle).unwrap();
        assert_eq!(pool.pooled_pages(), 1);
        // Pooled handles stay allocated.
        assert_eq!(pool.allocator().memory_consumption(), 512);
    }

    #[test]
    fn test_recycling_preserves_contents() {
        let pool = create_pool(128, 1);

        let mut handle = pool.acquire(true, Intention::Test).unwrap();
        handle.write_at(0, &[0xAB; 16]).unwrap();
        pool.release(handle).unwrap();

        // Same physical block, previous contents still visible.
        let handle = pool.acquire(false, Intention::Test).unwrap();
        assert_eq!(&handle.as_slice()[..16], &[0xAB; 16]);

        // Acquiring with clear wipes a recycled block.
        pool.release(handle).unwrap();
        let handle = pool.acquire(true, Intention::Test).unwrap();
        assert!(handle.as_slice().iter().all(|&b| b == 0));

        pool.release(handle).unwrap();
    }

    #[test]
    fn test_capacity_bounds_free_list() {
        let pool = create_pool(256, 2);

        let a = pool.acquire(false, Intention::Test).unwrap();
        let b = pool.acquire(false, Intention::Test).unwrap();
        let c = pool.acquire(false, Intention::Test).unwrap();
        assert_eq!(pool.allocator().memory_consumption(), 3 * 256);

        pool.release(a).unwrap();
        pool.release(b).unwrap();
        pool.release(c).unwrap();

        // Third release overflows the pool and is deallocated.
        assert_eq!(pool.pooled_pages(), 2);
        assert_eq!(pool.allocator().memory_consumption(), 2 * 256);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let allocator = Arc::new(DirectMemoryAllocator::new(false, false));
        let pool = PagePool::new(Arc::clone(&allocator), 256, 2);

        let foreign = allocator.allocate(128, false, Intention::Test).unwrap();
        assert!(pool.release(foreign).is_err());

        // The mis-sized block was deallocated, not leaked.
        assert_eq!(allocator.memory_consumption(), 0);
    }

    #[test]
    fn test_clear_deallocates_everything() {
        let pool = create_pool(256, 8);

        for _ in 0..4 {
            let handle = pool.acquire(false, Intention::Test).unwrap();
            pool.release(handle).unwrap();
        }

        // One block was recycled through all four iterations.
        assert_eq!(pool.pooled_pages(), 1);

        pool.clear();
        assert_eq!(pool.pooled_pages(), 0);
        assert_eq!(pool.allocator().memory_consumption(), 0);
    }

    #[test]
    fn test_conservation_under_churn() {
        use std::thread;

        let pool = Arc::new(create_pool(1024, 4));
        let mut handles = vec![];

        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let page = pool.acquire(false, Intention::Test).unwrap();
                    pool.release(page).unwrap();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        // Everything live is pooled; consumption matches exactly.
        assert!(pool.pooled_pages() <= 4);
        assert_eq!(
            pool.allocator().memory_consumption(),
            pool.pooled_pages() as u64 * 1024
        );
    }
}
