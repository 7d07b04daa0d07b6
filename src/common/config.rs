//! Configuration for the page cache and its allocator.

use std::time::Duration;

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems and the page size used by the
/// storage engines this cache was written for.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Default maximum number of recycled pages kept by a [`PagePool`].
///
/// [`PagePool`]: crate::memory::PagePool
pub const DEFAULT_POOL_CAPACITY: usize = 512;

/// Default interval between periodic memory-profile reports.
pub const DEFAULT_PROFILE_INTERVAL: Duration = Duration::from_secs(300);

/// Construction-time settings for a cache instance.
///
/// This is the explicit context that replaces process-wide singletons: one
/// `CacheConfig` is turned into one allocator + pool + cache at storage
/// engine start-up, and every component that needs allocation receives a
/// reference to those objects.
///
/// # Example
/// ```
/// use pagepool::CacheConfig;
///
/// let config = CacheConfig::new(4096, 8).with_leak_tracking(true);
/// assert_eq!(config.page_size, 4096);
/// assert_eq!(config.pool_capacity, 8);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Size of every cached page in bytes. Must be > 0.
    pub page_size: u32,

    /// Maximum number of page buffers the pool keeps for reuse.
    pub pool_capacity: usize,

    /// Keep a registry of live allocations and their call sites so that
    /// leaks can be reported on shutdown.
    pub track_leaks: bool,

    /// Accumulate allocation sizes per [`Intention`] for profiling reports.
    ///
    /// [`Intention`]: crate::memory::Intention
    pub profile_memory: bool,

    /// Interval between periodic profile reports, when profiling is on.
    pub profile_interval: Duration,
}

impl CacheConfig {
    /// Create a config with the given page size and pool capacity and all
    /// diagnostics disabled.
    pub fn new(page_size: u32, pool_capacity: usize) -> Self {
        assert!(page_size > 0, "page_size must be > 0");

        Self {
            page_size,
            pool_capacity,
            track_leaks: false,
            profile_memory: false,
            profile_interval: DEFAULT_PROFILE_INTERVAL,
        }
    }

    /// Enable or disable the leak-tracking registry.
    pub fn with_leak_tracking(mut self, enabled: bool) -> Self {
        self.track_leaks = enabled;
        self
    }

    /// Enable or disable per-intention memory profiling.
    pub fn with_memory_profiling(mut self, enabled: bool) -> Self {
        self.profile_memory = enabled;
        self
    }

    /// Set the interval between periodic profile reports.
    pub fn with_profile_interval(mut self, interval: Duration) -> Self {
        self.profile_interval = interval;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_POOL_CAPACITY)
    }
}
