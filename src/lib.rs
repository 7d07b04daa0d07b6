//! pagepool - An in-memory page cache built on an off-heap buffer pool.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           pagepool                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              DirectPageCache (cache/)                   │   │
//! │  │   file directory + load/allocate/release routing        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              MemoryFile (cache/)                        │   │
//! │  │   per-file page table, monotonic index allocation       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │       CacheEntry + SharedPageHandle (cache/)            │   │
//! │  │   page lock, usage count, refcounted physical buffer    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              PagePool (memory/)                         │   │
//! │  │   capacity-bounded recycler of page-sized blocks        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │        DirectMemoryAllocator (memory/)                  │   │
//! │  │   off-heap allocation, leak registry, profiling         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (Error, config, ExternalFileId)
//! - [`memory`] - Off-heap allocation, leak tracking, page pooling
//! - [`cache`] - Cache entries, per-file page tables, the cache facade
//!
//! # Quick Start
//! ```
//! use pagepool::{CacheConfig, DirectPageCache};
//!
//! let cache = DirectPageCache::new(CacheConfig::new(4096, 8), 1);
//! let file = cache.add_file("data").unwrap();
//!
//! let entry = cache.allocate_new_page(file).unwrap();
//! entry.write_at(0, &[0xAB; 4]).unwrap();
//! cache.release_from_write(&entry, true).unwrap();
//! ```

pub mod cache;
pub mod common;
pub mod memory;

// Re-export commonly used items at crate root for convenience
pub use common::config::{CacheConfig, DEFAULT_PAGE_SIZE, DEFAULT_POOL_CAPACITY};
pub use common::{Error, ExternalFileId, Result};

pub use cache::{
    CacheEntry, DirectPageCache, MemoryFile, PageReadGuard, PageWriteGuard, SharedPageHandle,
};
pub use memory::{DirectMemoryAllocator, Intention, MemoryHandle, PagePool};
