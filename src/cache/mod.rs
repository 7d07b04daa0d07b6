//! The in-memory page cache.
//!
//! # Components
//! - [`DirectPageCache`] - the top-level facade: file directory + routing
//! - [`MemoryFile`] - per-file page table with monotonic index allocation
//! - [`CacheEntry`] - per-page record: lock, usage count, backing handle
//! - [`SharedPageHandle`] - refcounted wrapper around one physical page
//! - [`PageReadGuard`] / [`PageWriteGuard`] - RAII layer over load/release

mod entry;
mod guard;
mod memory_file;
mod page_cache;
mod page_handle;

pub use entry::CacheEntry;
pub use guard::{PageReadGuard, PageWriteGuard};
pub use memory_file::MemoryFile;
pub use page_cache::DirectPageCache;
pub use page_handle::SharedPageHandle;
