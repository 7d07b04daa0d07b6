//! Off-heap memory management.
//!
//! The raw layer everything above is built on:
//! - [`DirectMemoryAllocator`] - allocates/frees blocks, tracks leaks
//! - [`MemoryHandle`] - owned handle to one allocation
//! - [`PagePool`] - recycler for page-sized blocks
//! - [`Intention`] - diagnostic tag on every allocation
//! - [`MemoryProfile`] / [`MemoryProfiler`] - per-intention profiling

mod allocator;
mod handle;
mod intention;
mod pool;
mod profile;

pub use allocator::DirectMemoryAllocator;
pub use handle::MemoryHandle;
pub use intention::Intention;
pub use pool::PagePool;
pub use profile::{MemoryProfile, MemoryProfiler, ProfileSnapshot};
