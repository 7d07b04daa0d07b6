//! RAII guards for page access.
//!
//! Thin convenience layer over the explicit load/release pairs of
//! [`DirectPageCache`]:
//! - [`PageReadGuard`] - shared access, released on drop
//! - [`PageWriteGuard`] - exclusive access, released on drop; remembers
//!   whether the page was changed
//!
//! The explicit API remains primary — callers that need to carry a loaded
//! page across non-lexical boundaries keep using
//! `load_for_*`/`release_from_*` directly.

use std::sync::Arc;

use crate::cache::{CacheEntry, DirectPageCache};
use crate::common::Result;

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
///
/// # Example
/// ```ignore
/// let guard = cache.read_page(file, 0)?;
/// let mut out = [0u8; 8];
/// guard.read_at(0, &mut out)?;
/// // guard drops here: shared lock released, usage decremented
/// ```
pub struct PageReadGuard<'a> {
    cache: &'a DirectPageCache,
    entry: Arc<CacheEntry>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(cache: &'a DirectPageCache, entry: Arc<CacheEntry>) -> Self {
        Self { cache, entry }
    }

    /// Copy page bytes at `offset` into `out`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.entry.read_at(offset, out)
    }

    /// Index of the guarded page.
    pub fn page_index(&self) -> u64 {
        self.entry.page_index()
    }

    /// The underlying cache entry.
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        // The guard was built from a successful load, so the release can
        // only fail if the caller tampered with the usage count directly.
        let _ = self.cache.release_from_read(&self.entry);
    }
}

/// Guard for exclusive write access to a page.
///
/// Only one `PageWriteGuard` can exist for a page at a time. The page is
/// marked changed on the first write through the guard (or explicitly via
/// [`mark_changed`]), and released accordingly on drop.
///
/// [`mark_changed`]: PageWriteGuard::mark_changed
pub struct PageWriteGuard<'a> {
    cache: &'a DirectPageCache,
    entry: Arc<CacheEntry>,
    changed: bool,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(cache: &'a DirectPageCache, entry: Arc<CacheEntry>) -> Self {
        Self {
            cache,
            entry,
            changed: false,
        }
    }

    /// Copy `data` into the page at `offset` and mark the page changed.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.entry.write_at(offset, data)?;
        self.changed = true;
        Ok(())
    }

    /// Copy page bytes at `offset` into `out`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.entry.read_at(offset, out)
    }

    /// Zero-fill the page and mark it changed.
    pub fn clear(&mut self) -> Result<()> {
        self.entry.page().clear()?;
        self.changed = true;
        Ok(())
    }

    /// Mark the page changed without writing through the guard.
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Index of the guarded page.
    pub fn page_index(&self) -> u64 {
        self.entry.page_index()
    }

    /// The underlying cache entry.
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        let _ = self.cache.release_from_write(&self.entry, self.changed);
    }
}
