//! The memory-only page cache facade.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache::{CacheEntry, MemoryFile, PageReadGuard, PageWriteGuard};
use crate::common::{CacheConfig, Error, ExternalFileId, Result};
use crate::memory::{DirectMemoryAllocator, MemoryProfiler, PagePool};

/// The top-level entry point of the in-memory page cache.
///
/// # Architecture
/// ```text
/// ┌────────────────────────────────────────────────────────────┐
/// │                      DirectPageCache                       │
/// │  ┌───────────────┐   ┌──────────────────────────────────┐  │
/// │  │  directory    │   │  files: DashMap<u32, MemoryFile> │  │
/// │  │ name ↔ id map │──▶│   index → CacheEntry per file    │  │
/// │  └───────────────┘   └──────────────────────────────────┘  │
/// │  ┌───────────────┐   ┌──────────────────────────────────┐  │
/// │  │   PagePool    │──▶│      DirectMemoryAllocator       │  │
/// │  │ page recycler │   │   off-heap blocks, leak registry │  │
/// │  └───────────────┘   └──────────────────────────────────┘  │
/// └────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `directory`: one coarse `Mutex` — create/delete/rename/enumerate are
///   rare relative to page traffic
/// - `files`: `DashMap` — page lookups never block on directory operations
/// - per-page serialization happens only on each entry's own lock
///
/// Any call may block the calling thread; `load_for_*` block while the
/// target page's lock is held incompatibly, with no timeout and no
/// cancellation. This layer never takes more than one page lock internally,
/// so deadlock avoidance across pages is the caller's responsibility.
///
/// # Usage
/// ```
/// use pagepool::{CacheConfig, DirectPageCache};
///
/// let cache = DirectPageCache::new(CacheConfig::new(4096, 8), 1);
///
/// let file = cache.add_file("data").unwrap();
/// let entry = cache.allocate_new_page(file).unwrap();
/// entry.write_at(0, b"hello").unwrap();
/// cache.release_from_write(&entry, true).unwrap();
///
/// let entry = cache.load_for_read(file, 0).unwrap();
/// let mut out = [0u8; 5];
/// entry.read_at(0, &mut out).unwrap();
/// cache.release_from_read(&entry).unwrap();
/// assert_eq!(&out, b"hello");
/// ```
pub struct DirectPageCache {
    /// Name ↔ id maps and the id counter, behind one coarse lock.
    directory: Mutex<FileDirectory>,

    /// Internal id → per-file page table.
    files: DashMap<u32, Arc<MemoryFile>>,

    /// Recycler for page buffers, shared with every file.
    pool: Arc<PagePool>,

    /// Keeps the periodic profile reporter alive, when profiling is on.
    _profiler: Option<MemoryProfiler>,

    /// Id of this cache instance, baked into every external file id.
    storage_id: u32,
}

/// Directory state guarded by the metadata lock.
struct FileDirectory {
    name_to_id: HashMap<String, u32>,
    id_to_name: HashMap<u32, String>,

    /// Last issued internal file id.
    counter: u32,
}

impl DirectPageCache {
    /// Create a cache instance.
    ///
    /// `storage_id` distinguishes this instance from others sharing the
    /// process; it becomes the high half of every [`ExternalFileId`] the
    /// cache issues.
    pub fn new(config: CacheConfig, storage_id: u32) -> Self {
        let allocator = Arc::new(DirectMemoryAllocator::new(
            config.track_leaks,
            config.profile_memory,
        ));

        let profiler = allocator
            .profile()
            .map(|profile| MemoryProfiler::start(Arc::clone(profile), config.profile_interval));

        let pool = Arc::new(PagePool::new(
            allocator,
            config.page_size,
            config.pool_capacity,
        ));

        Self {
            directory: Mutex::new(FileDirectory {
                name_to_id: HashMap::new(),
                id_to_name: HashMap::new(),
                counter: 0,
            }),
            files: DashMap::new(),
            pool,
            _profiler: profiler,
            storage_id,
        }
    }

    // ========================================================================
    // Public API: Directory operations
    // ========================================================================

    /// Register a new file under the next free internal id.
    ///
    /// # Errors
    /// `FileAlreadyExists` if the name is already registered.
    pub fn add_file(&self, name: &str) -> Result<ExternalFileId> {
        let mut directory = self.directory.lock();

        if directory.name_to_id.contains_key(name) {
            return Err(Error::FileAlreadyExists {
                name: name.to_string(),
            });
        }

        directory.counter += 1;
        let id = directory.counter;

        self.register_file(&mut directory, name, id);

        Ok(ExternalFileId::compose(self.storage_id, id))
    }

    /// Register a new file under a caller-chosen id (e.g. one previously
    /// reserved with [`book_file_id`]).
    ///
    /// # Errors
    /// `FileIdAlreadyExists` / `FileAlreadyExists` on id or name collision.
    ///
    /// [`book_file_id`]: DirectPageCache::book_file_id
    pub fn add_file_with_id(&self, name: &str, file_id: ExternalFileId) -> Result<ExternalFileId> {
        let id = file_id.internal_id();
        let mut directory = self.directory.lock();

        if self.files.contains_key(&id) {
            return Err(Error::FileIdAlreadyExists { id });
        }
        if directory.name_to_id.contains_key(name) {
            return Err(Error::FileAlreadyExists {
                name: name.to_string(),
            });
        }

        // Keep the counter ahead of explicitly requested ids so add_file
        // never hands the same id out again.
        directory.counter = directory.counter.max(id);
        self.register_file(&mut directory, name, id);

        Ok(ExternalFileId::compose(self.storage_id, id))
    }

    /// Reserve the next internal id without registering a file.
    pub fn book_file_id(&self) -> ExternalFileId {
        let mut directory = self.directory.lock();
        directory.counter += 1;
        ExternalFileId::compose(self.storage_id, directory.counter)
    }

    /// Look up a registered file by name.
    pub fn file_id_by_name(&self, name: &str) -> Option<ExternalFileId> {
        let directory = self.directory.lock();
        directory
            .name_to_id
            .get(name)
            .map(|&id| ExternalFileId::compose(self.storage_id, id))
    }

    /// Look up a registered file by name, failing when it does not exist.
    pub fn load_file(&self, name: &str) -> Result<ExternalFileId> {
        self.file_id_by_name(name).ok_or_else(|| Error::UnknownFile {
            name: name.to_string(),
        })
    }

    /// Name of a registered file.
    pub fn file_name_by_id(&self, file_id: ExternalFileId) -> Option<String> {
        let directory = self.directory.lock();
        directory.id_to_name.get(&file_id.internal_id()).cloned()
    }

    /// Whether a file with this name is registered.
    pub fn exists(&self, name: &str) -> bool {
        let directory = self.directory.lock();
        match directory.name_to_id.get(name) {
            Some(id) => self.files.contains_key(id),
            None => false,
        }
    }

    /// Whether a file with this id is registered.
    pub fn exists_file_id(&self, file_id: ExternalFileId) -> bool {
        self.files.contains_key(&file_id.internal_id())
    }

    /// Snapshot of all registered files, name → external id.
    pub fn files(&self) -> HashMap<String, ExternalFileId> {
        let directory = self.directory.lock();
        directory
            .name_to_id
            .iter()
            .map(|(name, &id)| (name.clone(), ExternalFileId::compose(self.storage_id, id)))
            .collect()
    }

    /// Whether two external ids refer to the same file of this cache.
    pub fn file_ids_equal(&self, first: ExternalFileId, second: ExternalFileId) -> bool {
        first.internal_id() == second.internal_id()
    }

    /// Remove a file from the directory and recycle all of its pages.
    ///
    /// # Errors
    /// - `UnknownFileId` if the file is not registered
    /// - `PagesStillInUse` if entries were still checked out; the file is
    ///   removed and cleaned up regardless
    pub fn delete_file(&self, file_id: ExternalFileId) -> Result<()> {
        let id = file_id.internal_id();

        let file = {
            let mut directory = self.directory.lock();

            let name = directory
                .id_to_name
                .remove(&id)
                .ok_or(Error::UnknownFileId { id })?;
            directory.name_to_id.remove(&name);

            self.files.remove(&id).map(|(_, file)| file)
        };

        match file {
            Some(file) => file.clear(),
            None => Ok(()),
        }
    }

    /// Drop every page of a file, keeping the file registered.
    pub fn truncate_file(&self, file_id: ExternalFileId) -> Result<()> {
        self.get_file(file_id)?.clear()
    }

    /// Rename a registered file.
    ///
    /// # Errors
    /// - `UnknownFileId` if the file is not registered
    /// - `FileAlreadyExists` if the new name is taken
    pub fn rename_file(&self, file_id: ExternalFileId, new_name: &str) -> Result<()> {
        let id = file_id.internal_id();
        let mut directory = self.directory.lock();

        if directory.name_to_id.contains_key(new_name) {
            return Err(Error::FileAlreadyExists {
                name: new_name.to_string(),
            });
        }

        let old_name = directory
            .id_to_name
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownFileId { id })?;

        directory.name_to_id.remove(&old_name);
        directory.name_to_id.insert(new_name.to_string(), id);
        directory.id_to_name.insert(id, new_name.to_string());

        Ok(())
    }

    // ========================================================================
    // Public API: Page operations
    // ========================================================================

    /// Load a page for reading. Acquires the page's shared lock and
    /// increments its usage count; pair with [`release_from_read`].
    ///
    /// # Errors
    /// - `UnknownFileId` if the file is not registered
    /// - `PageNotFound` if the page was never allocated
    ///
    /// [`release_from_read`]: DirectPageCache::release_from_read
    pub fn load_for_read(
        &self,
        file_id: ExternalFileId,
        page_index: u64,
    ) -> Result<Arc<CacheEntry>> {
        let entry = self.do_load(file_id, page_index)?;
        entry.acquire_shared_lock();
        Ok(entry)
    }

    /// Load a page for writing. Acquires the page's exclusive lock and
    /// increments its usage count; pair with [`release_from_write`].
    ///
    /// # Errors
    /// - `UnknownFileId` if the file is not registered
    /// - `PageNotFound` if the page was never allocated
    ///
    /// [`release_from_write`]: DirectPageCache::release_from_write
    pub fn load_for_write(
        &self,
        file_id: ExternalFileId,
        page_index: u64,
    ) -> Result<Arc<CacheEntry>> {
        let entry = self.do_load(file_id, page_index)?;
        entry.acquire_exclusive_lock();
        Ok(entry)
    }

    /// Allocate the next page of a file. The returned entry holds the
    /// exclusive lock and one usage; pair with [`release_from_write`].
    ///
    /// [`release_from_write`]: DirectPageCache::release_from_write
    pub fn allocate_new_page(&self, file_id: ExternalFileId) -> Result<Arc<CacheEntry>> {
        let file = self.get_file(file_id)?;

        let entry = file.add_new_page()?;
        entry.increment_usages();
        entry.acquire_exclusive_lock();

        Ok(entry)
    }

    /// Release a page loaded with [`load_for_read`].
    ///
    /// # Errors
    /// `UsageCountUnderflow` when the entry was not loaded; never silently
    /// absorbed.
    ///
    /// [`load_for_read`]: DirectPageCache::load_for_read
    pub fn release_from_read(&self, entry: &CacheEntry) -> Result<()> {
        entry.release_shared_lock();
        entry.decrement_usages()?;
        Ok(())
    }

    /// Release a page loaded with [`load_for_write`] or created with
    /// [`allocate_new_page`]. `changed` marks the page dirty for eventual
    /// flush/WAL integration; it is advisory in this memory-only cache.
    ///
    /// [`load_for_write`]: DirectPageCache::load_for_write
    /// [`allocate_new_page`]: DirectPageCache::allocate_new_page
    pub fn release_from_write(&self, entry: &CacheEntry, changed: bool) -> Result<()> {
        if changed {
            entry.mark_dirty();
        }
        entry.release_exclusive_lock();
        entry.decrement_usages()?;
        Ok(())
    }

    // ========================================================================
    // Public API: RAII guards
    // ========================================================================

    /// Load a page for reading behind an RAII guard that releases on drop.
    pub fn read_page(&self, file_id: ExternalFileId, page_index: u64) -> Result<PageReadGuard<'_>> {
        let entry = self.load_for_read(file_id, page_index)?;
        Ok(PageReadGuard::new(self, entry))
    }

    /// Load a page for writing behind an RAII guard that releases on drop.
    pub fn write_page(
        &self,
        file_id: ExternalFileId,
        page_index: u64,
    ) -> Result<PageWriteGuard<'_>> {
        let entry = self.load_for_write(file_id, page_index)?;
        Ok(PageWriteGuard::new(self, entry))
    }

    /// Allocate a new page behind an RAII guard that releases on drop.
    pub fn new_page(&self, file_id: ExternalFileId) -> Result<PageWriteGuard<'_>> {
        let entry = self.allocate_new_page(file_id)?;
        Ok(PageWriteGuard::new(self, entry))
    }

    // ========================================================================
    // Public API: Sizes and stats
    // ========================================================================

    /// Index of a file's highest page + 1, or 0 for an empty file.
    pub fn filled_up_to(&self, file_id: ExternalFileId) -> Result<u64> {
        Ok(self.get_file(file_id)?.size())
    }

    /// Total resident pages across all files × page size, in bytes.
    pub fn used_memory(&self) -> u64 {
        let total_pages: u64 = self.files.iter().map(|file| file.used_pages()).sum();
        total_pages * self.pool.page_size() as u64
    }

    /// Size of every cached page, in bytes.
    pub fn page_size(&self) -> u32 {
        self.pool.page_size()
    }

    /// Id of this cache instance.
    pub fn storage_id(&self) -> u32 {
        self.storage_id
    }

    /// The page pool backing this cache.
    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    /// The allocator backing this cache.
    pub fn allocator(&self) -> &Arc<DirectMemoryAllocator> {
        self.pool.allocator()
    }

    // ========================================================================
    // Public API: Persistence no-ops
    // ========================================================================

    /// No-op: there is no persistence boundary to cross.
    pub fn flush(&self) {}

    /// No-op: there is no persistence boundary to cross.
    pub fn flush_file(&self, _file_id: ExternalFileId) {}

    /// No-op: pages live until deleted, truncated or cleared.
    pub fn close(&self) {}

    // ========================================================================
    // Public API: Teardown
    // ========================================================================

    /// Clear every file and empty the directory.
    ///
    /// # Errors
    /// `PagesStillInUse` aggregated across files when entries were still
    /// checked out; otherwise the first cleanup error any file reported.
    /// Cleanup completes regardless.
    pub fn clear(&self) -> Result<()> {
        let mut directory = self.directory.lock();

        let mut still_in_use = 0;
        let mut guilty_file = 0;
        let mut first_error: Option<Error> = None;

        for file in self.files.iter() {
            match file.clear() {
                Ok(()) => {}
                Err(Error::PagesStillInUse { file_id, pages }) => {
                    still_in_use += pages;
                    guilty_file = file_id;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        self.files.clear();
        directory.name_to_id.clear();
        directory.id_to_name.clear();

        if still_in_use > 0 {
            return Err(Error::PagesStillInUse {
                file_id: guilty_file,
                pages: still_in_use,
            });
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn register_file(&self, directory: &mut FileDirectory, name: &str, id: u32) {
        self.files.insert(
            id,
            Arc::new(MemoryFile::new(self.storage_id, id, Arc::clone(&self.pool))),
        );
        directory.name_to_id.insert(name.to_string(), id);
        directory.id_to_name.insert(id, name.to_string());
    }

    fn get_file(&self, file_id: ExternalFileId) -> Result<Arc<MemoryFile>> {
        let id = file_id.internal_id();
        self.files
            .get(&id)
            .map(|file| Arc::clone(file.value()))
            .ok_or(Error::UnknownFileId { id })
    }

    fn do_load(&self, file_id: ExternalFileId, page_index: u64) -> Result<Arc<CacheEntry>> {
        let file = self.get_file(file_id)?;

        let entry = file.load_page(page_index).ok_or(Error::PageNotFound {
            file_id: file_id.internal_id(),
            page_index,
        })?;

        entry.increment_usages();
        Ok(entry)
    }
}

impl Drop for DirectPageCache {
    fn drop(&mut self) {
        // Hand every live page back to the pool so the leak registry stays
        // clean; the pool deallocates its free list on its own drop.
        let _ = self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_cache(page_size: u32, pool_capacity: usize) -> DirectPageCache {
        DirectPageCache::new(CacheConfig::new(page_size, pool_capacity), 1)
    }

    #[test]
    fn test_add_file_assigns_external_ids() {
        let cache = create_cache(512, 8);

        let a = cache.add_file("a").unwrap();
        let b = cache.add_file("b").unwrap();

        assert_eq!(a.storage_id(), 1);
        assert_eq!(b.storage_id(), 1);
        assert_ne!(a.internal_id(), b.internal_id());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let cache = create_cache(512, 8);

        cache.add_file("data").unwrap();
        assert!(matches!(
            cache.add_file("data"),
            Err(Error::FileAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_add_file_with_requested_id() {
        let cache = create_cache(512, 8);

        let booked = cache.book_file_id();
        let id = cache.add_file_with_id("data", booked).unwrap();
        assert_eq!(id, booked);

        assert!(matches!(
            cache.add_file_with_id("other", booked),
            Err(Error::FileIdAlreadyExists { .. })
        ));

        // The counter moved past the requested id.
        let next = cache.add_file("next").unwrap();
        assert!(next.internal_id() > booked.internal_id());
    }

    #[test]
    fn test_lookup_by_name() {
        let cache = create_cache(512, 8);

        let id = cache.add_file("data").unwrap();
        assert_eq!(cache.file_id_by_name("data"), Some(id));
        assert_eq!(cache.load_file("data").unwrap(), id);
        assert_eq!(cache.file_name_by_id(id).unwrap(), "data");

        assert_eq!(cache.file_id_by_name("missing"), None);
        assert!(matches!(
            cache.load_file("missing"),
            Err(Error::UnknownFile { .. })
        ));
    }

    #[test]
    fn test_unknown_file_id_surfaced() {
        let cache = create_cache(512, 8);
        let bogus = ExternalFileId::compose(1, 99);

        assert!(matches!(
            cache.load_for_read(bogus, 0),
            Err(Error::UnknownFileId { id: 99 })
        ));
        assert!(matches!(
            cache.allocate_new_page(bogus),
            Err(Error::UnknownFileId { id: 99 })
        ));
        assert!(matches!(
            cache.filled_up_to(bogus),
            Err(Error::UnknownFileId { id: 99 })
        ));
    }

    #[test]
    fn test_page_not_found() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        assert!(matches!(
            cache.load_for_read(file, 0),
            Err(Error::PageNotFound { page_index: 0, .. })
        ));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        let entry = cache.allocate_new_page(file).unwrap();
        assert_eq!(entry.page_index(), 0);
        assert!(entry.is_newly_allocated());
        entry.write_at(7, &[0xAB; 16]).unwrap();
        cache.release_from_write(&entry, true).unwrap();

        let entry = cache.load_for_read(file, 0).unwrap();
        let mut out = [0u8; 16];
        entry.read_at(7, &mut out).unwrap();
        assert_eq!(out, [0xAB; 16]);
        cache.release_from_read(&entry).unwrap();
    }

    #[test]
    fn test_rename_file() {
        let cache = create_cache(512, 8);

        let file = cache.add_file("old").unwrap();
        cache.add_file("taken").unwrap();

        assert!(matches!(
            cache.rename_file(file, "taken"),
            Err(Error::FileAlreadyExists { .. })
        ));

        cache.rename_file(file, "new").unwrap();
        assert!(!cache.exists("old"));
        assert_eq!(cache.file_id_by_name("new"), Some(file));
        assert_eq!(cache.file_name_by_id(file).unwrap(), "new");
    }

    #[test]
    fn test_delete_file() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        let entry = cache.allocate_new_page(file).unwrap();
        cache.release_from_write(&entry, false).unwrap();
        drop(entry);

        cache.delete_file(file).unwrap();
        assert!(!cache.exists("data"));
        assert!(!cache.exists_file_id(file));
        assert!(matches!(
            cache.delete_file(file),
            Err(Error::UnknownFileId { .. })
        ));
    }

    #[test]
    fn test_truncate_resets_file() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        for _ in 0..3 {
            let entry = cache.allocate_new_page(file).unwrap();
            cache.release_from_write(&entry, false).unwrap();
        }
        assert_eq!(cache.filled_up_to(file).unwrap(), 3);

        cache.truncate_file(file).unwrap();
        assert_eq!(cache.filled_up_to(file).unwrap(), 0);
        assert!(cache.exists("data"));
    }

    #[test]
    fn test_destructive_op_with_checked_out_page() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        let entry = cache.allocate_new_page(file).unwrap();

        // Entry is still loaded: the truncate completes but reports the
        // defect.
        assert!(matches!(
            cache.truncate_file(file),
            Err(Error::PagesStillInUse { pages: 1, .. })
        ));
        assert_eq!(cache.filled_up_to(file).unwrap(), 0);

        // The entry's lock and usage bookkeeping are now orphaned; drop the
        // entry without going back through the cache.
        drop(entry);
    }

    #[test]
    fn test_files_snapshot() {
        let cache = create_cache(512, 8);

        let a = cache.add_file("a").unwrap();
        let b = cache.add_file("b").unwrap();

        let files = cache.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files["a"], a);
        assert_eq!(files["b"], b);
    }

    #[test]
    fn test_used_memory_counts_resident_pages() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        assert_eq!(cache.used_memory(), 0);

        for _ in 0..4 {
            let entry = cache.allocate_new_page(file).unwrap();
            cache.release_from_write(&entry, false).unwrap();
        }

        assert_eq!(cache.used_memory(), 4 * 512);

        cache.truncate_file(file).unwrap();
        assert_eq!(cache.used_memory(), 0);
    }

    #[test]
    fn test_file_ids_equal_ignores_storage_part() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        let foreign = ExternalFileId::compose(9, file.internal_id());
        assert!(cache.file_ids_equal(file, foreign));
    }

    #[test]
    fn test_clear_surfaces_file_cleanup_errors() {
        let cache = create_cache(512, 8);
        let file = cache.add_file("data").unwrap();

        let entry = cache.allocate_new_page(file).unwrap();
        cache.release_from_write(&entry, false).unwrap();

        // Steal the table's creation reference so the clear underflows.
        entry.page().decrement_refs().unwrap();
        drop(entry);

        assert!(matches!(
            cache.clear(),
            Err(Error::ReferenceUnderflow { .. })
        ));
        assert!(cache.files().is_empty());
    }

    #[test]
    fn test_clear_empties_directory() {
        let cache = create_cache(512, 8);

        let file = cache.add_file("data").unwrap();
        let entry = cache.allocate_new_page(file).unwrap();
        cache.release_from_write(&entry, false).unwrap();
        drop(entry);

        cache.clear().unwrap();
        assert!(cache.files().is_empty());
        assert_eq!(cache.used_memory(), 0);
    }
}
