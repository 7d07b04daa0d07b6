//! Externally visible file identifier.

use std::fmt;

/// Globally-unique identifier of a cached file.
///
/// Several cache instances may share a process (one per open storage), so a
/// plain per-cache file counter would collide. An `ExternalFileId` packs the
/// owning cache's storage id into the high 32 bits and the per-cache file id
/// into the low 32 bits, and can always be decomposed back into both parts.
///
/// # Example
/// ```
/// use pagepool::ExternalFileId;
///
/// let id = ExternalFileId::compose(7, 42);
/// assert_eq!(id.storage_id(), 7);
/// assert_eq!(id.internal_id(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalFileId(pub u64);

impl ExternalFileId {
    /// Compose an external id from a storage id and a per-cache file id.
    #[inline]
    pub fn compose(storage_id: u32, internal_id: u32) -> Self {
        ExternalFileId(((storage_id as u64) << 32) | internal_id as u64)
    }

    /// The id of the cache instance that issued this file id.
    #[inline]
    pub fn storage_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The per-cache file id.
    #[inline]
    pub fn internal_id(&self) -> u32 {
        self.0 as u32
    }

    /// Decompose back into `(storage_id, internal_id)`.
    #[inline]
    pub fn decompose(&self) -> (u32, u32) {
        (self.storage_id(), self.internal_id())
    }
}

impl fmt::Display for ExternalFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({}:{})", self.storage_id(), self.internal_id())
    }
}
