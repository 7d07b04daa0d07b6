//! Error types for pagepool.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in pagepool.
///
/// By having a single error type, error handling stays consistent across the
/// allocator, the pool and the cache facade.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation was called with an argument that can never be valid,
    /// e.g. a zero-byte allocation or a handle of the wrong size.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The native allocator could not satisfy the request.
    ///
    /// Never retried internally; the caller decides whether to free memory
    /// and retry or to abort.
    #[error("cannot allocate off-heap memory chunk of size {size}")]
    AllocationFailed { size: u32 },

    /// A file with this name is already registered in the cache.
    #[error("file `{name}` already exists")]
    FileAlreadyExists { name: String },

    /// A file with this internal id is already registered in the cache.
    #[error("file with id {id} already exists")]
    FileIdAlreadyExists { id: u32 },

    /// Lookup by name failed.
    #[error("file `{name}` does not exist")]
    UnknownFile { name: String },

    /// Lookup by id failed.
    #[error("file with id {id} does not exist")]
    UnknownFileId { id: u32 },

    /// The requested page was never allocated in its file.
    #[error("page {page_index} not found in file {file_id}")]
    PageNotFound { file_id: u32, page_index: u64 },

    /// A destructive operation (clear/truncate/delete) found entries that
    /// were still checked out. Cleanup completed anyway; the condition is
    /// reported because it indicates a caller that failed to release pages.
    #[error("{pages} page(s) of file {file_id} were still in use during destructive operation")]
    PagesStillInUse { file_id: u32, pages: usize },

    /// A page release without a matching load.
    #[error("usage count underflow on page {page_index} of file {file_id}")]
    UsageCountUnderflow { file_id: u32, page_index: u64 },

    /// A shared page handle was decremented more often than incremented.
    #[error("reference count underflow on page {page_index} of file {file_id}")]
    ReferenceUnderflow { file_id: u32, page_index: u64 },
}
