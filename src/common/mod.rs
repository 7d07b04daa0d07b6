//! Common types and utilities shared across pagepool.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration (`CacheConfig`, page-size defaults)
//! - Error types
//! - File identifiers (`ExternalFileId`)

pub mod config;
pub mod error;
mod file_id;

pub use config::CacheConfig;
pub use error::{Error, Result};
pub use file_id::ExternalFileId;
