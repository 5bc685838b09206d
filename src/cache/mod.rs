//! Versioned response caches for offline support.
//!
//! This module provides the storage side of the shell:
//! - Named cache generations holding request key + response snapshot entries
//! - Atomic per-entry writes and an all-or-nothing batch write for installs
//! - Cache-first lookups that fall through to a caller-supplied fetcher

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheInfo, CacheStorage, CachedResponse, SqliteStorage};
pub use traits::{CacheResult, CacheSource, RequestKey};
