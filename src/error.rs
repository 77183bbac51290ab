//! Error types surfaced at the cache's public boundary.
//!
//! Every fallible operation returns [`CacheResult<T>`]; nothing internal
//! panics its way across a module boundary on a data path.

use thiserror::Error;

/// Errors the cache engine can report to a caller.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The requested key is absent, or was present but already expired.
    #[error("key not present in cache")]
    Missing,

    /// A numeric operation (`incr`/`decr`) was attempted against a
    /// non-numeric stored value.
    #[error("value is not numeric")]
    NonNumeric,

    /// A multi-key operation spanned keys owned by different nodes.
    ///
    /// Unreachable in this single-process engine; retained so the error
    /// surface matches distributed deployments built on top of it.
    #[error("keys span multiple cache nodes")]
    CrossSlot,

    /// Persistence I/O (export or import) could not reach its file.
    #[error("persistence file unreachable: {0}")]
    UnreachableFile(String),

    /// A hook failed validation at registration time.
    #[error("invalid hook: {0}")]
    InvalidHook(String),

    /// A configuration value failed validation at cache start.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The Courier's executor died while waiters were still enqueued.
    #[error("loader execution was killed")]
    Killed,

    /// Catch-all wrapper for errors raised from user-supplied closures
    /// (loaders, transaction bodies, `update_fields` callbacks).
    #[error("{0}")]
    Other(String),
}

impl CacheError {
    /// Build an [`CacheError::Other`] from any displayable value.
    pub fn other(reason: impl std::fmt::Display) -> Self {
        CacheError::Other(reason.to_string())
    }
}

/// Result type used throughout the cache engine.
pub type CacheResult<T> = Result<T, CacheError>;
