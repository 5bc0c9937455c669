//! Cache-related errors.

use thiserror::Error;

/// Errors that can occur when working with cache backends.
///
/// These never reach the user: the cache layer logs them and degrades to
/// the in-process fallback or to direct compute.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend operation failed (connection, serialization, ...).
    #[error("cache backend error: {0}")]
    Backend(String),

    /// Stored entry could not be decoded.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}
