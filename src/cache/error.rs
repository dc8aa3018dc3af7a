//! Object cache error types.
//!
//! Only recoverable conditions appear here. Broken caller contracts (stale
//! handles, double unlocks, key mismatches, ...) panic instead.

use crate::codec::CodecError;
use crate::lexicon::Key;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cannot load object {name} ({key}): {reason}")]
    LoadFailed {
        key: Key,
        name: String,
        reason: String,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Block store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result type for object cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
