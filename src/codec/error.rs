//! Codec error types.

use thiserror::Error;

/// Recoverable codec failures: malformed descriptors and malformed buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty format descriptor")]
    EmptyFormat,

    #[error("Unknown field tag '{tag}' in format \"{format}\"")]
    UnknownTag { tag: char, format: String },

    #[error("Buffer truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Record data of {len} bytes is not a multiple of the record size {record_size}")]
    RaggedRecords { len: usize, record_size: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
