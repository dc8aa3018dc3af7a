//! Disk codec for formatted record arrays.
//!
//! A formatted array is a homogeneous array of fixed-size records described by
//! a short tag string such as `"kkccc"`:
//!
//! - **c**: single byte
//! - **k**: key reference
//! - **a**: tree data unit (32 bits)
//! - **i**: 32-bit integer
//! - **f**: 32-bit float
//! - **d**: disk address
//! - **t**: timestamp
//! - **v**: pointer, sized for layout purposes but never serializable
//!
//! Records keep their native in-memory layout. Crossing a byte-order boundary
//! is handled by [`byte_swap`], applied on both the write and the read side.

pub mod array;
pub mod composite;
pub mod dump;
pub mod error;
pub mod format;

pub use array::{byte_swap, FieldValue, FormattedArray};
pub use composite::{decode_with_text, encode_with_text, HEADER_SIZE};
pub use dump::dump;
pub use error::{CodecError, CodecResult};
pub use format::{FieldKind, Format};
