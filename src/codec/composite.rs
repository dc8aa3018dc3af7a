//! The "array + trailing text" disk encoding.
//!
//! ```text
//! +-------------+-------------+-------------+-----------------+------------+
//! | count (u32) | size (u32)  | text (u32)  | count * size    | text bytes |
//! +-------------+-------------+-------------+-----------------+------------+
//! ```
//!
//! The three header words and every word field of the records are byte
//! swapped together when the disk byte order differs from the host's.

use crate::codec::array::{byte_swap, check_record_size, FormattedArray};
use crate::codec::error::{CodecError, CodecResult};
use crate::codec::format::Format;
use byteorder::{ByteOrder, NativeEndian};
use bytes::{BufMut, BytesMut};

pub const HEADER_SIZE: usize = 3 * 4;

/// # Panics
/// If the format holds a pointer field.
pub fn encode_with_text(array: &FormattedArray, swap: bool) -> Vec<u8> {
    check_portable(array.format());
    let count = array.len() as u32;
    let size = array.record_size() as u32;
    let text = array.text();

    let word = |v: u32| if swap { v.swap_bytes() } else { v };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + array.as_bytes().len() + text.len());
    buf.put_u32_ne(word(count));
    buf.put_u32_ne(word(size));
    buf.put_u32_ne(word(text.len() as u32));

    let records_at = buf.len();
    buf.put_slice(array.as_bytes());
    if swap && !array.is_empty() {
        byte_swap(&mut buf[records_at..], array.format(), array.record_size());
    }

    buf.put_slice(text);
    buf.to_vec()
}

/// # Panics
/// If the format holds a pointer field, or the stored record size disagrees
/// with `format`.
pub fn decode_with_text(buf: &[u8], format: &Format, swap: bool) -> CodecResult<FormattedArray> {
    check_portable(format);
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            expected: HEADER_SIZE,
            actual: buf.len(),
        });
    }

    let word = |at: usize| {
        let v = NativeEndian::read_u32(&buf[at..at + 4]);
        (if swap { v.swap_bytes() } else { v }) as usize
    };
    let count = word(0);
    let size = word(4);
    let text_len = word(8);

    check_record_size(format, size);

    let records_len = count * size;
    let expected = HEADER_SIZE + records_len + text_len;
    if buf.len() != expected {
        return Err(CodecError::Truncated {
            expected,
            actual: buf.len(),
        });
    }

    let mut data = buf[HEADER_SIZE..HEADER_SIZE + records_len].to_vec();
    if swap && !data.is_empty() {
        byte_swap(&mut data, format, size);
    }

    let mut array = FormattedArray::from_raw(format.clone(), size, data)?;
    array.set_text(&buf[HEADER_SIZE + records_len..]);
    Ok(array)
}

fn check_portable(format: &Format) {
    if format.has_pointer() {
        panic!("Cannot serialize a pointer (format {})", format);
    }
}
