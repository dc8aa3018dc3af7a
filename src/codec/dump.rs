use crate::codec::array::FormattedArray;
use crate::codec::format::FieldKind;
use crate::lexicon::{Key, Lexicon};
use byteorder::{ByteOrder, NativeEndian};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Renders every record on its own line, resolving key fields to
/// `Class : "name"`.
///
/// # Panics
/// If the format holds a pointer field.
pub fn dump(array: &FormattedArray, lexicon: &dyn Lexicon) -> String {
    let format = array.format();
    if format.has_pointer() {
        panic!("dump tries to dump a pointer (format {})", format);
    }

    let offsets = format.offsets();
    let mut out = String::new();

    for record in array.as_bytes().chunks_exact(array.record_size()) {
        out.push('\n');
        for (kind, &offset) in format.fields().iter().zip(&offsets) {
            let slot = &record[offset..];
            // Writing into a String cannot fail.
            let _ = match kind {
                FieldKind::Byte => {
                    out.push(slot[0] as char);
                    Ok(())
                }
                FieldKind::Key => {
                    let key = Key(NativeEndian::read_u32(slot));
                    write!(out, " {} : \"{}\" ", lexicon.class_name(key), lexicon.name(key))
                }
                FieldKind::Unit => write!(out, " bsunit "),
                FieldKind::Int => write!(out, " {} ", NativeEndian::read_i32(slot)),
                FieldKind::Float => write!(out, " {:.6} ", NativeEndian::read_f32(slot)),
                FieldKind::Disk => write!(out, " {} ", NativeEndian::read_u32(slot)),
                FieldKind::Time => write!(out, " {} ", show_time(NativeEndian::read_u32(slot))),
                FieldKind::Pointer => unreachable!(),
            };
        }
    }

    out.push_str("\n\n");
    out
}

fn show_time(secs: u32) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d_%H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}
