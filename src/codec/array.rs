use crate::codec::error::{CodecError, CodecResult};
use crate::codec::format::{FieldKind, Format};
use crate::lexicon::Key;
use byteorder::{ByteOrder, NativeEndian};

/// One field of a record, in host representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Byte(u8),
    Key(Key),
    Unit(u32),
    Int(i32),
    Float(f32),
    Disk(u32),
    Time(u32),
}

impl FieldValue {
    fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Byte(_) => FieldKind::Byte,
            FieldValue::Key(_) => FieldKind::Key,
            FieldValue::Unit(_) => FieldKind::Unit,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Disk(_) => FieldKind::Disk,
            FieldValue::Time(_) => FieldKind::Time,
        }
    }
}

/// A homogeneous record array in native layout, with an optional trailing
/// text buffer stored alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedArray {
    format: Format,
    offsets: Vec<usize>,
    record_size: usize,
    data: Vec<u8>,
    text: Vec<u8>,
}

impl FormattedArray {
    pub fn new(format: Format) -> Self {
        let record_size = format.record_size();
        Self {
            offsets: format.offsets(),
            format,
            record_size,
            data: Vec::new(),
            text: Vec::new(),
        }
    }

    /// Wraps raw native-layout record bytes.
    ///
    /// # Panics
    /// If `record_size` disagrees with the layout computed from `format`.
    pub fn from_raw(format: Format, record_size: usize, data: Vec<u8>) -> CodecResult<Self> {
        check_record_size(&format, record_size);
        if data.len() % record_size != 0 {
            return Err(CodecError::RaggedRecords {
                len: data.len(),
                record_size,
            });
        }

        let mut array = Self::new(format);
        array.data = data;
        Ok(array)
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.record_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<Vec<u8>>) {
        self.text = text.into();
    }

    /// Appends one record. Pointer fields are left zeroed.
    ///
    /// # Panics
    /// If the values do not match the format field for field.
    pub fn push(&mut self, values: &[FieldValue]) {
        let writable: Vec<_> = self
            .format
            .fields()
            .iter()
            .zip(&self.offsets)
            .filter(|(kind, _)| **kind != FieldKind::Pointer)
            .collect();
        if writable.len() != values.len() {
            panic!(
                "Record of {} values pushed into an array of format {}",
                values.len(),
                self.format
            );
        }

        let start = self.data.len();
        self.data.resize(start + self.record_size, 0);
        let record = &mut self.data[start..];

        for ((kind, &offset), value) in writable.into_iter().zip(values) {
            if value.kind() != *kind {
                panic!(
                    "Field '{}' of format {} given a {:?}",
                    kind.tag(),
                    self.format,
                    value
                );
            }
            let slot = &mut record[offset..];
            match *value {
                FieldValue::Byte(b) => slot[0] = b,
                FieldValue::Key(k) => NativeEndian::write_u32(slot, k.0),
                FieldValue::Unit(v) | FieldValue::Disk(v) | FieldValue::Time(v) => {
                    NativeEndian::write_u32(slot, v)
                }
                FieldValue::Int(v) => NativeEndian::write_i32(slot, v),
                FieldValue::Float(v) => NativeEndian::write_f32(slot, v),
            }
        }
    }

    /// Reads record `index` back into host values.
    ///
    /// # Panics
    /// If the format holds a pointer field, or `index` is out of bounds.
    pub fn record(&self, index: usize) -> Vec<FieldValue> {
        let start = index * self.record_size;
        let record = &self.data[start..start + self.record_size];

        self.format
            .fields()
            .iter()
            .zip(&self.offsets)
            .map(|(kind, &offset)| {
                let slot = &record[offset..];
                match kind {
                    FieldKind::Byte => FieldValue::Byte(slot[0]),
                    FieldKind::Key => FieldValue::Key(Key(NativeEndian::read_u32(slot))),
                    FieldKind::Unit => FieldValue::Unit(NativeEndian::read_u32(slot)),
                    FieldKind::Int => FieldValue::Int(NativeEndian::read_i32(slot)),
                    FieldKind::Float => FieldValue::Float(NativeEndian::read_f32(slot)),
                    FieldKind::Disk => FieldValue::Disk(NativeEndian::read_u32(slot)),
                    FieldKind::Time => FieldValue::Time(NativeEndian::read_u32(slot)),
                    FieldKind::Pointer => panic!("Cannot read a pointer field out of a record"),
                }
            })
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = Vec<FieldValue>> + '_ {
        (0..self.len()).map(|i| self.record(i))
    }

    /// Reverses the byte order of every word field in place.
    pub fn swap_bytes(&mut self) {
        byte_swap(&mut self.data, &self.format, self.record_size);
    }
}

/// Reverses the byte order of every 32-bit field of every record in `data`.
///
/// # Panics
/// If the format contains a pointer field, `record_size` disagrees with the
/// format's computed layout, or `data` ends in a partial record.
pub fn byte_swap(data: &mut [u8], format: &Format, record_size: usize) {
    check_record_size(format, record_size);
    if format.has_pointer() {
        panic!("byte_swap: cannot byte swap a pointer (format {})", format);
    }
    if data.len() % record_size != 0 {
        panic!(
            "byte_swap: {} bytes of data is not a whole number of {} byte records (format {})",
            data.len(),
            record_size,
            format
        );
    }

    let words: Vec<usize> = format
        .fields()
        .iter()
        .zip(format.offsets())
        .filter(|(kind, _)| kind.is_word())
        .map(|(_, offset)| offset)
        .collect();

    for record in data.chunks_exact_mut(record_size) {
        for &offset in &words {
            record[offset..offset + 4].reverse();
        }
    }
}

pub(crate) fn check_record_size(format: &Format, record_size: usize) {
    let computed = format.record_size();
    if record_size != computed {
        panic!(
            "Actual size of array {} != size {} of format {}",
            record_size, computed, format
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FormattedArray {
        let mut array = FormattedArray::new("kifct".parse().unwrap());
        array.push(&[
            FieldValue::Key(Key::new(2, 17)),
            FieldValue::Int(-42),
            FieldValue::Float(1.5),
            FieldValue::Byte(b'x'),
            FieldValue::Time(1_000_000),
        ]);
        array.push(&[
            FieldValue::Key(Key::new(3, 1)),
            FieldValue::Int(7),
            FieldValue::Float(-0.25),
            FieldValue::Byte(b'y'),
            FieldValue::Time(0),
        ]);
        array
    }

    #[test]
    fn test_push_and_read() {
        let array = sample();
        assert_eq!(array.len(), 2);
        assert_eq!(array.record_size(), 20);
        assert_eq!(array.as_bytes().len(), 40);

        let second = array.record(1);
        assert_eq!(second[0], FieldValue::Key(Key::new(3, 1)));
        assert_eq!(second[1], FieldValue::Int(7));
        assert_eq!(second[2], FieldValue::Float(-0.25));
        assert_eq!(second[3], FieldValue::Byte(b'y'));
    }

    #[test]
    fn test_swap_twice_is_identity() {
        let original = sample();
        let mut array = original.clone();

        array.swap_bytes();
        assert_ne!(array, original);
        assert_eq!(array.record(0)[1], FieldValue::Int((-42i32).swap_bytes()));
        assert_eq!(array.record(0)[3], FieldValue::Byte(b'x'));

        array.swap_bytes();
        assert_eq!(array, original);
    }

    #[test]
    fn test_from_raw_rejects_ragged_data() {
        let format: Format = "ki".parse().unwrap();
        let result = FormattedArray::from_raw(format, 8, vec![0; 12]);
        assert_eq!(
            result,
            Err(CodecError::RaggedRecords {
                len: 12,
                record_size: 8
            })
        );
    }

    #[test]
    #[should_panic(expected = "Actual size of array 12 != size 8 of format ki")]
    fn test_size_mismatch_is_fatal() {
        let format: Format = "ki".parse().unwrap();
        let _ = FormattedArray::from_raw(format, 12, vec![0; 24]);
    }

    #[test]
    #[should_panic(expected = "cannot byte swap a pointer")]
    fn test_swapping_pointer_is_fatal() {
        let format: Format = "kv".parse().unwrap();
        let size = format.record_size();
        let mut data = vec![0u8; size * 2];
        byte_swap(&mut data, &format, size);
    }

    #[test]
    #[should_panic(expected = "pushed into an array of format")]
    fn test_push_wrong_arity() {
        let mut array = FormattedArray::new("ki".parse().unwrap());
        array.push(&[FieldValue::Int(1)]);
    }

    #[test]
    #[should_panic(expected = "is not a whole number of 4 byte records")]
    fn test_swapping_partial_record_is_fatal() {
        let format: Format = "i".parse().unwrap();
        let mut data = [1u8, 2, 3, 4, 5, 6];
        byte_swap(&mut data, &format, 4);
    }
}
