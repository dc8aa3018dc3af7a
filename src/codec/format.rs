use crate::codec::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::{align_of, size_of};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Byte,
    Key,
    Unit,
    Int,
    Float,
    Disk,
    Time,
    Pointer,
}

impl FieldKind {
    pub fn from_tag(tag: char) -> Option<Self> {
        Some(match tag {
            'c' => FieldKind::Byte,
            'k' => FieldKind::Key,
            'a' => FieldKind::Unit,
            'i' => FieldKind::Int,
            'f' => FieldKind::Float,
            'd' => FieldKind::Disk,
            't' => FieldKind::Time,
            'v' => FieldKind::Pointer,
            _ => return None,
        })
    }

    pub fn tag(self) -> char {
        match self {
            FieldKind::Byte => 'c',
            FieldKind::Key => 'k',
            FieldKind::Unit => 'a',
            FieldKind::Int => 'i',
            FieldKind::Float => 'f',
            FieldKind::Disk => 'd',
            FieldKind::Time => 't',
            FieldKind::Pointer => 'v',
        }
    }

    pub fn size(self) -> usize {
        match self {
            FieldKind::Byte => 1,
            FieldKind::Key | FieldKind::Unit | FieldKind::Disk | FieldKind::Time => {
                size_of::<u32>()
            }
            FieldKind::Int => size_of::<i32>(),
            FieldKind::Float => size_of::<f32>(),
            FieldKind::Pointer => size_of::<usize>(),
        }
    }

    pub fn alignment(self) -> usize {
        match self {
            FieldKind::Byte => 1,
            FieldKind::Key | FieldKind::Unit | FieldKind::Disk | FieldKind::Time => {
                align_of::<u32>()
            }
            FieldKind::Int => align_of::<i32>(),
            FieldKind::Float => align_of::<f32>(),
            FieldKind::Pointer => align_of::<usize>(),
        }
    }

    /// Fields swapped as a single 32-bit word when crossing byte orders.
    pub fn is_word(self) -> bool {
        !matches!(self, FieldKind::Byte | FieldKind::Pointer)
    }
}

/// Field layout of one record, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    fields: Vec<FieldKind>,
}

impl Format {
    pub fn parse(descriptor: &str) -> CodecResult<Self> {
        if descriptor.is_empty() {
            return Err(CodecError::EmptyFormat);
        }

        let fields = descriptor
            .chars()
            .map(|tag| {
                FieldKind::from_tag(tag).ok_or_else(|| CodecError::UnknownTag {
                    tag,
                    format: descriptor.to_string(),
                })
            })
            .collect::<CodecResult<Vec<_>>>()?;

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldKind] {
        &self.fields
    }

    /// The most restrictive alignment among the fields.
    pub fn alignment(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.alignment())
            .max()
            .unwrap_or(1)
    }

    /// Offset of every field inside a record, each padded to its own alignment.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offset = 0;
        self.fields
            .iter()
            .map(|field| {
                offset = align_up(offset, field.alignment());
                let at = offset;
                offset += field.size();
                at
            })
            .collect()
    }

    /// Size of one record, padded to the format's alignment.
    pub fn record_size(&self) -> usize {
        let end = self
            .fields
            .iter()
            .fold(0, |offset, field| align_up(offset, field.alignment()) + field.size());
        align_up(end, self.alignment())
    }

    pub fn has_pointer(&self) -> bool {
        self.fields.contains(&FieldKind::Pointer)
    }
}

impl FromStr for Format {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::parse(s)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            write!(f, "{}", field.tag())?;
        }
        Ok(())
    }
}

fn align_up(offset: usize, alignment: usize) -> usize {
    offset.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let format = Format::parse("kkccc").unwrap();
        assert_eq!(format.fields().len(), 5);
        assert_eq!(format.fields()[0], FieldKind::Key);
        assert_eq!(format.fields()[4], FieldKind::Byte);
        assert_eq!(format.to_string(), "kkccc");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Format::parse(""), Err(CodecError::EmptyFormat));
        assert_eq!(
            Format::parse("kxi"),
            Err(CodecError::UnknownTag {
                tag: 'x',
                format: "kxi".to_string()
            })
        );
    }

    #[test]
    fn test_record_sizes() {
        let size = |s: &str| Format::parse(s).unwrap().record_size();

        assert_eq!(size("c"), 1);
        assert_eq!(size("ccc"), 3);
        assert_eq!(size("k"), 4);
        assert_eq!(size("ci"), 8);
        assert_eq!(size("ic"), 8);
        assert_eq!(size("ccf"), 8);
        assert_eq!(size("kkccc"), 12);
        assert_eq!(size("cid"), 12);
        assert_eq!(size("kiftad"), 24);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_pointer_alignment() {
        let format = Format::parse("cv").unwrap();
        assert_eq!(format.offsets(), vec![0, 8]);
        assert_eq!(format.record_size(), 16);
        assert!(format.has_pointer());
    }

    #[test]
    fn test_offsets() {
        let format = Format::parse("ckcci").unwrap();
        assert_eq!(format.offsets(), vec![0, 4, 8, 9, 12]);
        assert_eq!(format.record_size(), 16);
        assert_eq!(format.alignment(), 4);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let a = Format::parse("kfcit").unwrap();
        let b: Format = "kfcit".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.record_size(), b.record_size());
        assert_eq!(a.offsets(), b.offsets());
    }
}
