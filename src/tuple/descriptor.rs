//! Tuple descriptors - the typed shape of a record.

use crate::common::codec::Cursor;
use crate::common::{Error, Result};

const TAG_INT32: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_UINT64: u8 = 3;
const TAG_CHAR: u8 = 4;
const TAG_VARCHAR: u8 = 5;

/// Storage type of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int32,
    Int64,
    UInt64,
    /// Fixed-length byte string, space padded.
    Char(u16),
    /// Variable-length byte string of at most the given length.
    Varchar(u16),
}

impl FieldType {
    /// Width in bytes for fixed-width types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::Int32 => Some(4),
            FieldType::Int64 | FieldType::UInt64 => Some(8),
            FieldType::Char(n) => Some(n as usize),
            FieldType::Varchar(_) => None,
        }
    }

    pub fn max_width(self) -> usize {
        match self {
            FieldType::Varchar(n) => n as usize,
            other => other.fixed_width().unwrap_or(0),
        }
    }

    fn encode(self) -> (u8, u16) {
        match self {
            FieldType::Int32 => (TAG_INT32, 0),
            FieldType::Int64 => (TAG_INT64, 0),
            FieldType::UInt64 => (TAG_UINT64, 0),
            FieldType::Char(n) => (TAG_CHAR, n),
            FieldType::Varchar(n) => (TAG_VARCHAR, n),
        }
    }

    fn decode(tag: u8, len: u16) -> Result<Self> {
        Ok(match tag {
            TAG_INT32 => FieldType::Int32,
            TAG_INT64 => FieldType::Int64,
            TAG_UINT64 => FieldType::UInt64,
            TAG_CHAR => FieldType::Char(len),
            TAG_VARCHAR => FieldType::Varchar(len),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown field type tag {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: true,
        }
    }
}

/// Ordered list of field descriptors.
///
/// # Example
/// ```
/// use pagetree::tuple::{FieldDescriptor, FieldType, TupleDescriptor};
///
/// let desc = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int32),
///     FieldDescriptor::nullable(FieldType::Varchar(40)),
/// ]);
/// assert!(!desc.is_fixed_width());
/// assert!(desc.project(&[0]).is_fixed_width());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TupleDescriptor {
    fields: Vec<FieldDescriptor>,
}

impl TupleDescriptor {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn push(&mut self, field: FieldDescriptor) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> &FieldDescriptor {
        &self.fields[i]
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_fixed_width(&self) -> bool {
        self.fields
            .iter()
            .all(|f| f.field_type.fixed_width().is_some())
    }

    /// The descriptor of the given fields, in the given order.
    ///
    /// # Panics
    /// Panics if a projected index is out of range.
    pub fn project(&self, projection: &[usize]) -> TupleDescriptor {
        TupleDescriptor::new(projection.iter().map(|&i| self.fields[i]).collect())
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());
        for field in &self.fields {
            let (tag, len) = field.field_type.encode();
            out.push(tag);
            out.push(u8::from(field.nullable));
            out.extend_from_slice(&len.to_le_bytes());
        }
    }

    pub(crate) fn deserialize(cursor: &mut Cursor<'_>) -> Result<Self> {
        let count = cursor.read_u16()? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = cursor.read_u8()?;
            let nullable = cursor.read_u8()? != 0;
            let len = cursor.read_u16()?;
            fields.push(FieldDescriptor {
                field_type: FieldType::decode(tag, len)?,
                nullable,
            });
        }
        Ok(Self { fields })
    }
}

impl FromIterator<FieldDescriptor> for TupleDescriptor {
    fn from_iter<I: IntoIterator<Item = FieldDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
