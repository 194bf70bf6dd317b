//! Tuple accessor - marshalling and zero-copy field access.
//!
//! # Tuple Layout
//! ```text
//! Fixed-width tuples:
//! ┌──────────────┬──────────────────────────────┐
//! │ null bitmap  │ fixed fields (declared order)│
//! └──────────────┴──────────────────────────────┘
//!
//! Variable-width tuples:
//! ┌─────────┬──────────────┬──────────────┬───────────────┬──────────┐
//! │ len u16 │ null bitmap  │ fixed fields │ var ends u16… │ var data │
//! └─────────┴──────────────┴──────────────┴───────────────┴──────────┘
//! ```
//!
//! The bitmap has one bit per nullable field. Integers are little-endian;
//! `Char(n)` is padded with spaces. Each variable field's end offset is
//! relative to the tuple start; its start is the previous field's end.

use crate::common::codec::{read_u16, read_u32, read_u64, write_u16};
use crate::common::{Error, Result};

use super::{Datum, DatumRef, FieldType, TupleDescriptor};

#[derive(Debug, Clone, Copy)]
enum Slot {
    Fixed { offset: usize, width: usize },
    Variable { index: usize },
}

#[derive(Debug, Clone, Copy)]
struct FieldLayout {
    field_type: FieldType,
    null_bit: Option<usize>,
    slot: Slot,
}

/// Precomputed layout for one [`TupleDescriptor`].
///
/// # Example
/// ```
/// use pagetree::tuple::{Datum, DatumRef, FieldDescriptor, FieldType, TupleAccessor, TupleDescriptor};
///
/// let desc = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int32),
///     FieldDescriptor::new(FieldType::Varchar(16)),
/// ]);
/// let accessor = TupleAccessor::new(&desc);
///
/// let tuple = accessor.marshal_values(&[Datum::Int32(7), Datum::from("seven")]).unwrap();
/// assert_eq!(accessor.tuple_size(&tuple), tuple.len());
/// assert_eq!(accessor.field(&tuple, 0), DatumRef::Int32(7));
/// assert_eq!(accessor.field(&tuple, 1), DatumRef::Bytes(b"seven"));
/// ```
#[derive(Debug, Clone)]
pub struct TupleAccessor {
    descriptor: TupleDescriptor,
    fields: Vec<FieldLayout>,
    bitmap_offset: usize,
    /// End of the fixed section; the var end-offset table starts here.
    fixed_end: usize,
    var_count: usize,
    fixed_size: Option<usize>,
}

impl TupleAccessor {
    pub fn new(descriptor: &TupleDescriptor) -> Self {
        let is_fixed = descriptor.is_fixed_width();
        let bitmap_offset = if is_fixed { 0 } else { 2 };
        let nullable = descriptor.fields().iter().filter(|f| f.nullable).count();
        let bitmap_bytes = nullable.div_ceil(8);

        let mut offset = bitmap_offset + bitmap_bytes;
        let mut next_bit = 0;
        let mut var_count = 0;
        let fields = descriptor
            .fields()
            .iter()
            .map(|field| {
                let null_bit = field.nullable.then(|| {
                    next_bit += 1;
                    next_bit - 1
                });
                let slot = match field.field_type.fixed_width() {
                    Some(width) => {
                        let slot = Slot::Fixed { offset, width };
                        offset += width;
                        slot
                    }
                    None => {
                        var_count += 1;
                        Slot::Variable {
                            index: var_count - 1,
                        }
                    }
                };
                FieldLayout {
                    field_type: field.field_type,
                    null_bit,
                    slot,
                }
            })
            .collect();

        Self {
            descriptor: descriptor.clone(),
            fields,
            bitmap_offset,
            fixed_end: offset,
            var_count,
            fixed_size: is_fixed.then_some(offset),
        }
    }

    pub fn descriptor(&self) -> &TupleDescriptor {
        &self.descriptor
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_fixed_width(&self) -> bool {
        self.fixed_size.is_some()
    }

    /// Size of every tuple, for fixed-width descriptors.
    #[inline]
    pub fn fixed_size(&self) -> Option<usize> {
        self.fixed_size
    }

    /// Size with every variable field empty.
    pub fn min_size(&self) -> usize {
        self.var_data_start()
    }

    /// Size with every variable field at its maximum length.
    pub fn max_size(&self) -> usize {
        self.var_data_start()
            + self
                .fields
                .iter()
                .filter(|f| matches!(f.slot, Slot::Variable { .. }))
                .map(|f| f.field_type.max_width())
                .sum::<usize>()
    }

    /// Size of the tuple starting at `tuple[0]`.
    #[inline]
    pub fn tuple_size(&self, tuple: &[u8]) -> usize {
        match self.fixed_size {
            Some(size) => size,
            None => read_u16(tuple, 0) as usize,
        }
    }

    /// Offset of a fixed-width field within every tuple of this shape.
    pub fn fixed_offset(&self, i: usize) -> Option<usize> {
        match self.fields[i].slot {
            Slot::Fixed { offset, .. } => Some(offset),
            Slot::Variable { .. } => None,
        }
    }

    #[inline]
    fn var_data_start(&self) -> usize {
        self.fixed_end + 2 * self.var_count
    }

    pub fn is_null(&self, tuple: &[u8], i: usize) -> bool {
        match self.fields[i].null_bit {
            Some(bit) => tuple[self.bitmap_offset + bit / 8] & (1 << (bit % 8)) != 0,
            None => false,
        }
    }

    /// Read field `i` without copying.
    pub fn field<'a>(&self, tuple: &'a [u8], i: usize) -> DatumRef<'a> {
        if self.is_null(tuple, i) {
            return DatumRef::Null;
        }
        let layout = &self.fields[i];
        let bytes = match layout.slot {
            Slot::Fixed { offset, width } => &tuple[offset..offset + width],
            Slot::Variable { index } => {
                let start = if index == 0 {
                    self.var_data_start()
                } else {
                    read_u16(tuple, self.fixed_end + 2 * (index - 1)) as usize
                };
                let end = read_u16(tuple, self.fixed_end + 2 * index) as usize;
                &tuple[start..end]
            }
        };
        match layout.field_type {
            FieldType::Int32 => DatumRef::Int32(read_u32(bytes, 0) as i32),
            FieldType::Int64 => DatumRef::Int64(read_u64(bytes, 0) as i64),
            FieldType::UInt64 => DatumRef::UInt64(read_u64(bytes, 0)),
            FieldType::Char(_) | FieldType::Varchar(_) => DatumRef::Bytes(bytes),
        }
    }

    pub fn values<'a>(&self, tuple: &'a [u8]) -> Vec<DatumRef<'a>> {
        (0..self.fields.len()).map(|i| self.field(tuple, i)).collect()
    }

    pub fn to_datums(&self, tuple: &[u8]) -> Vec<Datum> {
        (0..self.fields.len())
            .map(|i| self.field(tuple, i).to_owned())
            .collect()
    }

    pub fn marshal_values(&self, values: &[Datum]) -> Result<Vec<u8>> {
        let refs: Vec<DatumRef<'_>> = values.iter().map(Datum::as_ref).collect();
        self.marshal(&refs)
    }

    pub fn marshal(&self, values: &[DatumRef<'_>]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.min_size());
        self.marshal_into(values, &mut out)?;
        Ok(out)
    }

    /// Marshal `values` into `out`, replacing its contents.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if the values do not match the descriptor.
    pub fn marshal_into(&self, values: &[DatumRef<'_>], out: &mut Vec<u8>) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::InvalidArgument(format!(
                "expected {} fields, got {}",
                self.fields.len(),
                values.len()
            )));
        }

        out.clear();
        out.resize(self.var_data_start(), 0);
        let mut var_end = self.var_data_start();

        for (i, (layout, value)) in self.fields.iter().zip(values).enumerate() {
            if value.is_null() {
                let Some(bit) = layout.null_bit else {
                    return Err(Error::InvalidArgument(format!("field {i} is not nullable")));
                };
                out[self.bitmap_offset + bit / 8] |= 1 << (bit % 8);
                if let Slot::Variable { index } = layout.slot {
                    write_u16(out, self.fixed_end + 2 * index, var_end as u16);
                }
                continue;
            }

            match (layout.slot, layout.field_type, value) {
                (Slot::Fixed { offset, .. }, FieldType::Int32, DatumRef::Int32(v)) => {
                    out[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
                }
                (Slot::Fixed { offset, .. }, FieldType::Int64, DatumRef::Int64(v)) => {
                    out[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
                }
                (Slot::Fixed { offset, .. }, FieldType::UInt64, DatumRef::UInt64(v)) => {
                    out[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
                }
                (Slot::Fixed { offset, width }, FieldType::Char(_), DatumRef::Bytes(v)) => {
                    if v.len() > width {
                        return Err(Error::InvalidArgument(format!(
                            "field {i}: {} bytes exceed CHAR({width})",
                            v.len()
                        )));
                    }
                    out[offset..offset + v.len()].copy_from_slice(v);
                    out[offset + v.len()..offset + width].fill(b' ');
                }
                (Slot::Variable { index }, FieldType::Varchar(max), DatumRef::Bytes(v)) => {
                    if v.len() > max as usize {
                        return Err(Error::InvalidArgument(format!(
                            "field {i}: {} bytes exceed VARCHAR({max})",
                            v.len()
                        )));
                    }
                    out.extend_from_slice(v);
                    var_end += v.len();
                    write_u16(out, self.fixed_end + 2 * index, var_end as u16);
                }
                (_, field_type, value) => {
                    return Err(Error::InvalidArgument(format!(
                        "field {i}: {value:?} does not match {field_type:?}"
                    )));
                }
            }
        }

        if self.fixed_size.is_none() {
            let len = out.len();
            if len > u16::MAX as usize {
                return Err(Error::TupleOverflow {
                    size: len,
                    max: u16::MAX as usize,
                });
            }
            write_u16(out, 0, len as u16);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::FieldDescriptor;

    fn mixed() -> TupleAccessor {
        TupleAccessor::new(&TupleDescriptor::new(vec![
            FieldDescriptor::new(FieldType::Int32),
            FieldDescriptor::nullable(FieldType::Varchar(10)),
            FieldDescriptor::nullable(FieldType::Int64),
            FieldDescriptor::new(FieldType::Varchar(10)),
            FieldDescriptor::new(FieldType::Char(4)),
        ]))
    }

    #[test]
    fn test_fixed_layout() {
        let accessor = TupleAccessor::new(&TupleDescriptor::new(vec![
            FieldDescriptor::new(FieldType::Int32),
            FieldDescriptor::new(FieldType::Int32),
        ]));
        assert_eq!(accessor.fixed_size(), Some(8));

        let tuple = accessor
            .marshal_values(&[Datum::Int32(-3), Datum::Int32(9)])
            .unwrap();
        assert_eq!(tuple.len(), 8);
        assert_eq!(accessor.field(&tuple, 0), DatumRef::Int32(-3));
        assert_eq!(accessor.field(&tuple, 1), DatumRef::Int32(9));
    }

    #[test]
    fn test_variable_layout_with_nulls() {
        let accessor = mixed();
        assert!(!accessor.is_fixed_width());

        let values = vec![
            Datum::Int32(1),
            Datum::Null,
            Datum::Int64(-5),
            Datum::from("tail"),
            Datum::from("ab"),
        ];
        let tuple = accessor.marshal_values(&values).unwrap();
        assert_eq!(accessor.tuple_size(&tuple), tuple.len());
        assert!(accessor.is_null(&tuple, 1));
        assert_eq!(accessor.field(&tuple, 2), DatumRef::Int64(-5));
        assert_eq!(accessor.field(&tuple, 3), DatumRef::Bytes(b"tail"));
        assert_eq!(accessor.field(&tuple, 4), DatumRef::Bytes(b"ab  "));
        assert_eq!(accessor.to_datums(&tuple)[..4], values[..4]);
    }

    #[test]
    fn test_size_bounds() {
        let accessor = mixed();
        // len + bitmap + int32 + int64 + char(4) + two var ends
        assert_eq!(accessor.min_size(), 2 + 1 + 4 + 8 + 4 + 4);
        assert_eq!(accessor.max_size(), accessor.min_size() + 20);
    }

    #[test]
    fn test_marshal_rejects_mismatches() {
        let accessor = mixed();
        let not_nullable = [
            Datum::Null,
            Datum::Null,
            Datum::Null,
            Datum::from(""),
            Datum::from(""),
        ];
        assert!(accessor.marshal_values(&not_nullable).is_err());

        let wrong_type = [
            Datum::Int64(1),
            Datum::Null,
            Datum::Null,
            Datum::from(""),
            Datum::from(""),
        ];
        assert!(accessor.marshal_values(&wrong_type).is_err());

        let too_long = [
            Datum::Int32(1),
            Datum::from("01234567890"),
            Datum::Null,
            Datum::from(""),
            Datum::from(""),
        ];
        assert!(accessor.marshal_values(&too_long).is_err());
        assert!(accessor.marshal_values(&[Datum::Int32(1)]).is_err());
    }
}
