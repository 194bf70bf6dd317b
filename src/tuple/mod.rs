//! Typed tuples.
//!
//! - [`TupleDescriptor`] - Field types and nullability of a record shape
//! - [`TupleAccessor`] - Marshalling to and from byte images
//! - [`Datum`] / [`DatumRef`] - Owned and borrowed field values

mod accessor;
mod datum;
mod descriptor;

pub use accessor::TupleAccessor;
pub use datum::{compare_keys, format_key, Datum, DatumRef};
pub use descriptor::{FieldDescriptor, FieldType, TupleDescriptor};
