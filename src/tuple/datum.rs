//! Field values.

use std::cmp::Ordering;
use std::fmt;

/// A borrowed field value read out of a tuple image.
///
/// Ordering is by variant first, so `Null` sorts before every value; values
/// of the same type compare naturally and byte strings lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatumRef<'a> {
    Null,
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Bytes(&'a [u8]),
}

/// An owned field value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datum {
    Null,
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn as_ref(&self) -> DatumRef<'_> {
        match self {
            Datum::Null => DatumRef::Null,
            Datum::Int32(v) => DatumRef::Int32(*v),
            Datum::Int64(v) => DatumRef::Int64(*v),
            Datum::UInt64(v) => DatumRef::UInt64(*v),
            Datum::Bytes(v) => DatumRef::Bytes(v),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

impl DatumRef<'_> {
    pub fn to_owned(self) -> Datum {
        match self {
            DatumRef::Null => Datum::Null,
            DatumRef::Int32(v) => Datum::Int32(v),
            DatumRef::Int64(v) => Datum::Int64(v),
            DatumRef::UInt64(v) => Datum::UInt64(v),
            DatumRef::Bytes(v) => Datum::Bytes(v.to_vec()),
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, DatumRef::Null)
    }

    pub fn as_u64(self) -> Option<u64> {
        match self {
            DatumRef::UInt64(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int32(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int64(v)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::UInt64(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Bytes(v.as_bytes().to_vec())
    }
}

impl fmt::Display for DatumRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatumRef::Null => write!(f, "NULL"),
            DatumRef::Int32(v) => write!(f, "{v}"),
            DatumRef::Int64(v) => write!(f, "{v}"),
            DatumRef::UInt64(v) => write!(f, "{v}"),
            DatumRef::Bytes(v) => write!(f, "'{}'", String::from_utf8_lossy(v)),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(f)
    }
}

/// Compare two keys field by field over their common prefix.
///
/// A shorter key equals every longer key it prefixes, which lets callers
/// search on leading key columns only.
pub fn compare_keys(a: &[DatumRef<'_>], b: &[DatumRef<'_>]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.cmp(y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Render a key for error messages, e.g. `(1, 'abc')`.
pub fn format_key(key: &[DatumRef<'_>]) -> String {
    let parts: Vec<String> = key.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        assert!(DatumRef::Null < DatumRef::Int32(i32::MIN));
        assert!(DatumRef::Null < DatumRef::Bytes(b""));
        assert!(Datum::Int32(-1) < Datum::Int32(0));
    }

    #[test]
    fn test_bytes_compare_lexicographically() {
        assert!(DatumRef::Bytes(b"ab") < DatumRef::Bytes(b"abc"));
        assert!(DatumRef::Bytes(b"b") > DatumRef::Bytes(b"abc"));
    }

    #[test]
    fn test_prefix_comparison() {
        let full = [DatumRef::Int32(1), DatumRef::Int32(5)];
        let prefix = [DatumRef::Int32(1)];
        assert_eq!(compare_keys(&prefix, &full), Ordering::Equal);
        assert_eq!(
            compare_keys(&[DatumRef::Int32(1), DatumRef::Int32(4)], &full),
            Ordering::Less
        );
    }

    #[test]
    fn test_owned_round_trip_and_display() {
        let datum = Datum::from("key");
        assert_eq!(datum.as_ref().to_owned(), datum);
        assert_eq!(
            format_key(&[DatumRef::Int32(1), DatumRef::Null, datum.as_ref()]),
            "(1, NULL, 'key')"
        );
    }
}
