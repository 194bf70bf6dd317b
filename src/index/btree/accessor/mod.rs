//! Node accessors - record layout, search and split within one node.
//!
//! A [`NodeAccessor`] interprets the entry region of a node page. Two
//! layouts exist:
//!
//! - [`FixedNodeAccessor`] - entries of one size, packed after the header
//! - [`VariableNodeAccessor`] - an offset table growing forward and entries
//!   growing backward from the end of the page
//!
//! Leaves store full records; non-leaf entries store the key followed by a
//! `UInt64` child page id. Accessors work on plain byte slices and never
//! touch the cache.

mod fixed;
mod variable;

pub use fixed::FixedNodeAccessor;
pub use variable::VariableNodeAccessor;

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::common::codec::write_u64;
use crate::common::config::USABLE_PAGE_SIZE;
use crate::common::{PageId, Result};
use crate::tuple::{
    compare_keys, DatumRef, FieldDescriptor, FieldType, TupleAccessor, TupleDescriptor,
};

use super::node::{self, NODE_HEADER_SIZE};
use super::DuplicateSeek;

/// Result of a capacity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    CanFit,
    /// Enough free bytes in total, but fragmented.
    CanFitWithCompaction,
    CanNotFit,
}

/// Key-related view of the records one node stores.
#[derive(Debug, Clone)]
pub struct RecordShape {
    tuple: TupleAccessor,
    /// Record fields forming the key, in key order.
    key_fields: Vec<usize>,
    /// Record field holding the child page id (non-leaf records only).
    child_field: Option<usize>,
}

impl RecordShape {
    pub fn tuple(&self) -> &TupleAccessor {
        &self.tuple
    }

    pub fn key_fields(&self) -> &[usize] {
        &self.key_fields
    }

    /// Compare the key of `record` with `key` over `key`'s length.
    pub fn compare(&self, record: &[u8], key: &[DatumRef<'_>]) -> Ordering {
        self.key_fields
            .iter()
            .zip(key)
            .map(|(&field, sought)| self.tuple.field(record, field).cmp(sought))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    pub fn key<'a>(&self, record: &'a [u8]) -> SmallVec<[DatumRef<'a>; 4]> {
        self.key_fields
            .iter()
            .map(|&field| self.tuple.field(record, field))
            .collect()
    }

    /// Child page id of a non-leaf record; NULL for leaf records.
    pub fn child(&self, record: &[u8]) -> PageId {
        match self.child_field.map(|field| self.tuple.field(record, field)) {
            Some(DatumRef::UInt64(id)) => PageId(id),
            _ => PageId::NULL,
        }
    }
}

/// Enum-dispatched node layout.
///
/// # Example
/// ```
/// use pagetree::index::btree::{Capacity, DuplicateSeek, NodeAccessor};
/// use pagetree::tuple::{DatumRef, FieldDescriptor, FieldType, TupleDescriptor};
///
/// let desc = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int32),
///     FieldDescriptor::new(FieldType::Int32),
/// ]);
/// let leaf = NodeAccessor::leaf(&desc, &[0]);
/// let mut data = vec![0u8; 4076];
/// leaf.clear_node(&mut data, 0);
///
/// for k in [10, 30, 20] {
///     let record = leaf.shape().tuple().marshal(&[DatumRef::Int32(k), DatumRef::Int32(0)]).unwrap();
///     let (pos, _) = leaf.search(&data, &[DatumRef::Int32(k)], DuplicateSeek::Begin);
///     assert_eq!(leaf.capacity(&data, record.len()), Capacity::CanFit);
///     leaf.insert_entry(&mut data, pos, &record);
/// }
/// assert_eq!(leaf.search(&data, &[DatumRef::Int32(20)], DuplicateSeek::Any), (1, true));
/// ```
#[derive(Debug, Clone)]
pub enum NodeAccessor {
    Fixed(FixedNodeAccessor),
    Variable(VariableNodeAccessor),
}

impl NodeAccessor {
    /// Accessor for leaves storing `descriptor` records keyed on
    /// `key_projection`.
    pub fn leaf(descriptor: &TupleDescriptor, key_projection: &[usize]) -> Self {
        Self::with_shape(RecordShape {
            tuple: TupleAccessor::new(descriptor),
            key_fields: key_projection.to_vec(),
            child_field: None,
        })
    }

    /// Accessor for non-leaf nodes of the same tree: the projected key
    /// followed by a child page id.
    pub fn non_leaf(descriptor: &TupleDescriptor, key_projection: &[usize]) -> Self {
        let mut key = descriptor.project(key_projection);
        key.push(FieldDescriptor::new(FieldType::UInt64));
        let k = key_projection.len();
        Self::with_shape(RecordShape {
            tuple: TupleAccessor::new(&key),
            key_fields: (0..k).collect(),
            child_field: Some(k),
        })
    }

    fn with_shape(shape: RecordShape) -> Self {
        if shape.tuple.is_fixed_width() {
            NodeAccessor::Fixed(FixedNodeAccessor::new(shape))
        } else {
            NodeAccessor::Variable(VariableNodeAccessor::new(shape))
        }
    }

    #[inline]
    pub fn shape(&self) -> &RecordShape {
        match self {
            NodeAccessor::Fixed(a) => &a.shape,
            NodeAccessor::Variable(a) => &a.shape,
        }
    }

    #[inline]
    pub fn is_fixed_width(&self) -> bool {
        matches!(self, NodeAccessor::Fixed(_))
    }

    /// Largest record any node of this tree accepts.
    ///
    /// Four records always fit one node, so a split can always place the
    /// incoming record.
    pub fn max_entry_size() -> usize {
        (USABLE_PAGE_SIZE - NODE_HEADER_SIZE) / 4 - 2
    }

    /// Entries a node of `node_size` bytes holds, for fixed-width records.
    pub fn fixed_capacity(&self, node_size: usize) -> Option<usize> {
        match self {
            NodeAccessor::Fixed(a) => Some((node_size - NODE_HEADER_SIZE) / a.entry_size()),
            NodeAccessor::Variable(_) => None,
        }
    }

    /// Reset `data` to an empty node of `height`.
    pub fn clear_node(&self, data: &mut [u8], height: u32) {
        match self {
            NodeAccessor::Fixed(a) => a.clear_node(data, height),
            NodeAccessor::Variable(a) => a.clear_node(data, height),
        }
    }

    /// Bytes of entry `i`.
    #[inline]
    pub fn entry<'a>(&self, data: &'a [u8], i: usize) -> &'a [u8] {
        match self {
            NodeAccessor::Fixed(a) => a.entry(data, i),
            NodeAccessor::Variable(a) => a.entry(data, i),
        }
    }

    /// Open a `size`-byte gap at index `i` and return it.
    ///
    /// # Panics
    /// Panics unless [`capacity`](Self::capacity) reported `CanFit`.
    pub fn allocate_entry<'a>(&self, data: &'a mut [u8], i: usize, size: usize) -> &'a mut [u8] {
        match self {
            NodeAccessor::Fixed(a) => a.allocate_entry(data, i, size),
            NodeAccessor::Variable(a) => a.allocate_entry(data, i, size),
        }
    }

    pub fn insert_entry(&self, data: &mut [u8], i: usize, record: &[u8]) {
        self.allocate_entry(data, i, record.len())
            .copy_from_slice(record);
    }

    pub fn deallocate_entry(&self, data: &mut [u8], i: usize) {
        match self {
            NodeAccessor::Fixed(a) => a.deallocate_entry(data, i),
            NodeAccessor::Variable(a) => a.deallocate_entry(data, i),
        }
    }

    pub fn capacity(&self, data: &[u8], size: usize) -> Capacity {
        match self {
            NodeAccessor::Fixed(a) => a.capacity(data, size),
            NodeAccessor::Variable(a) => a.capacity(data, size),
        }
    }

    /// Rewrite `src` into `dst` with entries packed and in order.
    pub fn compact_node(&self, src: &[u8], dst: &mut [u8]) {
        match self {
            NodeAccessor::Fixed(_) => dst.copy_from_slice(src),
            NodeAccessor::Variable(a) => a.compact_node(src, dst),
        }
    }

    /// Compact `data` in place.
    pub fn compact_in_place(&self, data: &mut [u8]) {
        if let NodeAccessor::Variable(a) = self {
            let mut scratch = vec![0u8; data.len()];
            a.compact_node(data, &mut scratch);
            data.copy_from_slice(&scratch);
        }
    }

    /// Move the upper part of `left` into `right`, which is reset to an empty
    /// node of the same height. Siblings are left to the caller.
    ///
    /// `pos` and `incoming` describe the record about to be inserted. With
    /// `monotonic` set and the record going to the end, only the last entry
    /// moves, leaving the new node nearly empty for further appends.
    ///
    /// Returns the number of entries left in `left`.
    pub fn split_node(
        &self,
        left: &mut [u8],
        right: &mut [u8],
        pos: usize,
        incoming: usize,
        monotonic: bool,
    ) -> usize {
        let n = node::entry_count(left);
        let sizes: SmallVec<[usize; 256]> = (0..n).map(|i| self.slot_size(left, i)).collect();
        let left_n = choose_split(&sizes, pos, self.slot_bytes(incoming), monotonic);
        match self {
            NodeAccessor::Fixed(a) => a.move_upper(left, right, left_n),
            NodeAccessor::Variable(a) => a.move_upper(left, right, left_n),
        }
        left_n
    }

    fn slot_size(&self, data: &[u8], i: usize) -> usize {
        self.slot_bytes(self.entry(data, i).len())
    }

    fn slot_bytes(&self, size: usize) -> usize {
        match self {
            NodeAccessor::Fixed(_) => size,
            NodeAccessor::Variable(_) => size + 2,
        }
    }

    /// Binary search for `key` (possibly a key prefix).
    ///
    /// Returns `(pos, found)`. If found, `pos` is the first match, or the
    /// last match in this node for [`DuplicateSeek::End`]. Otherwise `pos`
    /// is the first entry greater than `key`, which may be the key count.
    pub fn search(&self, data: &[u8], key: &[DatumRef<'_>], seek: DuplicateSeek) -> (usize, bool) {
        let shape = self.shape();
        let key_count = node::key_count(data);

        let (mut lo, mut hi) = (0, key_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if shape.compare(self.entry(data, mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found =
            lo < key_count && shape.compare(self.entry(data, lo), key) == Ordering::Equal;
        if !found || seek != DuplicateSeek::End {
            return (lo, found);
        }

        let mut hi = key_count;
        let mut after = lo;
        while after < hi {
            let mid = after + (hi - after) / 2;
            if shape.compare(self.entry(data, mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                after = mid + 1;
            }
        }
        (after - 1, true)
    }

    /// Key of entry `i`.
    pub fn key<'a>(&self, data: &'a [u8], i: usize) -> SmallVec<[DatumRef<'a>; 4]> {
        self.shape().key(self.entry(data, i))
    }

    /// Child page id of non-leaf entry `i`.
    pub fn child(&self, data: &[u8], i: usize) -> PageId {
        self.shape().child(self.entry(data, i))
    }

    /// Point non-leaf entry `i` at `child`, in place.
    ///
    /// # Panics
    /// Panics on a leaf accessor.
    pub fn set_child(&self, data: &mut [u8], i: usize, child: PageId) {
        let shape = self.shape();
        let Some(field_offset) = shape.child_field.and_then(|f| shape.tuple.fixed_offset(f))
        else {
            panic!("set_child on a leaf node");
        };
        let entry_offset = self.entry_offset(data, i);
        write_u64(data, entry_offset + field_offset, child.0);
    }

    fn entry_offset(&self, data: &[u8], i: usize) -> usize {
        match self {
            NodeAccessor::Fixed(a) => a.entry_offset(i),
            NodeAccessor::Variable(a) => a.entry_offset(data, i),
        }
    }

    /// Marshal a non-leaf record pointing at `child`.
    pub fn non_leaf_record(&self, key: &[DatumRef<'_>], child: PageId) -> Result<Vec<u8>> {
        let mut values: SmallVec<[DatumRef<'_>; 5]> = key.iter().copied().collect();
        values.push(DatumRef::UInt64(child.0));
        self.shape().tuple.marshal(&values)
    }

    /// Compare the keys of two entries, possibly of different nodes.
    pub fn compare_entries(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_keys(&self.shape().key(a), &self.shape().key(b))
    }
}

/// Pick how many existing entries stay left so the two halves hold about
/// the same number of bytes, counting the incoming record at `pos`.
fn choose_split(sizes: &[usize], pos: usize, incoming: usize, monotonic: bool) -> usize {
    let n = sizes.len();
    if n < 2 {
        return n;
    }
    if monotonic && pos == n {
        return n - 1;
    }

    let total: usize = sizes.iter().sum::<usize>() + incoming;
    let mut acc = 0;
    for (i, size) in sizes.iter().enumerate() {
        if i == pos {
            acc += incoming;
        }
        acc += size;
        if acc * 2 >= total {
            return (i + 1).clamp(1, n - 1);
        }
    }
    n - 1
}
