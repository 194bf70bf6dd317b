//! Variable-width node layout.
//!
//! ```text
//! ┌────────┬──────────────────┬────────────┬────────────────────────┐
//! │ header │ offsets u16 → …  │ free space │ … ← entries (any order)│
//! └────────┴──────────────────┴────────────┴────────────────────────┘
//! ```
//! The offset table is in key order; entry bytes are allocated downward
//! from the end of the page, so deletes leave holes until the node is
//! compacted. The header's compact free count is the gap between the table
//! and the lowest entry.

use super::{Capacity, RecordShape};
use crate::common::codec::{read_u16, write_u16};
use crate::index::btree::node::{self, NODE_HEADER_SIZE};

const SLOT_SIZE: usize = 2;

#[derive(Debug, Clone)]
pub struct VariableNodeAccessor {
    pub(super) shape: RecordShape,
}

impl VariableNodeAccessor {
    pub(super) fn new(shape: RecordShape) -> Self {
        Self { shape }
    }

    #[inline]
    fn slot(i: usize) -> usize {
        NODE_HEADER_SIZE + SLOT_SIZE * i
    }

    #[inline]
    pub(super) fn entry_offset(&self, data: &[u8], i: usize) -> usize {
        read_u16(data, Self::slot(i)) as usize
    }

    pub(super) fn clear_node(&self, data: &mut [u8], height: u32) {
        let free = data.len() - NODE_HEADER_SIZE;
        node::init(data, height, free, Some(free));
    }

    #[inline]
    pub(super) fn entry<'a>(&self, data: &'a [u8], i: usize) -> &'a [u8] {
        let offset = self.entry_offset(data, i);
        let size = self.shape.tuple.tuple_size(&data[offset..]);
        &data[offset..offset + size]
    }

    fn compact_free(data: &[u8]) -> usize {
        node::compact_free(data).unwrap_or(0)
    }

    pub(super) fn allocate_entry<'a>(
        &self,
        data: &'a mut [u8],
        i: usize,
        size: usize,
    ) -> &'a mut [u8] {
        let n = node::entry_count(data);
        let compact = Self::compact_free(data);
        assert!(i <= n, "entry index {i} out of range for {n} entries");
        assert!(compact >= size + SLOT_SIZE, "node needs compaction or a split");

        let low_water = Self::slot(n) + compact;
        let offset = low_water - size;
        data.copy_within(Self::slot(i)..Self::slot(n), Self::slot(i + 1));
        write_u16(data, Self::slot(i), offset as u16);

        node::set_entry_count(data, n + 1);
        node::set_total_free(data, node::total_free(data) - size - SLOT_SIZE);
        node::set_compact_free(data, compact - size - SLOT_SIZE);
        &mut data[offset..offset + size]
    }

    pub(super) fn deallocate_entry(&self, data: &mut [u8], i: usize) {
        let n = node::entry_count(data);
        assert!(i < n, "entry index {i} out of range for {n} entries");

        let size = self.entry(data, i).len();
        data.copy_within(Self::slot(i + 1)..Self::slot(n), Self::slot(i));
        node::set_entry_count(data, n - 1);
        node::set_total_free(data, node::total_free(data) + size + SLOT_SIZE);

        let low_water = (0..n - 1)
            .map(|j| self.entry_offset(data, j))
            .min()
            .unwrap_or(data.len());
        node::set_compact_free(data, low_water - Self::slot(n - 1));
    }

    pub(super) fn capacity(&self, data: &[u8], size: usize) -> Capacity {
        let need = size + SLOT_SIZE;
        if Self::compact_free(data) >= need {
            Capacity::CanFit
        } else if node::total_free(data) >= need {
            Capacity::CanFitWithCompaction
        } else {
            Capacity::CanNotFit
        }
    }

    pub(super) fn compact_node(&self, src: &[u8], dst: &mut [u8]) {
        self.copy_range(src, dst, 0..node::entry_count(src));
        node::set_right_sibling(dst, node::right_sibling(src));
    }

    /// Reset `dst` and append `src`'s entries in `range`.
    fn copy_range(&self, src: &[u8], dst: &mut [u8], range: std::ops::Range<usize>) {
        self.clear_node(dst, node::height(src));
        for (j, i) in range.enumerate() {
            let record = self.entry(src, i);
            self.allocate_entry(dst, j, record.len())
                .copy_from_slice(record);
        }
    }

    pub(super) fn move_upper(&self, left: &mut [u8], right: &mut [u8], left_n: usize) {
        let n = node::entry_count(left);
        self.copy_range(left, right, left_n..n);

        let mut scratch = vec![0u8; left.len()];
        self.copy_range(left, &mut scratch, 0..left_n);
        node::set_right_sibling(&mut scratch, node::right_sibling(left));
        left.copy_from_slice(&scratch);
    }
}

#[cfg(test)]
mod tests {
    use crate::index::btree::accessor::{Capacity, NodeAccessor};
    use crate::index::btree::node;
    use crate::tuple::{DatumRef, FieldDescriptor, FieldType, TupleDescriptor};

    fn accessor() -> NodeAccessor {
        NodeAccessor::leaf(
            &TupleDescriptor::new(vec![FieldDescriptor::new(FieldType::Varchar(64))]),
            &[0],
        )
    }

    fn record(accessor: &NodeAccessor, s: &str) -> Vec<u8> {
        accessor
            .shape()
            .tuple()
            .marshal(&[DatumRef::Bytes(s.as_bytes())])
            .unwrap()
    }

    fn strings(accessor: &NodeAccessor, data: &[u8]) -> Vec<String> {
        (0..node::entry_count(data))
            .map(|i| match accessor.key(data, i)[0] {
                DatumRef::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_free_space_accounting() {
        let accessor = accessor();
        let mut data = vec![0u8; 256];
        accessor.clear_node(&mut data, 0);
        let empty = node::total_free(&data);

        let a = record(&accessor, "alpha");
        let b = record(&accessor, "bravo");
        accessor.insert_entry(&mut data, 0, &b);
        accessor.insert_entry(&mut data, 0, &a);
        assert_eq!(strings(&accessor, &data), ["alpha", "bravo"]);

        let used = a.len() + b.len() + 4;
        assert_eq!(node::total_free(&data), empty - used);
        assert_eq!(node::compact_free(&data), Some(empty - used));

        // "bravo" was written first, at the top of the page; removing it
        // leaves a hole above "alpha" that only compaction recovers.
        accessor.deallocate_entry(&mut data, 1);
        assert_eq!(node::total_free(&data), empty - a.len() - 2);
        assert_eq!(node::compact_free(&data), Some(empty - a.len() - b.len() - 2));
    }

    #[test]
    fn test_compaction_recovers_holes() {
        let accessor = accessor();
        let mut data = vec![0u8; 160];
        accessor.clear_node(&mut data, 0);

        let mut i = 0;
        loop {
            let r = record(&accessor, &format!("entry-{i:02}"));
            if accessor.capacity(&data, r.len()) != Capacity::CanFit {
                break;
            }
            accessor.insert_entry(&mut data, i, &r);
            i += 1;
        }
        let n = node::entry_count(&data);
        assert!(n >= 4);

        // The first entries sit at the top of the page, away from the gap.
        accessor.deallocate_entry(&mut data, 0);
        accessor.deallocate_entry(&mut data, 0);
        let r = record(&accessor, "entry-99");
        assert_eq!(
            accessor.capacity(&data, r.len()),
            Capacity::CanFitWithCompaction
        );

        accessor.compact_in_place(&mut data);
        assert_eq!(accessor.capacity(&data, r.len()), Capacity::CanFit);
        assert_eq!(node::compact_free(&data).unwrap(), node::total_free(&data));
        let kept = strings(&accessor, &data);
        assert_eq!(kept.len(), n - 2);
        assert!(kept.windows(2).all(|w| w[0] < w[1]));
    }
}
