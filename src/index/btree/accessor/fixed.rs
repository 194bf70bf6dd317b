//! Fixed-width node layout: entries packed contiguously after the header.

use super::{Capacity, RecordShape};
use crate::index::btree::node::{self, NODE_HEADER_SIZE};

#[derive(Debug, Clone)]
pub struct FixedNodeAccessor {
    pub(super) shape: RecordShape,
    size: usize,
}

impl FixedNodeAccessor {
    pub(super) fn new(shape: RecordShape) -> Self {
        let size = shape.tuple.fixed_size().unwrap_or(0);
        Self { shape, size }
    }

    #[inline]
    pub fn entry_size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(super) fn entry_offset(&self, i: usize) -> usize {
        NODE_HEADER_SIZE + i * self.size
    }

    pub(super) fn clear_node(&self, data: &mut [u8], height: u32) {
        let free = data.len() - NODE_HEADER_SIZE;
        node::init(data, height, free, None);
    }

    #[inline]
    pub(super) fn entry<'a>(&self, data: &'a [u8], i: usize) -> &'a [u8] {
        let offset = self.entry_offset(i);
        &data[offset..offset + self.size]
    }

    pub(super) fn allocate_entry<'a>(
        &self,
        data: &'a mut [u8],
        i: usize,
        size: usize,
    ) -> &'a mut [u8] {
        debug_assert_eq!(size, self.size);
        let n = node::entry_count(data);
        assert!(i <= n, "entry index {i} out of range for {n} entries");
        assert!(node::total_free(data) >= self.size, "node is full");

        let start = self.entry_offset(i);
        data.copy_within(start..self.entry_offset(n), start + self.size);
        node::set_entry_count(data, n + 1);
        node::set_total_free(data, node::total_free(data) - self.size);
        &mut data[start..start + self.size]
    }

    pub(super) fn deallocate_entry(&self, data: &mut [u8], i: usize) {
        let n = node::entry_count(data);
        assert!(i < n, "entry index {i} out of range for {n} entries");

        let start = self.entry_offset(i);
        data.copy_within(start + self.size..self.entry_offset(n), start);
        node::set_entry_count(data, n - 1);
        node::set_total_free(data, node::total_free(data) + self.size);
    }

    pub(super) fn capacity(&self, data: &[u8], size: usize) -> Capacity {
        if node::total_free(data) >= size {
            Capacity::CanFit
        } else {
            Capacity::CanNotFit
        }
    }

    pub(super) fn move_upper(&self, left: &mut [u8], right: &mut [u8], left_n: usize) {
        let n = node::entry_count(left);
        let moved = n - left_n;
        self.clear_node(right, node::height(left));

        let src = self.entry_offset(left_n)..self.entry_offset(n);
        let dst = self.entry_offset(0);
        right[dst..dst + src.len()].copy_from_slice(&left[src]);
        node::set_entry_count(right, moved);
        node::set_total_free(right, node::total_free(right) - moved * self.size);

        node::set_entry_count(left, left_n);
        node::set_total_free(left, node::total_free(left) + moved * self.size);
    }
}
