//! B-tree node header.
//!
//! # Layout
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ magic (8) │ right sibling (8) │ entries (4) │ height (4)     │
//! │ total free (4) │ compact free (4) │ entry region ...         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//! All fields are little-endian. Height 0 is a leaf. The entry region's
//! layout belongs to the node accessor; fixed-width nodes never fragment and
//! store [`UNMAINTAINED`] as their compact free count.

use crate::common::codec::{read_u32, read_u64, write_u32, write_u64};
use crate::common::PageId;

/// Identifies a page as a B-tree node ("PGTRNODE").
pub const NODE_MAGIC: u64 = 0x4544_4F4E_5254_4750;

pub const NODE_HEADER_SIZE: usize = 32;

/// Compact free count of nodes that never fragment.
pub const UNMAINTAINED: u32 = u32::MAX;

const MAGIC_OFFSET: usize = 0;
const SIBLING_OFFSET: usize = 8;
const ENTRIES_OFFSET: usize = 16;
const HEIGHT_OFFSET: usize = 20;
const TOTAL_FREE_OFFSET: usize = 24;
const COMPACT_FREE_OFFSET: usize = 28;

/// Write a fresh header for an empty node.
///
/// `compact_free` is `None` for layouts that never fragment.
pub(crate) fn init(data: &mut [u8], height: u32, free: usize, compact_free: Option<usize>) {
    data[..NODE_HEADER_SIZE].fill(0);
    write_u64(data, MAGIC_OFFSET, NODE_MAGIC);
    write_u64(data, SIBLING_OFFSET, PageId::NULL.0);
    write_u32(data, HEIGHT_OFFSET, height);
    write_u32(data, TOTAL_FREE_OFFSET, free as u32);
    write_u32(
        data,
        COMPACT_FREE_OFFSET,
        compact_free.map_or(UNMAINTAINED, |free| free as u32),
    );
}

#[inline]
pub fn magic(data: &[u8]) -> u64 {
    read_u64(data, MAGIC_OFFSET)
}

#[inline]
pub fn is_node(data: &[u8]) -> bool {
    magic(data) == NODE_MAGIC
}

#[inline]
pub fn right_sibling(data: &[u8]) -> PageId {
    PageId(read_u64(data, SIBLING_OFFSET))
}

#[inline]
pub(crate) fn set_right_sibling(data: &mut [u8], sibling: PageId) {
    write_u64(data, SIBLING_OFFSET, sibling.0);
}

#[inline]
pub fn entry_count(data: &[u8]) -> usize {
    read_u32(data, ENTRIES_OFFSET) as usize
}

#[inline]
pub(crate) fn set_entry_count(data: &mut [u8], n: usize) {
    write_u32(data, ENTRIES_OFFSET, n as u32);
}

#[inline]
pub fn height(data: &[u8]) -> u32 {
    read_u32(data, HEIGHT_OFFSET)
}

#[inline]
pub fn is_leaf(data: &[u8]) -> bool {
    height(data) == 0
}

#[inline]
pub fn total_free(data: &[u8]) -> usize {
    read_u32(data, TOTAL_FREE_OFFSET) as usize
}

#[inline]
pub(crate) fn set_total_free(data: &mut [u8], free: usize) {
    write_u32(data, TOTAL_FREE_OFFSET, free as u32);
}

/// Contiguous free bytes, or `None` for nodes that do not track it.
#[inline]
pub fn compact_free(data: &[u8]) -> Option<usize> {
    match read_u32(data, COMPACT_FREE_OFFSET) {
        UNMAINTAINED => None,
        free => Some(free as usize),
    }
}

#[inline]
pub(crate) fn set_compact_free(data: &mut [u8], free: usize) {
    write_u32(data, COMPACT_FREE_OFFSET, free as u32);
}

/// Number of entries whose keys are authoritative.
///
/// The last key of a rightmost non-leaf node stands for +infinity; its child
/// pointer is still used.
#[inline]
pub fn key_count(data: &[u8]) -> usize {
    let n = entry_count(data);
    if !is_leaf(data) && right_sibling(data).is_null() {
        n.saturating_sub(1)
    } else {
        n
    }
}
