//! Storage layer - disk I/O, page formats and segment access.
//!
//! - [`DiskManager`] - Low-level file I/O and page id allocation
//! - [`page`] - Page and footer layout
//! - [`SegmentAccessor`] - Allocation and successor links on top of the cache

mod disk_manager;
pub mod page;
mod segment;

pub use disk_manager::DiskManager;
pub use segment::SegmentAccessor;
