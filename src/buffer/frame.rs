//! Frame - a slot in the cache.
//!
//! A [`Frame`] holds a [`Page`] plus the metadata the cache needs:
//! - Which page is mapped (if any)
//! - Pin count for reference counting
//! - Dirty flag for write-back tracking
//!
//! The page latch itself is the frame's `RwLock`; page guards hold one of its
//! shared, upgradable or exclusive guards for as long as the page is locked.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::common::PageId;
use crate::storage::page::Page;

/// A frame in the cache.
///
/// # Thread Safety
/// - `latch`: `RwLock` for page content; doubles as the page lock
/// - `page_id`: `Mutex`, changed only while the frame is unreachable or
///   under the cache's page-table write lock
/// - `pin_count`: `AtomicU32`; a pinned frame is never remapped
/// - `is_dirty`: `AtomicBool`; set before the pin that dirtied it is released
pub struct Frame {
    latch: RwLock<Page>,
    page_id: Mutex<Option<PageId>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new empty frame.
    pub fn new() -> Self {
        Self {
            latch: RwLock::new(Page::new()),
            page_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Page latch
    // ========================================================================

    /// The page latch. Callers must hold a pin while latched.
    #[inline]
    pub(crate) fn latch(&self) -> &RwLock<Page> {
        &self.latch
    }

    // ========================================================================
    // Page ID management
    // ========================================================================

    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    #[inline]
    pub(crate) fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.lock() = page_id;
    }

    // ========================================================================
    // Pin count operations
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty flag operations
    // ========================================================================

    /// Mark the frame dirty. Returns `true` if it was clean before.
    #[inline]
    pub fn mark_dirty(&self) -> bool {
        !self.is_dirty.swap(true, Ordering::AcqRel)
    }

    /// Clear the dirty flag. Returns `true` if it was dirty before.
    #[inline]
    pub fn clear_dirty(&self) -> bool {
        self.is_dirty.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    // ========================================================================
    // Frame state queries
    // ========================================================================

    /// Check if the frame is empty (no page mapped).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    /// A mapped, unpinned, clean frame can be reclaimed without I/O.
    #[inline]
    pub fn is_reclaimable(&self) -> bool {
        !self.is_empty() && !self.is_pinned() && !self.is_dirty()
    }

    /// Forget the mapping. The page content is left as is; the next mapping
    /// overwrites it.
    pub(crate) fn clear_mapping(&self) {
        self.set_page_id(None);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
