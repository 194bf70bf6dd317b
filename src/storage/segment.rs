//! Segment accessor - page allocation and successor links for one client.
//!
//! Every page carries a successor link in its footer. Index structures keep
//! their sibling chains there too, so a whole chain can be walked or freed
//! without interpreting node content.

use tracing::trace;

use crate::buffer::{CacheAccessor, LockMode, PageGuard};
use crate::common::config::USABLE_PAGE_SIZE;
use crate::common::{PageId, PageOwnerId, Result};

/// Copyable handle pairing a cache accessor with segment-level operations.
#[derive(Clone, Copy)]
pub struct SegmentAccessor<'c> {
    cache: &'c dyn CacheAccessor,
}

impl<'c> SegmentAccessor<'c> {
    pub fn new(cache: &'c dyn CacheAccessor) -> Self {
        Self { cache }
    }

    #[inline]
    pub fn cache(&self) -> &'c dyn CacheAccessor {
        self.cache
    }

    /// Bytes of each page available to the owner.
    #[inline]
    pub fn usable_page_size(&self) -> usize {
        USABLE_PAGE_SIZE
    }

    pub fn lock_page(&self, page_id: PageId, mode: LockMode) -> Result<PageGuard<'c>> {
        self.cache.lock_page(page_id, mode)
    }

    /// Allocate a zeroed page, returned exclusively locked.
    pub fn new_page(&self, owner: PageOwnerId) -> Result<PageGuard<'c>> {
        self.cache.new_page(owner)
    }

    pub fn allocate_page(&self, owner: PageOwnerId) -> Result<PageId> {
        self.cache.allocate_page(owner)
    }

    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.cache.deallocate_page(page_id)
    }

    /// Free `first` and every page reachable through its successor links.
    ///
    /// Returns the number of pages freed.
    pub fn deallocate_page_range(&self, first: PageId) -> Result<usize> {
        let mut page_id = first;
        let mut freed = 0;
        while page_id.is_valid() {
            let successor = self.get_page_successor(page_id)?;
            self.cache.deallocate_page(page_id)?;
            freed += 1;
            page_id = successor;
        }
        trace!(target: "pagetree::segment", first = first.0, freed, "page range freed");
        Ok(freed)
    }

    pub fn get_page_successor(&self, page_id: PageId) -> Result<PageId> {
        let page = self.cache.lock_page(page_id, LockMode::Shared)?;
        Ok(page.successor())
    }

    pub fn set_page_successor(&self, page_id: PageId, successor: PageId) -> Result<()> {
        let mut page = self.cache.lock_page(page_id, LockMode::Exclusive)?;
        page.set_successor(successor);
        Ok(())
    }
}

impl std::fmt::Debug for SegmentAccessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentAccessor")
            .field("usable_page_size", &self.usable_page_size())
            .finish()
    }
}
