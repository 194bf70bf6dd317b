//! Page - the fundamental 4KB unit of storage.
//!
//! A [`Page`] is a raw 4KB byte array and the unit of I/O between disk and
//! the cache. The first [`USABLE_PAGE_SIZE`] bytes belong to the page owner;
//! the rest is the [`PageFooter`].

use crate::common::config::{PAGE_SIZE, USABLE_PAGE_SIZE};
use crate::common::{PageId, PageOwnerId};

use super::page_footer::PageFooter;

/// A page of data (4KB, 4KB-aligned).
///
/// `Page` does not implement `Clone` outside tests; copies go through
/// [`Page::copy_from`] so that 4KB moves stay visible.
///
/// # Example
/// ```
/// use pagetree::storage::page::Page;
///
/// let mut page = Page::new();
/// page.usable_mut()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert!(page.successor().is_null());
/// ```
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a zeroed page with a default footer (NULL successor).
    pub fn new() -> Self {
        let mut page = Self {
            data: [0u8; PAGE_SIZE],
        };
        page.set_footer(&PageFooter::default());
        page
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The owner's region of the page.
    #[inline]
    pub fn usable(&self) -> &[u8] {
        &self.data[..USABLE_PAGE_SIZE]
    }

    #[inline]
    pub fn usable_mut(&mut self) -> &mut [u8] {
        &mut self.data[..USABLE_PAGE_SIZE]
    }

    /// Zero the page and stamp a fresh footer for `owner`.
    pub fn reset(&mut self, owner: PageOwnerId) {
        self.data.fill(0);
        self.set_footer(&PageFooter::new(owner));
    }

    pub fn copy_from(&mut self, other: &Page) {
        self.data.copy_from_slice(&other.data);
    }

    pub fn footer(&self) -> PageFooter {
        PageFooter::from_bytes(&self.data)
    }

    pub fn set_footer(&mut self, footer: &PageFooter) {
        footer.write_to(&mut self.data);
    }

    #[inline]
    pub fn successor(&self) -> PageId {
        self.footer().successor
    }

    pub fn set_successor(&mut self, successor: PageId) {
        let mut footer = self.footer();
        footer.successor = successor;
        self.set_footer(&footer);
    }

    #[inline]
    pub fn owner(&self) -> PageOwnerId {
        self.footer().owner
    }

    /// Compute and store the checksum. Call after all modifications.
    pub fn update_checksum(&mut self) {
        let mut footer = self.footer();
        footer.checksum = PageFooter::compute_checksum(&self.data);
        self.set_footer(&footer);
    }

    pub fn verify_checksum(&self) -> bool {
        self.footer().verify_checksum(&self.data)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new();
        new_page.copy_from(self);
        new_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_and_alignment() {
        assert_eq!(std::mem::size_of::<Page>(), PAGE_SIZE);
        assert_eq!(std::mem::align_of::<Page>(), 4096);
    }

    #[test]
    fn test_usable_region_excludes_footer() {
        let mut page = Page::new();
        assert_eq!(page.usable().len(), USABLE_PAGE_SIZE);

        page.usable_mut().fill(0xAB);
        assert!(page.successor().is_null());
        assert_eq!(page.owner(), PageOwnerId::ANON);
    }

    #[test]
    fn test_reset_stamps_owner() {
        let mut page = Page::new();
        page.usable_mut()[5] = 9;
        page.set_successor(PageId::new(3));

        page.reset(PageOwnerId(12));

        assert_eq!(page.usable()[5], 0);
        assert!(page.successor().is_null());
        assert_eq!(page.owner(), PageOwnerId(12));
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut page = Page::new();
        page.usable_mut()[0] = 0x42;
        page.update_checksum();
        assert!(page.verify_checksum());

        page.usable_mut()[1] = 0x43;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_copy_from() {
        let mut a = Page::new();
        a.usable_mut()[7] = 7;
        a.set_successor(PageId::new(8));

        let b = a.clone();
        assert_eq!(b.usable()[7], 7);
        assert_eq!(b.successor(), PageId::new(8));
    }
}
