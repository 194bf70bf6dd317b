//! Disk Manager - page-sized block storage keyed by page id.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Allocating pages (reusing deallocated ids first)
//! - Syncing the database file

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::trace;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// ```
///
/// Page N is located at file offset `N × PAGE_SIZE`.
///
/// # Thread Safety
/// `DiskManager` is single-threaded; the [`Cache`](crate::buffer::Cache)
/// serializes access to it.
///
/// # Durability
/// Writes go to the OS page cache. [`DiskManager::sync`] forces them out and
/// is called by [`Cache::flush_all_pages`](crate::buffer::Cache::flush_all_pages).
///
/// The free list of deallocated ids lives in memory only; a reopened file
/// starts with every page in use.
pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u64,
    /// Deallocated ids, reused LIFO.
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_count: 0,
            free_pages: Vec::new(),
        })
    }

    /// Open an existing database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let page_count = file.metadata()?.len() / PAGE_SIZE as u64;

        Ok(Self {
            file,
            page_count,
            free_pages: Vec::new(),
        })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page from disk into `page`.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page was never allocated.
    pub fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        self.check_bounds(page_id)?;

        self.file.seek(SeekFrom::Start(Self::offset(page_id)))?;
        self.file.read_exact(page.as_mut_slice())?;
        Ok(())
    }

    /// Write a page to disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page was never allocated.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.check_bounds(page_id)?;

        self.file.seek(SeekFrom::Start(Self::offset(page_id)))?;
        self.file.write_all(page.as_slice())?;
        Ok(())
    }

    /// Allocate a page, reusing a deallocated id if one is available.
    ///
    /// A fresh page extends the file with an empty page image.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.pop() {
            trace!(target: "pagetree::disk", page = page_id.0, "reusing page");
            return Ok(page_id);
        }

        let page_id = PageId::new(self.page_count);
        self.file.seek(SeekFrom::Start(Self::offset(page_id)))?;
        self.file.write_all(Page::new().as_slice())?;

        self.page_count += 1;
        Ok(page_id)
    }

    /// Return a page id to the free list.
    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.check_bounds(page_id)?;
        debug_assert!(
            !self.free_pages.contains(&page_id),
            "double deallocation of {page_id}"
        );
        self.free_pages.push(page_id);
        Ok(())
    }

    /// Force written pages to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Number of pages in the file, allocated or free.
    #[inline]
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Number of pages currently handed out.
    #[inline]
    pub fn allocated_page_count(&self) -> u64 {
        self.page_count - self.free_pages.len() as u64
    }

    #[inline]
    pub fn file_size(&self) -> u64 {
        self.page_count * PAGE_SIZE as u64
    }

    fn check_bounds(&self, page_id: PageId) -> Result<()> {
        if page_id.is_null() {
            return Err(Error::InvalidPageId(page_id));
        }
        if page_id.0 >= self.page_count {
            return Err(Error::PageNotFound(page_id));
        }
        Ok(())
    }

    #[inline]
    fn offset(page_id: PageId) -> u64 {
        page_id.0 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_dm() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        DiskManager::create(&path).unwrap();
        assert!(DiskManager::create(&path).is_err());
        assert!(DiskManager::open(dir.path().join("missing.db")).is_err());
    }

    #[test]
    fn test_allocate_and_read_page() {
        let (mut dm, _dir) = create_dm();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(0));
        assert_eq!(dm.page_count(), 1);

        let mut page = Page::new();
        page.usable_mut()[0] = 0xEE;
        dm.read_page(page_id, &mut page).unwrap();
        assert_eq!(page.as_slice()[0], 0);
        assert!(page.successor().is_null());
    }

    #[test]
    fn test_write_and_read_page() {
        let (mut dm, _dir) = create_dm();
        let page_id = dm.allocate_page().unwrap();

        let mut page = Page::new();
        page.usable_mut()[0] = 0xAB;
        page.usable_mut()[100] = 0xCD;
        dm.write_page(page_id, &page).unwrap();

        let mut read_back = Page::new();
        dm.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.as_slice()[0], 0xAB);
        assert_eq!(read_back.as_slice()[100], 0xCD);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut page = Page::new();
            page.usable_mut()[0] = 0x42;
            dm.write_page(page_id, &page).unwrap();
            dm.sync().unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.page_count(), 1);
        let mut page = Page::new();
        dm.read_page(PageId::new(0), &mut page).unwrap();
        assert_eq!(page.as_slice()[0], 0x42);
    }

    #[test]
    fn test_deallocated_ids_are_reused() {
        let (mut dm, _dir) = create_dm();
        for _ in 0..3 {
            dm.allocate_page().unwrap();
        }

        dm.deallocate_page(PageId::new(1)).unwrap();
        assert_eq!(dm.allocated_page_count(), 2);

        assert_eq!(dm.allocate_page().unwrap(), PageId::new(1));
        assert_eq!(dm.allocate_page().unwrap(), PageId::new(3));
        assert_eq!(dm.allocated_page_count(), 4);
    }

    #[test]
    fn test_out_of_range_pages() {
        let (mut dm, _dir) = create_dm();
        dm.allocate_page().unwrap();

        let mut page = Page::new();
        assert!(matches!(
            dm.read_page(PageId::new(1), &mut page),
            Err(Error::PageNotFound(_))
        ));
        assert!(matches!(
            dm.write_page(PageId::NULL, &page),
            Err(Error::InvalidPageId(_))
        ));
    }
}
