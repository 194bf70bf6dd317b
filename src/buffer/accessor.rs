//! Cache accessors.
//!
//! Index code talks to the cache through [`CacheAccessor`] so that a
//! [`QuotaCacheAccessor`] can bound how many pages one caller keeps locked.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::buffer::{Cache, LockMode, PageGuard};
use crate::common::{Error, PageId, PageOwnerId, Result};

/// Page-level access to a [`Cache`].
pub trait CacheAccessor: Send + Sync {
    /// The underlying cache.
    fn cache(&self) -> &Cache;

    /// Pin and latch `page_id`, reading it from disk if needed.
    fn lock_page(&self, page_id: PageId, mode: LockMode) -> Result<PageGuard<'_>>;

    /// Allocate a zeroed page stamped with `owner`, returned exclusively
    /// locked.
    fn new_page(&self, owner: PageOwnerId) -> Result<PageGuard<'_>>;

    /// Allocate a page and release it immediately.
    fn allocate_page(&self, owner: PageOwnerId) -> Result<PageId> {
        let page = self.new_page(owner)?;
        Ok(page.page_id())
    }

    /// Drop the page from the cache and return its id to the free list. The
    /// page must not be locked.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Drop the page from the cache without writing it.
    fn discard_page(&self, page_id: PageId) -> Result<()>;

    /// Write a locked page's current content.
    fn flush_page(&self, page: &mut PageGuard<'_>, async_write: bool) -> Result<()>;

    /// Hint that `page` is unlikely to be revisited soon.
    fn nice_page(&self, page: &PageGuard<'_>);

    fn set_max_locked_pages(&self, max: usize);

    fn max_locked_pages(&self) -> usize;

    /// Working-set size used to pick node-level algorithms.
    fn processor_cache_bytes(&self) -> usize;
}

/// A [`CacheAccessor`] that fails page locks once `max_locked_pages` pages
/// are held through it.
///
/// # Example
/// ```
/// use pagetree::buffer::{Cache, CacheAccessor, LockMode, QuotaCacheAccessor};
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::storage::DiskManager;
///
/// let dir = tempfile::tempdir().unwrap();
/// let dm = DiskManager::create(dir.path().join("quota.db")).unwrap();
/// let cache = Cache::new(CacheConfig::with_pool_size(8), dm).unwrap();
/// let quota = QuotaCacheAccessor::new(&cache, 1);
///
/// let page_id = cache.allocate_page(PageOwnerId::ANON).unwrap();
/// let held = quota.lock_page(page_id, LockMode::Shared).unwrap();
/// assert!(quota.lock_page(page_id, LockMode::Shared).is_err());
/// drop(held);
/// assert!(quota.lock_page(page_id, LockMode::Shared).is_ok());
/// ```
pub struct QuotaCacheAccessor<'c> {
    cache: &'c Cache,
    max_locked: AtomicUsize,
    locked: AtomicUsize,
}

impl<'c> QuotaCacheAccessor<'c> {
    pub fn new(cache: &'c Cache, max_locked: usize) -> Self {
        Self {
            cache,
            max_locked: AtomicUsize::new(max_locked),
            locked: AtomicUsize::new(0),
        }
    }

    /// Pages currently locked through this accessor.
    pub fn locked_pages(&self) -> usize {
        self.locked.load(Ordering::Acquire)
    }

    fn reserve(&self) -> Result<()> {
        let max = self.max_locked.load(Ordering::Acquire);
        self.locked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                debug!(target: "pagetree::cache", max, "lock quota exceeded");
                Error::LockQuotaExceeded(max)
            })
    }

    fn charge<'a>(&'a self, acquired: Result<PageGuard<'a>>) -> Result<PageGuard<'a>> {
        match acquired {
            Ok(page) => Ok(page.charge_quota(&self.locked)),
            Err(e) => {
                self.locked.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }
}

impl CacheAccessor for QuotaCacheAccessor<'_> {
    fn cache(&self) -> &Cache {
        self.cache
    }

    fn lock_page(&self, page_id: PageId, mode: LockMode) -> Result<PageGuard<'_>> {
        self.reserve()?;
        self.charge(self.cache.lock_page(page_id, mode))
    }

    fn new_page(&self, owner: PageOwnerId) -> Result<PageGuard<'_>> {
        self.reserve()?;
        self.charge(self.cache.new_page(owner))
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.cache.deallocate_page(page_id)
    }

    fn discard_page(&self, page_id: PageId) -> Result<()> {
        self.cache.discard_page(page_id)
    }

    fn flush_page(&self, page: &mut PageGuard<'_>, async_write: bool) -> Result<()> {
        self.cache.flush_page(page, async_write)
    }

    fn nice_page(&self, page: &PageGuard<'_>) {
        self.cache.nice_page(page)
    }

    fn set_max_locked_pages(&self, max: usize) {
        self.max_locked.store(max, Ordering::Release);
    }

    fn max_locked_pages(&self) -> usize {
        self.max_locked.load(Ordering::Acquire)
    }

    fn processor_cache_bytes(&self) -> usize {
        self.cache.processor_cache_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::CacheConfig;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn create_test_cache() -> (Cache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        (Cache::new(CacheConfig::with_pool_size(8), dm).unwrap(), dir)
    }

    #[test]
    fn test_quota_counts_new_and_locked_pages() {
        let (cache, _dir) = create_test_cache();
        let quota = QuotaCacheAccessor::new(&cache, 2);

        let a = quota.new_page(PageOwnerId::ANON).unwrap();
        assert_eq!(quota.locked_pages(), 1);

        let other = cache.allocate_page(PageOwnerId::ANON).unwrap();
        let _c = quota.lock_page(other, LockMode::Shared).unwrap();
        assert_eq!(quota.locked_pages(), 2);
        assert!(matches!(
            quota.lock_page(other, LockMode::Shared),
            Err(Error::LockQuotaExceeded(2))
        ));

        drop(a);
        assert_eq!(quota.locked_pages(), 1);
    }

    #[test]
    fn test_failed_lock_returns_reservation() {
        let (cache, _dir) = create_test_cache();
        let quota = QuotaCacheAccessor::new(&cache, 1);

        assert!(quota.lock_page(PageId::new(99), LockMode::Shared).is_err());
        assert_eq!(quota.locked_pages(), 0);
    }

    #[test]
    fn test_raise_quota() {
        let (cache, _dir) = create_test_cache();
        let quota = QuotaCacheAccessor::new(&cache, 0);
        assert!(quota.new_page(PageOwnerId::ANON).is_err());

        quota.set_max_locked_pages(1);
        assert_eq!(quota.max_locked_pages(), 1);
        assert!(quota.new_page(PageOwnerId::ANON).is_ok());
    }
}
