//! RAII guard for a locked page.
//!
//! A [`PageGuard`] pins a page in the cache and holds its latch in one of
//! three [`LockMode`]s. Dropping the guard releases the latch, marks the page
//! dirty if it was written through the guard, and unpins it.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, PageOwnerId};
use crate::storage::page::Page;

use super::cache::Cache;

/// How a page is latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Any number of readers.
    Shared,
    /// Coexists with readers but excludes other upgradable and exclusive
    /// holders; can be upgraded in place once the readers drain.
    Upgradable,
    Exclusive,
}

enum Latch<'a> {
    Shared(RwLockReadGuard<'a, Page>),
    Upgradable(RwLockUpgradableReadGuard<'a, Page>),
    Exclusive(RwLockWriteGuard<'a, Page>),
    Released,
}

/// A pinned and latched page.
///
/// Reads go through `Deref<Target = Page>`; writes need an exclusive latch
/// and go through [`PageGuard::page_mut`] or [`PageGuard::data_mut`], which
/// also schedule the page to be marked dirty on release.
///
/// # Example
/// ```
/// use pagetree::buffer::{Cache, CacheAccessor, LockMode};
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::storage::DiskManager;
///
/// let dir = tempfile::tempdir().unwrap();
/// let dm = DiskManager::create(dir.path().join("doc.db")).unwrap();
/// let cache = Cache::new(CacheConfig::with_pool_size(4), dm).unwrap();
///
/// let page_id = {
///     let mut page = cache.new_page(PageOwnerId::ANON).unwrap();
///     page.data_mut()[0] = 7;
///     page.page_id()
/// };
/// let page = cache.lock_page(page_id, LockMode::Shared).unwrap();
/// assert_eq!(page.data()[0], 7);
/// ```
pub struct PageGuard<'a> {
    cache: &'a Cache,
    frame_id: FrameId,
    page_id: PageId,
    latch: Latch<'a>,
    dirtied: bool,
    quota: Option<&'a AtomicUsize>,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn shared(
        cache: &'a Cache,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self::with_latch(cache, frame_id, page_id, Latch::Shared(latch))
    }

    pub(crate) fn upgradable(
        cache: &'a Cache,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockUpgradableReadGuard<'a, Page>,
    ) -> Self {
        Self::with_latch(cache, frame_id, page_id, Latch::Upgradable(latch))
    }

    pub(crate) fn exclusive(
        cache: &'a Cache,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self::with_latch(cache, frame_id, page_id, Latch::Exclusive(latch))
    }

    fn with_latch(cache: &'a Cache, frame_id: FrameId, page_id: PageId, latch: Latch<'a>) -> Self {
        Self {
            cache,
            frame_id,
            page_id,
            latch,
            dirtied: false,
            quota: None,
        }
    }

    /// Charge this guard against a locked-page counter, released on drop.
    pub(crate) fn charge_quota(mut self, counter: &'a AtomicUsize) -> Self {
        self.quota = Some(counter);
        self
    }

    /// Schedule the page to be marked dirty on release without writing to it.
    pub(crate) fn set_dirtied(&mut self) {
        self.dirtied = true;
    }

    pub(crate) fn is_dirtied(&self) -> bool {
        self.dirtied
    }

    pub(crate) fn clear_dirtied(&mut self) {
        self.dirtied = false;
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn mode(&self) -> LockMode {
        match self.latch {
            Latch::Shared(_) => LockMode::Shared,
            Latch::Upgradable(_) => LockMode::Upgradable,
            Latch::Exclusive(_) | Latch::Released => LockMode::Exclusive,
        }
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        matches!(self.latch, Latch::Exclusive(_))
    }

    /// Mutable access to the whole page.
    ///
    /// # Panics
    /// Panics if the page is not latched exclusively.
    pub fn page_mut(&mut self) -> &mut Page {
        match &mut self.latch {
            Latch::Exclusive(page) => {
                self.dirtied = true;
                &mut **page
            }
            _ => panic!("{} written without an exclusive lock", self.page_id),
        }
    }

    /// The owner's region of the page.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.usable()
    }

    /// # Panics
    /// Panics if the page is not latched exclusively.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.page_mut().usable_mut()
    }

    #[inline]
    pub fn owner(&self) -> PageOwnerId {
        Deref::deref(self).owner()
    }

    #[inline]
    pub fn successor(&self) -> PageId {
        Deref::deref(self).successor()
    }

    pub fn set_successor(&mut self, successor: PageId) {
        self.page_mut().set_successor(successor);
    }

    /// Upgrade an upgradable latch to exclusive without blocking.
    ///
    /// Returns `true` if the guard is now exclusive. Shared guards never
    /// upgrade; exclusive guards trivially succeed.
    pub fn try_upgrade(&mut self) -> bool {
        match std::mem::replace(&mut self.latch, Latch::Released) {
            Latch::Upgradable(guard) => match RwLockUpgradableReadGuard::try_upgrade(guard) {
                Ok(write) => {
                    self.latch = Latch::Exclusive(write);
                    true
                }
                Err(guard) => {
                    self.latch = Latch::Upgradable(guard);
                    false
                }
            },
            Latch::Exclusive(write) => {
                self.latch = Latch::Exclusive(write);
                true
            }
            other => {
                self.latch = other;
                false
            }
        }
    }

    /// Exchange the usable regions of two exclusively latched pages. Footers
    /// (successor and owner) stay with their pages.
    ///
    /// # Panics
    /// Panics if either page is not latched exclusively.
    pub fn swap_data(&mut self, other: &mut PageGuard<'_>) {
        self.data_mut().swap_with_slice(other.data_mut());
    }

    /// Ask the cache to prefer this page as a victim.
    pub fn nice(&self) {
        self.cache.nice_frame(self.frame_id);
    }
}

impl Deref for PageGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        match &self.latch {
            Latch::Shared(page) => &**page,
            Latch::Upgradable(page) => &**page,
            Latch::Exclusive(page) => &**page,
            Latch::Released => unreachable!("page guard used after release"),
        }
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .field("mode", &self.mode())
            .finish()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.latch = Latch::Released;
        self.cache.release_frame(self.frame_id, self.dirtied);
        if let Some(counter) = self.quota {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
