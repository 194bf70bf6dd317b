//! Cache - the page caching layer.
//!
//! The [`Cache`] provides:
//! - Page caching between disk and memory
//! - Page locks in shared, upgradable and exclusive modes
//! - Pin-based reference counting
//! - Pluggable victim policies (LRU, 2Q)
//! - Dirty page write-back on victimization, on demand and by the lazy writer

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::buffer::accessor::CacheAccessor;
use crate::buffer::lazy_writer::LazyWriter;
use crate::buffer::replacer::{create_victim_policy, VictimPolicy};
use crate::buffer::{CacheStats, Frame, LockMode, PageGuard};
use crate::common::config::CacheConfig;
use crate::common::{Error, FrameId, PageId, PageOwnerId, Result};
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// Rounds of victim selection before giving up with `Error::NoFreeFrames`.
const MAX_VICTIM_ROUNDS: usize = 8;

/// Manages a pool of frames caching disk pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                           Cache                             │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │ page_table   │  │        frames: Vec<Frame>         │   │
/// │  │PageId → Fid  │─▶│  [Frame0] [Frame1] [Frame2] ...   │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │  free_list   │  │victim_policy │  │disk_manager  │      │
/// │  │ Vec<FrameId> │  │  LRU | 2Q    │  │   Mutex      │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `page_table`: `RwLock`. Pins on hits are taken under the read lock and
///   victimization re-checks the pin count under the write lock, so a page
///   is never reclaimed while pinned.
/// - `free_list`: `Mutex`
/// - `victim_policy`: internally locked; never held while taking `page_table`
/// - `disk_manager`: `Mutex`, single-threaded I/O
/// - `frames`: no lock, each [`Frame`] has internal locks
///
/// Lock order is frame latch, then `page_table`, then the policy lock.
///
/// # Usage
/// ```
/// use pagetree::buffer::{Cache, CacheAccessor, LockMode};
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::storage::DiskManager;
///
/// let dir = tempfile::tempdir().unwrap();
/// let dm = DiskManager::create(dir.path().join("cache.db")).unwrap();
/// let cache = Cache::new(CacheConfig::with_pool_size(8), dm).unwrap();
///
/// let page_id = cache.allocate_page(PageOwnerId::ANON).unwrap();
/// {
///     let mut page = cache.lock_page(page_id, LockMode::Exclusive).unwrap();
///     page.data_mut()[0] = 0xAB;
/// }
/// cache.flush_all_pages().unwrap();
/// assert_eq!(cache.stats().snapshot().dirty_pages, 0);
/// ```
pub struct Cache {
    frames: Vec<Frame>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    /// Unmapped frames, reused LIFO.
    free_list: Mutex<Vec<FrameId>>,
    victim_policy: Box<dyn VictimPolicy>,
    disk_manager: Mutex<DiskManager>,
    stats: CacheStats,
    config: CacheConfig,
}

impl Cache {
    /// Create a cache over `disk_manager`.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` if the configuration is inconsistent.
    pub fn new(config: CacheConfig, disk_manager: DiskManager) -> Result<Self> {
        config.validate()?;

        let pool_size = config.pool_size;
        let victim_policy = create_victim_policy(&config);
        victim_policy.set_allocated_page_count(pool_size);

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        for i in 0..pool_size {
            victim_policy.register_page(FrameId::new(i));
        }

        // Popped from the back, so frame 0 is handed out first.
        let free_list: Vec<FrameId> = (0..pool_size).rev().map(FrameId::new).collect();

        debug!(
            target: "pagetree::cache",
            pool_size,
            policy = victim_policy.name(),
            "cache created"
        );

        Ok(Self {
            frames,
            page_table: RwLock::new(HashMap::with_capacity(pool_size)),
            free_list: Mutex::new(free_list),
            victim_policy,
            disk_manager: Mutex::new(disk_manager),
            stats: CacheStats::new(),
            config,
        })
    }

    /// Start the background lazy writer if the configuration asks for one.
    pub fn start_lazy_writer(self: &Arc<Self>) -> Option<LazyWriter> {
        self.config
            .lazy_write_interval
            .map(|interval| LazyWriter::spawn(Arc::clone(self), interval))
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Flush a resident page to disk if it's dirty. Blocks while the page is
    /// exclusively locked, so callers must not hold its lock.
    ///
    /// # Errors
    /// - I/O errors from disk write
    pub fn flush_page_id(&self, page_id: PageId) -> Result<()> {
        let frame_id = match self.page_table.read().get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };
        self.flush_frame(frame_id, Some(page_id), true).map(|_| ())
    }

    /// Flush all dirty pages and sync the file.
    ///
    /// # Errors
    /// - I/O errors from disk writes
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<(PageId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };

        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, Some(page_id), true)?;
        }

        self.disk_manager.lock().sync()
    }

    /// One lazy writer step: write up to `lazy_write_batch` dirty pages,
    /// best victims first, skipping pages that are exclusively locked.
    ///
    /// Returns the number of pages written.
    pub fn flush_some_pages(&self) -> Result<usize> {
        CacheStats::inc(&self.stats.lazy_write_calls);

        let dirty = self.stats.snapshot().dirty_pages as usize;
        let limit = self.config.lazy_write_batch.min(dirty);
        if limit == 0 {
            return Ok(0);
        }

        let mut candidates: SmallVec<[FrameId; 16]> = SmallVec::new();
        self.victim_policy.for_each_dirty_victim(&mut |frame_id| {
            if self.frames[frame_id.0].is_dirty() {
                candidates.push(frame_id);
            }
            if candidates.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        let mut written = 0;
        for frame_id in candidates {
            if self.flush_frame(frame_id, None, false)? {
                CacheStats::inc(&self.stats.lazy_writes);
                written += 1;
            }
        }

        trace!(target: "pagetree::cache", written, "lazy write pass");
        Ok(written)
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn victim_policy_name(&self) -> &'static str {
        self.victim_policy.name()
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Number of resident pages.
    pub fn resident_page_count(&self) -> usize {
        self.page_table.read().len()
    }

    /// Number of pages handed out by the disk manager and not freed.
    pub fn allocated_page_count(&self) -> u64 {
        self.disk_manager.lock().allocated_page_count()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.page_table.read().contains_key(&page_id)
    }

    /// Pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let pt = self.page_table.read();
        pt.get(&page_id).map(|fid| self.frames[fid.0].pin_count())
    }

    /// Resident pages the cache would consider for victimization, best
    /// victim first. Pinned pages are never included.
    pub fn victim_range(&self) -> Vec<PageId> {
        let mut frames = Vec::new();
        self.victim_policy.for_each_victim(&mut |frame_id| {
            if !self.frames[frame_id.0].is_pinned() {
                frames.push(frame_id);
            }
            ControlFlow::Continue(())
        });
        frames
            .into_iter()
            .filter_map(|fid| self.frames[fid.0].page_id())
            .collect()
    }

    // ========================================================================
    // Internal: Called by PageGuard
    // ========================================================================

    /// Release one pin. `dirtied` marks the page dirty first.
    pub(crate) fn release_frame(&self, frame_id: FrameId, dirtied: bool) {
        let frame = &self.frames[frame_id.0];

        if dirtied && frame.mark_dirty() {
            self.stats.page_dirtied();
            self.victim_policy.notify_page_dirty(frame_id);
        }

        self.unpin_frame(frame_id);
    }

    /// Drop one pin, telling the policy when it was the last.
    fn unpin_frame(&self, frame_id: FrameId) {
        if self.frames[frame_id.0].unpin() == 0 {
            self.victim_policy.notify_page_unpin(frame_id);
        }
    }

    pub(crate) fn nice_frame(&self, frame_id: FrameId) {
        self.victim_policy.notify_page_nice(frame_id);
    }

    /// Write a locked page through its guard.
    pub(crate) fn write_locked_page(&self, page: &mut PageGuard<'_>) -> Result<()> {
        let frame_id = page.frame_id();
        let frame = &self.frames[frame_id.0];
        if !page.is_dirtied() && !frame.is_dirty() {
            return Ok(());
        }

        let mut image = Page::new();
        image.copy_from(&**page);
        image.update_checksum();
        self.disk_manager.lock().write_page(page.page_id(), &image)?;
        CacheStats::inc(&self.stats.pages_written);

        page.clear_dirtied();
        if frame.clear_dirty() {
            self.stats.page_cleaned();
            self.victim_policy.notify_page_clean(frame_id);
        }
        Ok(())
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Pin `page_id` into a frame, reading it from disk on a miss.
    fn pin_page(&self, page_id: PageId) -> Result<FrameId> {
        if page_id.is_null() {
            return Err(Error::InvalidPageId(page_id));
        }

        // Fast path: pin under the read lock so eviction cannot interleave.
        if let Some(frame_id) = self.pin_resident(page_id) {
            CacheStats::inc(&self.stats.cache_hits);
            self.victim_policy
                .notify_page_access(frame_id, page_id, true);
            return Ok(frame_id);
        }

        CacheStats::inc(&self.stats.cache_misses);
        let frame_id = self.get_free_frame()?;
        let frame = &self.frames[frame_id.0];

        // The frame is unreachable until published, so the latch is ours.
        {
            let mut page = frame.latch().write();
            let read = self.disk_manager.lock().read_page(page_id, &mut page);
            if let Err(e) = read {
                drop(page);
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
            if !page.verify_checksum() {
                drop(page);
                self.free_list.lock().push(frame_id);
                warn!(target: "pagetree::cache", page = page_id.0, "checksum mismatch");
                return Err(Error::ChecksumMismatch(page_id));
            }
        }
        CacheStats::inc(&self.stats.pages_read);

        frame.set_page_id(Some(page_id));
        frame.pin();

        let mut pt = self.page_table.write();
        if let Some(&existing) = pt.get(&page_id) {
            // Lost a race with another reader of the same page.
            self.frames[existing.0].pin();
            drop(pt);
            frame.clear_mapping();
            self.free_list.lock().push(frame_id);
            CacheStats::inc(&self.stats.cache_hits);
            self.victim_policy
                .notify_page_access(existing, page_id, true);
            return Ok(existing);
        }
        pt.insert(page_id, frame_id);
        self.victim_policy.notify_page_map(frame_id, page_id, true);
        drop(pt);

        trace!(target: "pagetree::cache", page = page_id.0, frame = frame_id.0, "page read");
        Ok(frame_id)
    }

    fn pin_resident(&self, page_id: PageId) -> Option<FrameId> {
        let pt = self.page_table.read();
        let frame_id = *pt.get(&page_id)?;
        self.frames[frame_id.0].pin();
        Some(frame_id)
    }

    /// Get an unmapped frame, victimizing a resident page if none is free.
    fn get_free_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }
        self.find_victim()
    }

    /// Victim selection: prefer clean unpinned pages; otherwise write back a
    /// batch of dirty candidates and scan again.
    fn find_victim(&self) -> Result<FrameId> {
        for _ in 0..MAX_VICTIM_ROUNDS {
            let mut clean = None;
            let mut dirty: SmallVec<[FrameId; 16]> = SmallVec::new();
            let batch = self.config.victim_flush_batch;

            self.victim_policy.for_each_victim(&mut |frame_id| {
                let frame = &self.frames[frame_id.0];
                if frame.is_empty() || frame.is_pinned() {
                    return ControlFlow::Continue(());
                }
                if frame.is_dirty() {
                    if dirty.len() < batch {
                        dirty.push(frame_id);
                    }
                    return ControlFlow::Continue(());
                }
                clean = Some(frame_id);
                ControlFlow::Break(())
            });

            if let Some(frame_id) = clean {
                if self.try_unmap(frame_id) {
                    return Ok(frame_id);
                }
                CacheStats::inc(&self.stats.victim_retries);
                continue;
            }

            if dirty.is_empty() {
                break;
            }
            for frame_id in dirty {
                self.flush_frame(frame_id, None, true)?;
            }
        }

        warn!(target: "pagetree::cache", "no reclaimable frame");
        Err(Error::NoFreeFrames)
    }

    /// Unmap a clean, unpinned frame. Returns `false` if it was pinned,
    /// dirtied or remapped since the scan.
    fn try_unmap(&self, frame_id: FrameId) -> bool {
        let frame = &self.frames[frame_id.0];
        let mut pt = self.page_table.write();

        let Some(page_id) = frame.page_id() else {
            return false;
        };
        if frame.is_pinned() || frame.is_dirty() {
            return false;
        }

        pt.remove(&page_id);
        frame.set_page_id(None);
        self.victim_policy
            .notify_page_unmap(frame_id, page_id, false);
        drop(pt);

        CacheStats::inc(&self.stats.victimizations);
        trace!(target: "pagetree::cache", page = page_id.0, frame = frame_id.0, "victimized");
        true
    }

    /// Write a dirty frame. With `blocking` unset, a page that cannot be
    /// latched shared right away is skipped. Returns whether it was written.
    fn flush_frame(&self, frame_id: FrameId, expected: Option<PageId>, blocking: bool) -> Result<bool> {
        let frame = &self.frames[frame_id.0];

        // Pin under the read lock so the frame keeps its page while writing.
        let page_id = {
            let _pt = self.page_table.read();
            let Some(page_id) = frame.page_id() else {
                return Ok(false);
            };
            if expected.is_some_and(|expected| expected != page_id) || !frame.is_dirty() {
                return Ok(false);
            }
            frame.pin();
            page_id
        };

        let result = self.write_frame(frame, frame_id, page_id, blocking);
        self.unpin_frame(frame_id);
        result
    }

    fn write_frame(&self, frame: &Frame, frame_id: FrameId, page_id: PageId, blocking: bool) -> Result<bool> {
        let latch = if blocking {
            frame.latch().read()
        } else {
            match frame.latch().try_read() {
                Some(latch) => latch,
                None => return Ok(false),
            }
        };
        if !frame.is_dirty() {
            return Ok(false);
        }

        let mut image = Page::new();
        image.copy_from(&latch);
        image.update_checksum();
        self.disk_manager.lock().write_page(page_id, &image)?;

        if frame.clear_dirty() {
            self.stats.page_cleaned();
            self.victim_policy.notify_page_clean(frame_id);
        }
        drop(latch);

        CacheStats::inc(&self.stats.pages_written);
        trace!(target: "pagetree::cache", page = page_id.0, "page written");
        Ok(true)
    }

    /// Drop a resident page without writing it. Absent pages are ignored.
    fn unmap_discard(&self, page_id: PageId) -> Result<()> {
        let mut pt = self.page_table.write();
        let Some(&frame_id) = pt.get(&page_id) else {
            return Ok(());
        };
        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Err(Error::PagePinned(page_id));
        }

        pt.remove(&page_id);
        if frame.is_dirty() {
            self.stats.page_cleaned();
        }
        frame.clear_mapping();
        self.victim_policy.notify_page_unmap(frame_id, page_id, true);
        drop(pt);

        self.free_list.lock().push(frame_id);
        Ok(())
    }
}

impl CacheAccessor for Cache {
    fn cache(&self) -> &Cache {
        self
    }

    /// # Errors
    /// - `Error::InvalidPageId` for `PageId::NULL`
    /// - `Error::PageNotFound` if the page doesn't exist on disk
    /// - `Error::ChecksumMismatch` if the stored image is damaged
    /// - `Error::NoFreeFrames` if every frame is pinned
    fn lock_page(&self, page_id: PageId, mode: LockMode) -> Result<PageGuard<'_>> {
        let frame_id = self.pin_page(page_id)?;
        let latch = self.frames[frame_id.0].latch();

        Ok(match mode {
            LockMode::Shared => PageGuard::shared(self, frame_id, page_id, latch.read()),
            LockMode::Upgradable => {
                PageGuard::upgradable(self, frame_id, page_id, latch.upgradable_read())
            }
            LockMode::Exclusive => PageGuard::exclusive(self, frame_id, page_id, latch.write()),
        })
    }

    /// Allocate a page on disk and map it, zeroed and exclusively locked.
    fn new_page(&self, owner: PageOwnerId) -> Result<PageGuard<'_>> {
        let page_id = self.disk_manager.lock().allocate_page()?;

        let frame_id = match self.get_free_frame() {
            Ok(frame_id) => frame_id,
            Err(e) => {
                self.disk_manager.lock().deallocate_page(page_id)?;
                return Err(e);
            }
        };
        let frame = &self.frames[frame_id.0];

        let mut latch = frame.latch().write();
        latch.reset(owner);
        frame.set_page_id(Some(page_id));
        frame.pin();

        {
            let mut pt = self.page_table.write();
            pt.insert(page_id, frame_id);
            self.victim_policy.notify_page_map(frame_id, page_id, true);
        }

        trace!(target: "pagetree::cache", page = page_id.0, owner = owner.0, "page allocated");
        let mut guard = PageGuard::exclusive(self, frame_id, page_id, latch);
        guard.set_dirtied();
        Ok(guard)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.unmap_discard(page_id)?;
        self.victim_policy.notify_page_discard(page_id);
        self.disk_manager.lock().deallocate_page(page_id)?;
        trace!(target: "pagetree::cache", page = page_id.0, "page deallocated");
        Ok(())
    }

    fn discard_page(&self, page_id: PageId) -> Result<()> {
        self.unmap_discard(page_id)
    }

    /// Writes are synchronous at the device layer, so `async_write` only
    /// documents the caller's intent.
    fn flush_page(&self, page: &mut PageGuard<'_>, _async_write: bool) -> Result<()> {
        self.write_locked_page(page)
    }

    fn nice_page(&self, page: &PageGuard<'_>) {
        self.nice_frame(page.frame_id());
    }

    /// The cache itself is bounded only by its pool size.
    fn set_max_locked_pages(&self, _max: usize) {}

    fn max_locked_pages(&self) -> usize {
        self.pool_size()
    }

    fn processor_cache_bytes(&self) -> usize {
        self.config.processor_cache_bytes
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            warn!(target: "pagetree::cache", error = %e, "flush on close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::VictimPolicyKind;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::tempdir;

    fn create_test_cache(pool_size: usize) -> (Cache, tempfile::TempDir) {
        create_test_cache_with(CacheConfig::with_pool_size(pool_size))
    }

    fn create_test_cache_with(config: CacheConfig) -> (Cache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        (Cache::new(config, dm).unwrap(), dir)
    }

    #[test]
    fn test_new_page() {
        let (cache, _dir) = create_test_cache(4);

        let page = cache.new_page(PageOwnerId(3)).unwrap();
        assert_eq!(page.page_id(), PageId::new(0));
        assert_eq!(page.owner(), PageOwnerId(3));
        assert!(page.is_exclusive());
        assert_eq!(cache.pin_count(PageId::new(0)), Some(1));
        drop(page);

        assert_eq!(cache.pin_count(PageId::new(0)), Some(0));
        assert_eq!(cache.stats().snapshot().dirty_pages, 1);
    }

    #[test]
    fn test_lock_modes() {
        let (cache, _dir) = create_test_cache(4);
        let page_id = cache.allocate_page(PageOwnerId::ANON).unwrap();

        let a = cache.lock_page(page_id, LockMode::Shared).unwrap();
        let mut b = cache.lock_page(page_id, LockMode::Upgradable).unwrap();
        assert_eq!(cache.pin_count(page_id), Some(2));

        // Upgrade waits for the reader.
        assert!(!b.try_upgrade());
        drop(a);
        assert!(b.try_upgrade());
        assert_eq!(b.mode(), LockMode::Exclusive);
        b.data_mut()[9] = 9;
        drop(b);

        let c = cache.lock_page(page_id, LockMode::Shared).unwrap();
        assert_eq!(c.data()[9], 9);
    }

    #[test]
    #[should_panic(expected = "without an exclusive lock")]
    fn test_shared_write_panics() {
        let (cache, _dir) = create_test_cache(4);
        let page_id = cache.allocate_page(PageOwnerId::ANON).unwrap();
        let mut page = cache.lock_page(page_id, LockMode::Shared).unwrap();
        page.data_mut()[0] = 1;
    }

    #[test]
    fn test_null_page_rejected() {
        let (cache, _dir) = create_test_cache(4);
        assert!(matches!(
            cache.lock_page(PageId::NULL, LockMode::Shared),
            Err(Error::InvalidPageId(_))
        ));
    }

    #[test]
    fn test_eviction_writes_back_dirty_pages() {
        let (cache, _dir) = create_test_cache(3);

        let mut ids = Vec::new();
        for i in 0..6u8 {
            let mut page = cache.new_page(PageOwnerId::ANON).unwrap();
            page.data_mut()[0] = i;
            ids.push(page.page_id());
        }
        assert_eq!(cache.resident_page_count(), 3);

        for (i, &page_id) in ids.iter().enumerate() {
            let page = cache.lock_page(page_id, LockMode::Shared).unwrap();
            assert_eq!(page.data()[0], i as u8);
        }
        assert!(cache.stats().snapshot().victimizations > 0);
        assert!(cache.stats().snapshot().pages_written >= 3);
    }

    #[test]
    fn test_no_free_frames() {
        let (cache, _dir) = create_test_cache(2);

        let _a = cache.new_page(PageOwnerId::ANON).unwrap();
        let _b = cache.new_page(PageOwnerId::ANON).unwrap();
        assert!(matches!(
            cache.new_page(PageOwnerId::ANON),
            Err(Error::NoFreeFrames)
        ));
        // The failed allocation gave its page id back.
        assert_eq!(cache.allocated_page_count(), 2);
    }

    #[test]
    fn test_deallocate_pinned_page_fails() {
        let (cache, _dir) = create_test_cache(4);
        let page = cache.new_page(PageOwnerId::ANON).unwrap();
        let page_id = page.page_id();

        assert!(matches!(
            cache.deallocate_page(page_id),
            Err(Error::PagePinned(_))
        ));
        drop(page);

        cache.deallocate_page(page_id).unwrap();
        assert!(!cache.is_resident(page_id));
        assert_eq!(cache.allocated_page_count(), 0);
        assert_eq!(cache.stats().snapshot().dirty_pages, 0);

        // The id is reused.
        let page = cache.new_page(PageOwnerId::ANON).unwrap();
        assert_eq!(page.page_id(), page_id);
    }

    #[test]
    fn test_flush_locked_page() {
        let (cache, _dir) = create_test_cache(4);
        let mut page = cache.new_page(PageOwnerId::ANON).unwrap();
        page.data_mut()[0] = 5;

        cache.flush_page(&mut page, false).unwrap();
        drop(page);

        let snapshot = cache.stats().snapshot();
        assert_eq!(snapshot.pages_written, 1);
        assert_eq!(snapshot.dirty_pages, 0);
    }

    #[test]
    fn test_flush_some_pages_respects_batch() {
        let mut config = CacheConfig::with_pool_size(16);
        config.lazy_write_batch = 3;
        let (cache, _dir) = create_test_cache_with(config);

        for _ in 0..8 {
            cache.new_page(PageOwnerId::ANON).unwrap();
        }
        assert_eq!(cache.stats().snapshot().dirty_pages, 8);

        assert_eq!(cache.flush_some_pages().unwrap(), 3);
        assert_eq!(cache.stats().snapshot().dirty_pages, 5);
        assert_eq!(cache.stats().snapshot().lazy_writes, 3);
    }

    #[test]
    fn test_flush_some_pages_skips_locked() {
        let (cache, _dir) = create_test_cache(4);
        let page = cache.new_page(PageOwnerId::ANON).unwrap();
        let page_id = page.page_id();
        drop(page);

        let _locked = cache.lock_page(page_id, LockMode::Exclusive).unwrap();
        assert_eq!(cache.flush_some_pages().unwrap(), 0);
    }

    #[test]
    fn test_pinned_pages_not_in_victim_range() {
        for policy in [VictimPolicyKind::Lru, VictimPolicyKind::TwoQ] {
            let mut config = CacheConfig::with_pool_size(8);
            config.victim_policy = policy;
            let (cache, _dir) = create_test_cache_with(config);

            let ids: Vec<PageId> = (0..4)
                .map(|_| cache.allocate_page(PageOwnerId::ANON).unwrap())
                .collect();
            let _pinned = cache.lock_page(ids[1], LockMode::Shared).unwrap();

            let range = cache.victim_range();
            assert!(!range.contains(&ids[1]), "{policy:?}");
            assert!(range.contains(&ids[0]), "{policy:?}");
        }
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let page_id = {
            let dm = DiskManager::create(&path).unwrap();
            let cache = Cache::new(CacheConfig::with_pool_size(2), dm).unwrap();
            let mut page = cache.new_page(PageOwnerId::ANON).unwrap();
            page.data_mut()[0] = 1;
            page.page_id()
        };

        // Corrupt one byte behind the cache's back.
        {
            let mut dm = DiskManager::open(&path).unwrap();
            let mut page = Page::new();
            dm.read_page(page_id, &mut page).unwrap();
            page.usable_mut()[0] = 2;
            dm.write_page(page_id, &page).unwrap();
        }

        let cache = Cache::new(CacheConfig::with_pool_size(2), DiskManager::open(&path).unwrap()).unwrap();
        assert!(matches!(
            cache.lock_page(page_id, LockMode::Shared),
            Err(Error::ChecksumMismatch(_))
        ));
        assert_eq!(cache.free_frame_count(), 2);
    }

    #[test]
    fn test_hits_and_misses() {
        let (cache, _dir) = create_test_cache(4);
        let page_id = cache.allocate_page(PageOwnerId::ANON).unwrap();
        cache.flush_all_pages().unwrap();
        cache.discard_page(page_id).unwrap();
        cache.stats().reset();

        drop(cache.lock_page(page_id, LockMode::Shared).unwrap());
        drop(cache.lock_page(page_id, LockMode::Shared).unwrap());

        let snapshot = cache.stats().snapshot();
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.pages_read, 1);
    }

    /// Map a page, push it out through the history window and read it
    /// back, so 2Q holds it as popular.
    fn popular_page(cache: &Cache) -> PageId {
        let page_id = cache.allocate_page(PageOwnerId::ANON).unwrap();
        cache.flush_all_pages().unwrap();
        for _ in 0..cache.pool_size() {
            cache.allocate_page(PageOwnerId::ANON).unwrap();
        }
        assert!(!cache.is_resident(page_id));

        let mut page = cache.lock_page(page_id, LockMode::Exclusive).unwrap();
        page.data_mut()[0] = 1;
        drop(page);
        assert!(cache.victim_range().contains(&page_id));
        page_id
    }

    #[test]
    fn test_flush_racing_release_leaves_popular_page_a_victim() {
        let (cache, _dir) = create_test_cache(4);
        let page_id = popular_page(&cache);

        let held = cache.lock_page(page_id, LockMode::Exclusive).unwrap();
        thread::scope(|s| {
            let flusher = s.spawn(|| cache.flush_page_id(page_id).unwrap());
            // The flusher pins, then waits for the latch.
            while cache.pin_count(page_id) != Some(2) {
                thread::yield_now();
            }
            drop(held);
            flusher.join().unwrap();
        });

        assert_eq!(cache.pin_count(page_id), Some(0));
        assert_eq!(cache.stats().snapshot().dirty_pages, 0);
        assert!(cache.victim_range().contains(&page_id));
    }

    #[test]
    fn test_concurrent_releases_leave_popular_page_a_victim() {
        let (cache, _dir) = create_test_cache(4);
        let page_id = popular_page(&cache);
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let page = cache.lock_page(page_id, LockMode::Shared).unwrap();
                        barrier.wait();
                        drop(page);
                        barrier.wait();
                    }
                });
            }
        });

        assert_eq!(cache.pin_count(page_id), Some(0));
        assert!(cache.victim_range().contains(&page_id));
    }
}
