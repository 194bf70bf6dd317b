//! Cache statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Named counters exposed for an external metrics sink.
///
/// All fields are atomic and updated with `Ordering::Relaxed`; the counters
/// are independent and only need to be eventually consistent.
///
/// # Example
/// ```
/// use pagetree::CacheStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = CacheStats::new();
/// stats.cache_hits.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().cache_hits, 1);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Page lock requests satisfied from a resident frame.
    pub cache_hits: AtomicU64,
    /// Page lock requests that had to read from disk.
    pub cache_misses: AtomicU64,
    /// Frames reclaimed from a resident page.
    pub victimizations: AtomicU64,
    /// Pages currently dirty (a gauge, not a counter).
    pub dirty_pages: AtomicU64,
    pub pages_read: AtomicU64,
    pub pages_written: AtomicU64,
    /// Victim candidates lost to a concurrent pin or dirtying.
    pub victim_retries: AtomicU64,
    /// Pages written by the lazy writer.
    pub lazy_writes: AtomicU64,
    /// Lazy writer passes.
    pub lazy_write_calls: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn page_dirtied(&self) {
        self.dirty_pages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn page_cleaned(&self) {
        // A racing clean of an already-clean page must not wrap the gauge.
        let _ = self
            .dirty_pages
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Hit rate over all page requests (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// A non-atomic copy for display/logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            victimizations: self.victimizations.load(Ordering::Relaxed),
            dirty_pages: self.dirty_pages.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            victim_retries: self.victim_retries.load(Ordering::Relaxed),
            lazy_writes: self.lazy_writes.load(Ordering::Relaxed),
            lazy_write_calls: self.lazy_write_calls.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter except the dirty-page gauge.
    pub fn reset(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.victimizations,
            &self.pages_read,
            &self.pages_written,
            &self.victim_retries,
            &self.lazy_writes,
            &self.lazy_write_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub victimizations: u64,
    pub dirty_pages: u64,
    pub pages_read: u64,
    pub pages_written: u64,
    pub victim_retries: u64,
    pub lazy_writes: u64,
    pub lazy_write_calls: u64,
}

impl StatsSnapshot {
    pub fn page_requests(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.page_requests();
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ hits: {}, misses: {}, victimizations: {}, dirty: {}, reads: {}, writes: {}, hit_rate: {:.2}% }}",
            self.cache_hits,
            self.cache_misses,
            self.victimizations,
            self.dirty_pages,
            self.pages_read,
            self.pages_written,
            self.hit_rate() * 100.0
        )
    }
}
