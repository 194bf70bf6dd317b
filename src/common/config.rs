//! Configuration for pagetree.

use std::time::Duration;

use super::{Error, Result};

/// Size of a page in bytes (4KB).
///
/// Pages are aligned to this size for direct I/O. The B-tree sees slightly
/// less than this; see [`USABLE_PAGE_SIZE`].
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at the end of every page for the segment footer.
pub const PAGE_FOOTER_SIZE: usize = 20;

/// Bytes of each page available to page owners such as B-tree nodes.
pub const USABLE_PAGE_SIZE: usize = PAGE_SIZE - PAGE_FOOTER_SIZE;

/// Which victim policy a cache is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VictimPolicyKind {
    /// Single least-recently-used queue.
    Lru,
    /// Johnson-Shasha 2Q with a bitmap-approximated history window.
    #[default]
    TwoQ,
}

/// Knobs for [`Cache`](crate::buffer::Cache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of page frames.
    pub pool_size: usize,
    pub victim_policy: VictimPolicyKind,
    /// Soft target size of the 2Q freshman queue, as a percentage of frames.
    pub freshman_queue_percentage: u32,
    /// Size of the 2Q history window, as a percentage of frames.
    pub page_history_queue_percentage: u32,
    /// Period of the background lazy writer. `None` disables it.
    pub lazy_write_interval: Option<Duration>,
    /// Pages flushed per lazy-writer pass.
    pub lazy_write_batch: usize,
    /// Dirty victims flushed per foreground victimization scan.
    pub victim_flush_batch: usize,
    /// Reported to callers sizing in-memory working sets.
    pub processor_cache_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            victim_policy: VictimPolicyKind::TwoQ,
            freshman_queue_percentage: 25,
            page_history_queue_percentage: 100,
            lazy_write_interval: None,
            lazy_write_batch: 5,
            victim_flush_batch: 10,
            processor_cache_bytes: 1 << 20,
        }
    }
}

impl CacheConfig {
    /// Default settings with the given number of frames.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    /// Plain LRU replacement, handy for deterministic tests.
    pub fn lru(pool_size: usize) -> Self {
        Self {
            pool_size,
            victim_policy: VictimPolicyKind::Lru,
            ..Self::default()
        }
    }

    /// 2Q replacement with a background writer flushing every 50ms.
    pub fn background_flush(pool_size: usize) -> Self {
        Self {
            pool_size,
            lazy_write_interval: Some(Duration::from_millis(50)),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::InvalidArgument("pool_size must be > 0".into()));
        }
        if self.freshman_queue_percentage > 100 {
            return Err(Error::InvalidArgument(format!(
                "freshman_queue_percentage {} is above 100",
                self.freshman_queue_percentage
            )));
        }
        if self.lazy_write_batch == 0 || self.victim_flush_batch == 0 {
            return Err(Error::InvalidArgument(
                "flush batch sizes must be > 0".into(),
            ));
        }
        Ok(())
    }
}
