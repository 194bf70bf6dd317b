//! Page cache.
//!
//! The cache sits between index structures and disk. It manages a fixed
//! pool of frames, each holding one page, and hands out latched page guards.
//!
//! # Components
//! - [`Cache`] - The page cache
//! - [`CacheAccessor`] / [`QuotaCacheAccessor`] - Page-level access, optionally
//!   bounded by a locked-page quota
//! - [`Frame`] - A slot in the pool holding a page + metadata
//! - [`PageGuard`] - RAII guard for a pinned, latched page
//! - [`LazyWriter`] - Background dirty page writer
//! - [`CacheStats`] - Counters for an external metrics sink
//! - [`replacer`] - Victim policy implementations

mod accessor;
mod cache;
mod frame;
mod lazy_writer;
mod page_guard;
pub mod replacer;
mod stats;

pub use accessor::{CacheAccessor, QuotaCacheAccessor};
pub use cache::Cache;
pub use frame::Frame;
pub use lazy_writer::LazyWriter;
pub use page_guard::{LockMode, PageGuard};
pub use stats::{CacheStats, StatsSnapshot};
