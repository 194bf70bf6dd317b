//! pagetree - a paged buffer cache and a B-tree index engine on top of it.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                B-tree (index/btree/)                    │   │
//! │  │   Reader | Writer | Builder | Verifier | Recovery       │   │
//! │  │        NodeAccessor: fixed or variable layout           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │          ↓ records (tuple/)         ↓ logical log (txn/)       │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Page Cache (buffer/)                      │   │
//! │  │   Cache + PageGuard (S/U/X) + LazyWriter + CacheStats    │   │
//! │  │        Victim policies: LRU | 2Q  (replacer/)            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Storage (storage/)                        │   │
//! │  │     DiskManager + Page + PageFooter + SegmentAccessor    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Error, config)
//! - [`storage`] - Disk I/O, page layout and segment links
//! - [`buffer`] - Page cache and victim policies
//! - [`tuple`] - Record descriptors, datums and key comparison
//! - [`txn`] - Logical transaction log
//! - [`index`] - The B-tree
//!
//! # Quick Start
//! ```no_run
//! use pagetree::buffer::{Cache, CacheAccessor};
//! use pagetree::common::config::CacheConfig;
//! use pagetree::storage::DiskManager;
//! use pagetree::PageOwnerId;
//!
//! let dm = DiskManager::create("my_tree.db").unwrap();
//! let cache = Cache::new(CacheConfig::with_pool_size(256), dm).unwrap();
//! let page = cache.new_page(PageOwnerId(1)).unwrap();
//! assert_eq!(page.owner(), PageOwnerId(1));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;
pub mod tuple;
pub mod txn;

pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, PageId, PageOwnerId, Result};

pub use buffer::{Cache, CacheStats, LockMode, PageGuard, StatsSnapshot};
pub use index::btree::{BTreeBuilder, BTreeDescriptor, BTreeReader, BTreeVerifier, BTreeWriter};
pub use storage::page::Page;
pub use storage::DiskManager;
