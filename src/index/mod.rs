//! Index structures built on the page cache.

pub mod btree;
