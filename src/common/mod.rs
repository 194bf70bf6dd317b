//! Common types shared across pagetree.
//!
//! - Configuration constants and [`CacheConfig`](config::CacheConfig)
//! - Error types
//! - Identifiers (PageId, PageOwnerId, FrameId)

pub(crate) mod codec;
pub mod config;
pub mod error;
mod frame_id;
mod page_id;

pub use error::{Error, Result};
pub use frame_id::FrameId;
pub use page_id::{PageId, PageOwnerId};
