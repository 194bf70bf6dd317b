//! Error types for pagetree.

use thiserror::Error;

use super::PageId;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the cache and the B-tree engine.
///
/// Concurrency retries (root lock-mode mismatches, stale parent paths during a
/// split) are handled inside the reader and writer and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist on disk.
    #[error("{0} not found")]
    PageNotFound(PageId),

    /// The NULL page id, or an id the device never handed out.
    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    /// Every frame is pinned, so no victim could be found.
    #[error("no free frames available in buffer pool")]
    NoFreeFrames,

    /// The page is pinned and cannot be discarded or deallocated.
    #[error("{0} is still pinned")]
    PagePinned(PageId),

    /// A [`QuotaCacheAccessor`](crate::buffer::QuotaCacheAccessor) already
    /// holds its maximum number of locked pages.
    #[error("locked page quota of {0} exceeded")]
    LockQuotaExceeded(usize),

    /// A page read back from disk failed its CRC32 check.
    #[error("checksum mismatch on {0}")]
    ChecksumMismatch(PageId),

    /// Insert under [`Distinctness::Fail`](crate::index::btree::Distinctness)
    /// found an equal key.
    #[error("duplicate key {0}")]
    DuplicateKey(String),

    /// A record is too large to ever fit in a node.
    #[error("tuple of {size} bytes exceeds the maximum of {max} bytes")]
    TupleOverflow { size: usize, max: usize },

    /// Structural damage found in a tree or page.
    #[error("corruption on {page_id}: {reason}")]
    Corruption { page_id: PageId, reason: String },

    /// Caller passed something the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A logged record image or participant description ended early.
    #[error("log record truncated")]
    TruncatedLog,
}

impl Error {
    pub(crate) fn corruption(page_id: PageId, reason: impl Into<String>) -> Self {
        Error::Corruption {
            page_id,
            reason: reason.into(),
        }
    }
}
