//! B-tree index built on the page cache.
//!
//! - [`BTreeReader`] - Blink-style search and scans
//! - [`BTreeWriter`] - insert, delete, update, split and grow
//! - [`BTreeBuilder`] - bulk load from sorted input, truncate
//! - [`BTreeVerifier`] - whole-tree consistency check and statistics
//! - [`NodeAccessor`] - layout of records within one node
//!
//! Every component works from a [`BTreeDescriptor`] and holds at most a few
//! page locks at a time; the cache owns all pages.

mod accessor;
mod builder;
pub mod node;
mod reader;
mod recovery;
mod verifier;
mod writer;

pub use accessor::{Capacity, FixedNodeAccessor, NodeAccessor, RecordShape, VariableNodeAccessor};
pub use builder::{BTreeBuilder, BuildStrategy};
pub use reader::BTreeReader;
pub use recovery::BTreeRecoveryFactory;
pub use verifier::{BTreeStatistics, BTreeVerifier};
pub use writer::BTreeWriter;

use crate::common::codec::Cursor;
use crate::common::{Error, PageId, PageOwnerId, Result};
use crate::storage::SegmentAccessor;
use crate::tuple::TupleDescriptor;

/// Deepest tree whose root-to-leaf path the writer records.
pub(crate) const MAX_DEPTH: usize = 16;

/// What an insert does with an equal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distinctness {
    #[default]
    Allow,
    /// Silently skip the insert.
    Discard,
    /// Fail with [`Error::DuplicateKey`].
    Fail,
}

/// Which of several equal keys a search settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateSeek {
    #[default]
    Any,
    Begin,
    End,
}

/// Identity of one tree.
///
/// # Example
/// ```
/// use pagetree::buffer::Cache;
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::index::btree::BTreeDescriptor;
/// use pagetree::storage::{DiskManager, SegmentAccessor};
/// use pagetree::tuple::{FieldDescriptor, FieldType, TupleDescriptor};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = Cache::new(
///     CacheConfig::with_pool_size(16),
///     DiskManager::create(dir.path().join("tree.db")).unwrap(),
/// )
/// .unwrap();
/// let records = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int32),
///     FieldDescriptor::new(FieldType::Varchar(32)),
/// ]);
/// let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
/// assert!(desc.root_page_id().is_null());
/// assert_eq!(desc.key_descriptor().len(), 1);
/// ```
///
/// The root page id is held by value. Clones taken while the tree has no
/// root do not see a root created later through another clone, so give a
/// tree that several writers share its root first, with
/// [`BTreeBuilder::create_empty_root`] or a build, and clone the descriptor
/// afterwards.
#[derive(Debug, Clone)]
pub struct BTreeDescriptor<'c> {
    root_page_id: PageId,
    segment: SegmentAccessor<'c>,
    tuple_descriptor: TupleDescriptor,
    key_projection: Vec<usize>,
    owner: PageOwnerId,
}

impl<'c> BTreeDescriptor<'c> {
    /// Descriptor of a tree with no root yet.
    pub fn new(
        segment: SegmentAccessor<'c>,
        tuple_descriptor: TupleDescriptor,
        key_projection: Vec<usize>,
        owner: PageOwnerId,
    ) -> Self {
        Self {
            root_page_id: PageId::NULL,
            segment,
            tuple_descriptor,
            key_projection,
            owner,
        }
    }

    pub fn with_root(mut self, root_page_id: PageId) -> Self {
        self.root_page_id = root_page_id;
        self
    }

    #[inline]
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub(crate) fn set_root_page_id(&mut self, root_page_id: PageId) {
        self.root_page_id = root_page_id;
    }

    #[inline]
    pub fn segment(&self) -> SegmentAccessor<'c> {
        self.segment
    }

    pub fn tuple_descriptor(&self) -> &TupleDescriptor {
        &self.tuple_descriptor
    }

    pub fn key_projection(&self) -> &[usize] {
        &self.key_projection
    }

    pub fn owner(&self) -> PageOwnerId {
        self.owner
    }

    pub fn key_descriptor(&self) -> TupleDescriptor {
        self.tuple_descriptor.project(&self.key_projection)
    }

    pub fn leaf_accessor(&self) -> NodeAccessor {
        NodeAccessor::leaf(&self.tuple_descriptor, &self.key_projection)
    }

    pub fn non_leaf_accessor(&self) -> NodeAccessor {
        NodeAccessor::non_leaf(&self.tuple_descriptor, &self.key_projection)
    }

    /// # Errors
    /// `Error::InvalidArgument` for an empty or out-of-range key projection.
    pub fn validate(&self) -> Result<()> {
        if self.key_projection.is_empty() {
            return Err(Error::InvalidArgument("key projection is empty".into()));
        }
        if let Some(&bad) = self
            .key_projection
            .iter()
            .find(|&&i| i >= self.tuple_descriptor.len())
        {
            return Err(Error::InvalidArgument(format!(
                "key field {bad} out of range for {} fields",
                self.tuple_descriptor.len()
            )));
        }
        Ok(())
    }

    /// Append root, owner, record shape and key projection to `out`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.root_page_id.0.to_le_bytes());
        out.extend_from_slice(&self.owner.0.to_le_bytes());
        self.tuple_descriptor.serialize(out);
        out.extend_from_slice(&(self.key_projection.len() as u16).to_le_bytes());
        for &field in &self.key_projection {
            out.extend_from_slice(&(field as u16).to_le_bytes());
        }
    }

    /// Rebuild a descriptor written by [`serialize`](Self::serialize).
    pub fn deserialize(segment: SegmentAccessor<'c>, bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let root_page_id = PageId(cursor.read_u64()?);
        let owner = PageOwnerId(cursor.read_u64()?);
        let tuple_descriptor = TupleDescriptor::deserialize(&mut cursor)?;
        let key_count = cursor.read_u16()? as usize;
        let key_projection = (0..key_count)
            .map(|_| cursor.read_u16().map(usize::from))
            .collect::<Result<Vec<_>>>()?;

        let descriptor = Self {
            root_page_id,
            segment,
            tuple_descriptor,
            key_projection,
            owner,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use tempfile::TempDir;

    use crate::buffer::Cache;
    use crate::common::config::CacheConfig;
    use crate::storage::DiskManager;
    use crate::tuple::{FieldDescriptor, FieldType, TupleDescriptor};

    pub(crate) fn create_test_cache(pool_size: usize) -> (Cache, TempDir) {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::create(dir.path().join("btree.db")).unwrap();
        let cache = Cache::new(CacheConfig::with_pool_size(pool_size), dm).unwrap();
        (cache, dir)
    }

    /// `(key INT, value INT)`
    pub(crate) fn int_pairs() -> TupleDescriptor {
        TupleDescriptor::new(vec![
            FieldDescriptor::new(FieldType::Int32),
            FieldDescriptor::new(FieldType::Int32),
        ])
    }

    /// `(name VARCHAR(120), id INT)`
    pub(crate) fn named_rows() -> TupleDescriptor {
        TupleDescriptor::new(vec![
            FieldDescriptor::new(FieldType::Varchar(120)),
            FieldDescriptor::new(FieldType::Int32),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_descriptor_serialize_round_trip() {
        let (cache, _dir) = create_test_cache(4);
        let segment = SegmentAccessor::new(&cache);
        let desc =
            BTreeDescriptor::new(segment, named_rows(), vec![1, 0], PageOwnerId(3))
                .with_root(PageId::new(12));

        let mut bytes = Vec::new();
        desc.serialize(&mut bytes);
        let decoded = BTreeDescriptor::deserialize(segment, &bytes).unwrap();
        assert_eq!(decoded.root_page_id(), PageId::new(12));
        assert_eq!(decoded.owner(), PageOwnerId(3));
        assert_eq!(decoded.key_projection(), &[1, 0]);
        assert_eq!(decoded.tuple_descriptor(), desc.tuple_descriptor());
    }

    #[test]
    fn test_validate_rejects_bad_projection() {
        let (cache, _dir) = create_test_cache(4);
        let segment = SegmentAccessor::new(&cache);
        assert!(BTreeDescriptor::new(segment, int_pairs(), vec![], PageOwnerId(1))
            .validate()
            .is_err());
        assert!(BTreeDescriptor::new(segment, int_pairs(), vec![2], PageOwnerId(1))
            .validate()
            .is_err());
    }
}
