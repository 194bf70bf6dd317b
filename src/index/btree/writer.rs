//! B-tree writer - insert, delete, update, split and grow.
//!
//! # Split Propagation
//! ```text
//!   parent:  [ .. (hi, L) .. ]            [ .. (lh, L) (hi, R) .. ]
//!                    │             ──►              │       │
//!   level:          [L full]                     [L' ]──►[ R ]
//! ```
//! The right half moves to a new page `R`. The parent entry that pointed at
//! `L` now points at `R` and keeps the old high key `hi`; a new entry
//! `(lh, L)` with `L`'s new high key goes in front of it. Both children are
//! released before the parent is locked. Readers that reach `L` through the
//! old parent entry find `R` through the right link.
//!
//! The root page never moves. Splitting it copies its content into two new
//! pages and rewrites the root as a two-entry node one level higher.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::{LockMode, PageGuard};
use crate::common::{Error, PageId, Result};
use crate::tuple::{format_key, DatumRef};
use crate::txn::{ActionKind, LogicalAction, LogicalTxn, LogicalTxnParticipant};

use super::node;
use super::reader::{BTreeReader, LockModes, Target};
use super::{BTreeDescriptor, Capacity, Distinctness, DuplicateSeek, NodeAccessor};

/// Mutating cursor over one tree.
///
/// Derefs to [`BTreeReader`] for searches; leaves are locked exclusively so
/// the current record can be deleted or updated in place.
///
/// # Example
/// ```
/// use pagetree::buffer::Cache;
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::index::btree::{BTreeDescriptor, BTreeWriter, Distinctness, DuplicateSeek};
/// use pagetree::storage::{DiskManager, SegmentAccessor};
/// use pagetree::tuple::{DatumRef, FieldDescriptor, FieldType, TupleDescriptor};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = Cache::new(
///     CacheConfig::with_pool_size(16),
///     DiskManager::create(dir.path().join("writer.db")).unwrap(),
/// )
/// .unwrap();
/// let records = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int32),
///     FieldDescriptor::new(FieldType::Varchar(16)),
/// ]);
/// let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
///
/// let mut writer = BTreeWriter::new(desc).unwrap();
/// writer.set_distinctness(Distinctness::Fail);
/// assert!(writer.insert(&[DatumRef::Int32(1), DatumRef::Bytes(b"one")]).unwrap());
/// assert!(writer.insert(&[DatumRef::Int32(1), DatumRef::Bytes(b"uno")]).is_err());
///
/// assert!(writer.search(&[DatumRef::Int32(1)], DuplicateSeek::Any, false).unwrap());
/// writer.delete_current().unwrap();
/// assert!(!writer.search(&[DatumRef::Int32(1)], DuplicateSeek::Any, false).unwrap());
/// ```
pub struct BTreeWriter<'c> {
    reader: BTreeReader<'c>,
    distinctness: Distinctness,
    monotonic: bool,
    txn: Option<Arc<LogicalTxn>>,
    anchor_count: usize,
}

impl<'c> BTreeWriter<'c> {
    /// # Errors
    /// `Error::InvalidArgument` if the descriptor's key projection is bad.
    pub fn new(descriptor: BTreeDescriptor<'c>) -> Result<Self> {
        Ok(Self {
            reader: BTreeReader::with_modes(descriptor, LockModes::WRITE)?,
            distinctness: Distinctness::default(),
            monotonic: false,
            txn: None,
            anchor_count: 0,
        })
    }

    /// Largest leaf record this writer accepts.
    ///
    /// Leaves the room a non-leaf record needs for its child pointer.
    pub fn max_record_size() -> usize {
        NodeAccessor::max_entry_size() - 8
    }

    pub fn distinctness(&self) -> Distinctness {
        self.distinctness
    }

    pub fn set_distinctness(&mut self, distinctness: Distinctness) {
        self.distinctness = distinctness;
    }

    /// In monotonic mode the caller promises strictly increasing keys. The
    /// writer then keeps the last leaf locked between inserts, appends
    /// without searching and splits so the full node stays full.
    pub fn set_monotonic(&mut self, monotonic: bool) {
        if self.monotonic && !monotonic {
            self.reader.end_search();
        }
        self.monotonic = monotonic;
    }

    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }

    /// Log every insert and delete into `txn` from now on.
    pub fn set_txn(&mut self, txn: Option<Arc<LogicalTxn>>) {
        self.txn = txn;
    }

    pub fn txn(&self) -> Option<&Arc<LogicalTxn>> {
        self.txn.as_ref()
    }

    /// Number of full searches inserts have made to find their position.
    pub fn anchor_count(&self) -> usize {
        self.anchor_count
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert a record.
    ///
    /// Returns `false` if an equal key exists and distinctness is
    /// [`Distinctness::Discard`]. Keys whose fields are all NULL never count
    /// as duplicates.
    ///
    /// # Errors
    /// - `Error::TupleOverflow` if the record can never fit a node
    /// - `Error::DuplicateKey` under [`Distinctness::Fail`]
    /// - `Error::NoFreeFrames` if a split cannot get a page
    pub fn insert(&mut self, values: &[DatumRef<'_>]) -> Result<bool> {
        let record = self.reader.leaf.shape().tuple().marshal(values)?;
        self.insert_record(&record)
    }

    /// Insert an already marshalled record.
    ///
    /// A rootless tree gets an empty leaf root first. That root is recorded
    /// in this writer's descriptor only; see [`BTreeDescriptor`] for trees
    /// shared between writers.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<bool> {
        let max = Self::max_record_size();
        if record.len() > max {
            return Err(Error::TupleOverflow {
                size: record.len(),
                max,
            });
        }
        if self.reader.descriptor.root_page_id().is_null() {
            self.create_root()?;
        }

        let key = self.reader.leaf.shape().key(record);
        let appending = self.monotonic && self.can_append(&key);
        let found = if appending {
            self.reader.pos = self
                .reader
                .page
                .as_ref()
                .map_or(0, |page| node::entry_count(page.data()));
            false
        } else {
            self.anchor_count += 1;
            self.reader.locate(Target::Key(&key[..], DuplicateSeek::Begin))?
        };

        if self.distinctness != Distinctness::Allow
            && !appending
            && !key.iter().all(|datum| datum.is_null())
        {
            let duplicate = found
                || (self.reader.at_leaf_end() && self.reader.next_leaf_starts_with(&key)?);
            if duplicate {
                self.reader.end_search();
                trace!(target: "pagetree::btree::writer", key = %format_key(&key), "duplicate key");
                return match self.distinctness {
                    Distinctness::Fail => Err(Error::DuplicateKey(format_key(&key))),
                    _ => Ok(false),
                };
            }
        }

        let Some(mut page) = self.reader.page.take() else {
            return Err(Error::InvalidArgument("tree has no leaf to insert into".into()));
        };
        self.log(ActionKind::Insert, record);

        let pos = self.reader.pos;
        if try_insert(&self.reader.leaf, page.data_mut(), pos, record) {
            self.reader.set_position(page, pos);
        } else {
            let (leaf_id, leaf_pos) = self.split(page, pos, record.to_vec())?;
            if self.monotonic {
                let page = self.reader.lock_node(leaf_id, LockMode::Exclusive)?;
                self.reader.set_position(page, leaf_pos);
            }
        }

        if !self.monotonic {
            self.reader.end_search();
        }
        Ok(true)
    }

    /// Whether the held leaf is the last one and `key` sorts after it.
    fn can_append(&self, key: &[DatumRef<'_>]) -> bool {
        let Some(page) = self.reader.page.as_ref() else {
            return false;
        };
        let data = page.data();
        let n = node::entry_count(data);
        page.is_exclusive()
            && node::is_leaf(data)
            && node::right_sibling(data).is_null()
            && n > 0
            && self
                .reader
                .leaf
                .shape()
                .compare(self.reader.leaf.entry(data, n - 1), key)
                .is_lt()
    }

    fn create_root(&mut self) -> Result<()> {
        let descriptor = &self.reader.descriptor;
        let mut page = descriptor.segment().new_page(descriptor.owner())?;
        self.reader.leaf.clear_node(page.data_mut(), 0);
        let root = page.page_id();
        drop(page);
        self.reader.descriptor.set_root_page_id(root);
        debug!(target: "pagetree::btree::writer", root = root.0, "root created");
        Ok(())
    }

    fn accessor(&self, height: u32) -> &NodeAccessor {
        if height == 0 {
            &self.reader.leaf
        } else {
            &self.reader.non_leaf
        }
    }

    // ========================================================================
    // Split and grow
    // ========================================================================

    /// Insert `record` at `pos` of the full node `page`, splitting nodes up
    /// the tree until an insert fits.
    ///
    /// Returns the leaf page and position that received the record.
    fn split(
        &mut self,
        mut page: PageGuard<'c>,
        mut pos: usize,
        mut record: Vec<u8>,
    ) -> Result<(PageId, usize)> {
        let segment = self.reader.descriptor.segment();
        let owner = self.reader.descriptor.owner();
        let mut landed = None;

        loop {
            let height = node::height(page.data());
            if page.page_id() == self.reader.descriptor.root_page_id() {
                let at = self.grow(page, pos, &record)?;
                return Ok(landed.unwrap_or(at));
            }

            let mut right = segment.new_page(owner)?;
            let (parent_record, at) = split_into(
                self.accessor(height),
                &self.reader.non_leaf,
                &mut page,
                &mut right,
                pos,
                &record,
                self.monotonic,
            )?;
            landed.get_or_insert(at);
            let (left_id, right_id) = (page.page_id(), right.page_id());
            drop(right);
            drop(page);
            trace!(target: "pagetree::btree::writer", left = left_id.0, right = right_id.0, height, "node split");

            let (mut parent, parent_pos) = {
                let key = self.reader.non_leaf.shape().key(&parent_record);
                self.lock_parent(height, left_id, &key)?
            };
            self.reader
                .non_leaf
                .set_child(parent.data_mut(), parent_pos, right_id);
            if try_insert(&self.reader.non_leaf, parent.data_mut(), parent_pos, &parent_record) {
                return Ok(landed.unwrap_or(at));
            }

            page = parent;
            pos = parent_pos;
            record = parent_record;
        }
    }

    /// Split the full root in place: its entries move to two new children
    /// and the root becomes a two-entry node one level higher.
    fn grow(&self, mut root: PageGuard<'c>, pos: usize, record: &[u8]) -> Result<(PageId, usize)> {
        let segment = self.reader.descriptor.segment();
        let owner = self.reader.descriptor.owner();
        let height = node::height(root.data());
        let accessor = self.accessor(height);
        let non_leaf = &self.reader.non_leaf;

        let mut left = segment.new_page(owner)?;
        let mut right = segment.new_page(owner)?;
        left.data_mut().copy_from_slice(root.data());

        let (left_record, landed) = split_into(
            accessor,
            non_leaf,
            &mut left,
            &mut right,
            pos,
            record,
            self.monotonic,
        )?;
        let n = node::entry_count(right.data());
        let right_record = non_leaf.non_leaf_record(&accessor.key(right.data(), n - 1), right.page_id())?;

        non_leaf.clear_node(root.data_mut(), height + 1);
        non_leaf.insert_entry(root.data_mut(), 0, &left_record);
        non_leaf.insert_entry(root.data_mut(), 1, &right_record);
        debug!(
            target: "pagetree::btree::writer",
            root = root.page_id().0,
            height = height + 1,
            "tree grew"
        );
        Ok(landed)
    }

    /// Lock the parent of `child` exclusively and find the entry pointing at
    /// it. Falls back to a fresh descent when the recorded path is stale.
    fn lock_parent(
        &mut self,
        child_height: u32,
        child: PageId,
        key: &[DatumRef<'_>],
    ) -> Result<(PageGuard<'c>, usize)> {
        let height = child_height + 1;
        if let Some(parent) = self.reader.path.pop() {
            let page = self.reader.lock_node(parent, LockMode::Exclusive)?;
            if node::height(page.data()) == height {
                if let Some(found) = self.find_parent_entry(page, child, key)? {
                    return Ok(found);
                }
            }
        }

        trace!(target: "pagetree::btree::writer", child = child.0, height, "rederiving parent");
        self.reader.path.clear();
        let parent = self.locate_level(key, height)?;
        let page = self.reader.lock_node(parent, LockMode::Exclusive)?;
        if node::height(page.data()) != height {
            return Err(Error::corruption(parent, "parent level changed height"));
        }
        self.find_parent_entry(page, child, key)?
            .ok_or_else(|| Error::corruption(child, "no parent entry points at split node"))
    }

    /// Scan right from the lower bound of `key` for the entry pointing at
    /// `child`, moving right with coupled locks.
    fn find_parent_entry(
        &self,
        mut page: PageGuard<'c>,
        child: PageId,
        key: &[DatumRef<'_>],
    ) -> Result<Option<(PageGuard<'c>, usize)>> {
        let non_leaf = &self.reader.non_leaf;
        loop {
            let data = page.data();
            let (start, _) = non_leaf.search(data, key, DuplicateSeek::Begin);
            let n = node::entry_count(data);
            if let Some(pos) = (start..n).find(|&i| non_leaf.child(data, i) == child) {
                return Ok(Some((page, pos)));
            }
            let sibling = node::right_sibling(data);
            if sibling.is_null() {
                return Ok(None);
            }
            page = self.reader.lock_coupled(page, sibling, LockMode::Exclusive)?;
        }
    }

    /// Descend with shared locks to the node at `height` covering `key`.
    fn locate_level(&self, key: &[DatumRef<'_>], height: u32) -> Result<PageId> {
        let root = self.reader.descriptor.root_page_id();
        let mut page = self.reader.lock_node(root, LockMode::Shared)?;
        loop {
            let data = page.data();
            let level = node::height(data);
            if level == height {
                return Ok(page.page_id());
            }
            if level < height {
                return Err(Error::corruption(page.page_id(), "tree lower than split level"));
            }
            let (pos, _) = self.reader.non_leaf.search(data, key, DuplicateSeek::Begin);
            let n = node::entry_count(data);
            if pos >= n {
                let sibling = node::right_sibling(data);
                if sibling.is_null() {
                    return Err(Error::corruption(
                        page.page_id(),
                        "search key beyond the last non-leaf entry",
                    ));
                }
                page = self.reader.lock_coupled(page, sibling, LockMode::Shared)?;
                continue;
            }
            let child = self.reader.non_leaf.child(data, pos);
            drop(page);
            page = self.reader.lock_node(child, LockMode::Shared)?;
        }
    }

    // ========================================================================
    // Delete and update
    // ========================================================================

    /// Delete the record the writer is positioned on.
    ///
    /// The next [`search_next`](BTreeReader::search_next) lands on the record
    /// that followed it. Nodes are never merged.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if not positioned on a record.
    pub fn delete_current(&mut self) -> Result<()> {
        let Some(image) = self.reader.current_record().map(<[u8]>::to_vec) else {
            return Err(Error::InvalidArgument(
                "writer is not positioned on a record".into(),
            ));
        };
        self.log(ActionKind::Delete, &image);

        let pos = self.reader.pos;
        if let Some(page) = self.reader.page.as_mut() {
            self.reader.leaf.deallocate_entry(page.data_mut(), pos);
        }
        self.reader.compensate_next = true;
        Ok(())
    }

    /// Delete the first record whose bytes equal `record`.
    ///
    /// Returns `false` if there is none.
    pub fn delete_record(&mut self, record: &[u8]) -> Result<bool> {
        let key = self.reader.leaf.shape().key(record);
        if !self.reader.search(&key, DuplicateSeek::Begin, false)? {
            self.reader.end_search();
            return Ok(false);
        }
        loop {
            let Some(current) = self.reader.current_record() else {
                break;
            };
            if current == record {
                self.delete_current()?;
                self.reader.end_search();
                return Ok(true);
            }
            if self.reader.leaf.shape().compare(current, &key).is_ne() {
                break;
            }
            if !self.reader.search_next()? {
                break;
            }
        }
        self.reader.end_search();
        Ok(false)
    }

    /// Replace the current record with one carrying the same key.
    ///
    /// Returns `false`, leaving the old record in place, if the new record
    /// does not fit the leaf even after compaction; the caller can delete
    /// and reinsert instead.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if not positioned or if the key would change.
    pub fn update_current(&mut self, values: &[DatumRef<'_>]) -> Result<bool> {
        let record = self.reader.leaf.shape().tuple().marshal(values)?;
        let max = Self::max_record_size();
        if record.len() > max {
            return Err(Error::TupleOverflow {
                size: record.len(),
                max,
            });
        }
        let Some(old) = self.reader.current_record().map(<[u8]>::to_vec) else {
            return Err(Error::InvalidArgument(
                "writer is not positioned on a record".into(),
            ));
        };
        if self.reader.leaf.compare_entries(&old, &record).is_ne() {
            return Err(Error::InvalidArgument("update would change the key".into()));
        }

        let pos = self.reader.pos;
        let leaf = &self.reader.leaf;
        let Some(page) = self.reader.page.as_mut() else {
            return Err(Error::InvalidArgument(
                "writer is not positioned on a record".into(),
            ));
        };
        let mut image = page.data().to_vec();
        leaf.deallocate_entry(&mut image, pos);
        if !try_insert(leaf, &mut image, pos, &record) {
            return Ok(false);
        }

        self.log(ActionKind::Delete, &old);
        self.log(ActionKind::Insert, &record);
        if let Some(page) = self.reader.page.as_mut() {
            page.data_mut().copy_from_slice(&image);
        }
        Ok(true)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    fn log(&self, kind: ActionKind, image: &[u8]) {
        if let Some(txn) = &self.txn {
            txn.log_action(self, kind, image);
        }
    }

    /// Apply `kind` to `image` without logging.
    fn replay(&mut self, kind: ActionKind, image: &[u8]) -> Result<()> {
        let txn = self.txn.take();
        let distinctness = std::mem::replace(&mut self.distinctness, Distinctness::Allow);
        let result = match kind {
            ActionKind::Insert => self.insert_record(image).map(drop),
            ActionKind::Delete => self.delete_record(image).map(|found| {
                if !found {
                    warn!(target: "pagetree::btree::writer", root = self.root_page_id().0, "logged record not found");
                }
            }),
        };
        self.reader.end_search();
        self.distinctness = distinctness;
        self.txn = txn;
        result
    }
}

impl<'c> Deref for BTreeWriter<'c> {
    type Target = BTreeReader<'c>;

    fn deref(&self) -> &BTreeReader<'c> {
        &self.reader
    }
}

impl DerefMut for BTreeWriter<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.reader
    }
}

impl LogicalTxnParticipant for BTreeWriter<'_> {
    fn participant_id(&self) -> u64 {
        self.reader.descriptor.root_page_id().0
    }

    fn describe_participant(&self, out: &mut Vec<u8>) {
        self.reader.descriptor.serialize(out);
    }

    fn undo_logical_action(&mut self, action: &LogicalAction) -> Result<()> {
        self.replay(action.kind.inverse(), &action.image)
    }

    fn redo_logical_action(&mut self, action: &LogicalAction) -> Result<()> {
        self.replay(action.kind, &action.image)
    }
}

impl std::fmt::Debug for BTreeWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeWriter")
            .field("reader", &self.reader)
            .field("distinctness", &self.distinctness)
            .field("monotonic", &self.monotonic)
            .field("anchor_count", &self.anchor_count)
            .finish()
    }
}

/// Insert into `data` if the record fits, compacting first when that helps.
fn try_insert(accessor: &NodeAccessor, data: &mut [u8], pos: usize, record: &[u8]) -> bool {
    match accessor.capacity(data, record.len()) {
        Capacity::CanFit => {}
        Capacity::CanFitWithCompaction => accessor.compact_in_place(data),
        Capacity::CanNotFit => return false,
    }
    accessor.insert_entry(data, pos, record);
    true
}

/// Split the full node `left` into the empty page `right`, link the pair
/// and place `record`, which belongs at `pos` of the unsplit node.
///
/// Returns the parent record for `left` and where `record` landed.
fn split_into<'p>(
    accessor: &NodeAccessor,
    non_leaf: &NodeAccessor,
    left: &mut PageGuard<'p>,
    right: &mut PageGuard<'p>,
    pos: usize,
    record: &[u8],
    monotonic: bool,
) -> Result<(Vec<u8>, (PageId, usize))> {
    let left_n = accessor.split_node(left.data_mut(), right.data_mut(), pos, record.len(), monotonic);

    let sibling = node::right_sibling(left.data());
    node::set_right_sibling(right.data_mut(), sibling);
    right.set_successor(left.successor());
    node::set_right_sibling(left.data_mut(), right.page_id());
    left.set_successor(right.page_id());

    let to_right = pos > left_n
        || (pos == left_n && accessor.capacity(right.data(), record.len()) != Capacity::CanNotFit);
    let (target, at) = if to_right {
        (&mut *right, pos - left_n)
    } else {
        (&mut *left, pos)
    };
    let landed = (target.page_id(), at);
    if !try_insert(accessor, target.data_mut(), at, record) {
        return Err(Error::corruption(landed.0, "record does not fit after split"));
    }

    let n = node::entry_count(left.data());
    let parent_record = non_leaf.non_leaf_record(&accessor.key(left.data(), n - 1), left.page_id())?;
    Ok((parent_record, landed))
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;
    use crate::common::PageOwnerId;
    use crate::index::btree::test_util::*;
    use crate::index::btree::{BTreeBuilder, BTreeVerifier};
    use crate::storage::SegmentAccessor;
    use crate::tuple::{Datum, FieldDescriptor, FieldType, TupleDescriptor};

    fn pair(k: i32, v: i32) -> [DatumRef<'static>; 2] {
        [DatumRef::Int32(k), DatumRef::Int32(v)]
    }

    fn count(reader: &mut BTreeReader<'_>) -> usize {
        let mut n = 0;
        if reader.search_first().unwrap() {
            n += 1;
            while reader.search_next().unwrap() {
                n += 1;
            }
        }
        n
    }

    #[test]
    fn test_random_inserts_all_found() {
        let (cache, _dir) = create_test_cache(64);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), int_pairs(), vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();
        writer.set_distinctness(Distinctness::Fail);

        let mut keys: Vec<i32> = (0..5000).collect();
        keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
        for &k in &keys {
            assert!(writer.insert(&pair(k, -k)).unwrap());
        }

        for k in 0..5000 {
            assert!(writer.search(&[DatumRef::Int32(k)], DuplicateSeek::Any, false).unwrap());
            assert_eq!(writer.current_datums().unwrap()[1], Datum::Int32(-k));
        }
        assert!(!writer.search(&[DatumRef::Int32(5000)], DuplicateSeek::Any, true).unwrap());

        let stats = BTreeVerifier::new(writer.descriptor().clone(), true)
            .verify()
            .unwrap();
        assert_eq!(stats.n_tuples, 5000);
        assert!(stats.n_levels >= 2);
    }

    #[test]
    fn test_distinctness_policies() {
        let (cache, _dir) = create_test_cache(16);
        let records = TupleDescriptor::new(vec![
            FieldDescriptor::nullable(FieldType::Int32),
            FieldDescriptor::new(FieldType::Int32),
        ]);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();

        writer.set_distinctness(Distinctness::Fail);
        writer.insert(&pair(1, 1)).unwrap();
        assert!(matches!(
            writer.insert(&pair(1, 2)),
            Err(Error::DuplicateKey(_))
        ));

        writer.set_distinctness(Distinctness::Discard);
        assert!(!writer.insert(&pair(1, 3)).unwrap());

        // NULL keys are never equal to each other.
        writer.set_distinctness(Distinctness::Fail);
        assert!(writer.insert(&[DatumRef::Null, DatumRef::Int32(1)]).unwrap());
        assert!(writer.insert(&[DatumRef::Null, DatumRef::Int32(2)]).unwrap());

        writer.set_distinctness(Distinctness::Allow);
        assert!(writer.insert(&pair(1, 4)).unwrap());
        assert_eq!(count(&mut writer), 4);
    }

    #[test]
    fn test_monotonic_inserts_anchor_once() {
        let (cache, _dir) = create_test_cache(64);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), int_pairs(), vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();
        writer.set_monotonic(true);
        for k in 0..20_000 {
            writer.insert(&pair(k, k)).unwrap();
        }
        assert_eq!(writer.anchor_count(), 1);
        writer.set_monotonic(false);

        let stats = BTreeVerifier::new(writer.descriptor().clone(), true)
            .verify()
            .unwrap();
        assert_eq!(stats.n_tuples, 20_000);
        // Appending splits move one record, so full leaves keep 504 of 505.
        assert_eq!(stats.n_leaf_nodes, 20_000usize.div_ceil(504));
    }

    #[test]
    fn test_delete_every_other_and_reinsert() {
        let (cache, _dir) = create_test_cache(32);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), named_rows(), vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();
        let name = |i: i32| format!("name-{i:05}-{}", "x".repeat((i % 50) as usize));
        for i in 0..2000 {
            let n = name(i);
            writer
                .insert(&[DatumRef::Bytes(n.as_bytes()), DatumRef::Int32(i)])
                .unwrap();
        }

        assert!(writer.search_first().unwrap());
        let mut i = 0;
        loop {
            if i % 2 == 0 {
                writer.delete_current().unwrap();
            }
            i += 1;
            if !writer.search_next().unwrap() {
                break;
            }
        }
        assert_eq!(i, 2000);
        assert_eq!(count(&mut writer), 1000);

        let n = name(10);
        assert!(!writer.search(&[DatumRef::Bytes(n.as_bytes())], DuplicateSeek::Any, false).unwrap());
        writer
            .insert(&[DatumRef::Bytes(n.as_bytes()), DatumRef::Int32(10)])
            .unwrap();
        let stats = BTreeVerifier::new(writer.descriptor().clone(), true)
            .verify()
            .unwrap();
        assert_eq!(stats.n_tuples, 1001);
    }

    #[test]
    fn test_update_current() {
        let (cache, _dir) = create_test_cache(16);
        let records = TupleDescriptor::new(vec![
            FieldDescriptor::new(FieldType::Int32),
            FieldDescriptor::new(FieldType::Varchar(900)),
        ]);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();
        let small = vec![b's'; 10];
        let large = vec![b'l'; 900];
        for k in 0..4 {
            writer
                .insert(&[DatumRef::Int32(k), DatumRef::Bytes(&large)])
                .unwrap();
        }
        writer.insert(&[DatumRef::Int32(4), DatumRef::Bytes(&small)]).unwrap();

        let txn = Arc::new(LogicalTxn::new());
        writer.set_txn(Some(Arc::clone(&txn)));

        let key = [DatumRef::Int32(4)];
        assert!(writer.search(&key, DuplicateSeek::Any, false).unwrap());
        let before = writer.current_record().unwrap().to_vec();
        assert!(matches!(
            writer.update_current(&[DatumRef::Int32(5), DatumRef::Bytes(&small)]),
            Err(Error::InvalidArgument(_))
        ));
        // Five large records do not fit one leaf.
        let grown = writer.update_current(&[DatumRef::Int32(4), DatumRef::Bytes(&large)]).unwrap();
        assert!(!grown);
        assert_eq!(writer.current_datums().unwrap()[1], Datum::Bytes(small.clone()));
        assert!(txn.is_empty());

        let medium = vec![b'm'; 100];
        assert!(writer.update_current(&[DatumRef::Int32(4), DatumRef::Bytes(&medium)]).unwrap());
        let after = writer.current_record().unwrap().to_vec();
        let actions = txn.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!((actions[0].kind, &actions[0].image), (ActionKind::Delete, &before));
        assert_eq!((actions[1].kind, &actions[1].image), (ActionKind::Insert, &after));

        writer.end_search();
        assert!(writer.search(&key, DuplicateSeek::Any, false).unwrap());
        assert_eq!(writer.current_datums().unwrap()[1], Datum::Bytes(medium));

        writer.end_search();
        assert_eq!(txn.rollback(&mut writer).unwrap(), 2);
        assert!(writer.search(&key, DuplicateSeek::Any, false).unwrap());
        assert_eq!(writer.current_datums().unwrap()[1], Datum::Bytes(small));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let (cache, _dir) = create_test_cache(8);
        let records = TupleDescriptor::new(vec![FieldDescriptor::new(FieldType::Varchar(2000))]);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();
        let big = vec![b'x'; 1500];
        assert!(matches!(
            writer.insert(&[DatumRef::Bytes(&big)]),
            Err(Error::TupleOverflow { .. })
        ));
    }

    #[test]
    fn test_txn_rollback_restores_tree() {
        let (cache, _dir) = create_test_cache(32);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), int_pairs(), vec![0], PageOwnerId(1));
        let mut writer = BTreeWriter::new(desc).unwrap();
        for k in 0..100 {
            writer.insert(&pair(k, 0)).unwrap();
        }

        let txn = Arc::new(LogicalTxn::new());
        writer.set_txn(Some(Arc::clone(&txn)));
        for k in 100..1500 {
            writer.insert(&pair(k, 1)).unwrap();
        }
        assert!(writer.search(&[DatumRef::Int32(5)], DuplicateSeek::Any, false).unwrap());
        writer.delete_current().unwrap();
        writer.end_search();
        assert_eq!(txn.action_count(), 1401);

        assert_eq!(txn.rollback(&mut writer).unwrap(), 1401);
        assert!(txn.is_empty());
        assert_eq!(count(&mut writer), 100);
        assert!(writer.search(&[DatumRef::Int32(5)], DuplicateSeek::Any, false).unwrap());
    }

    #[test]
    fn test_writers_share_root_created_up_front() {
        let (cache, _dir) = create_test_cache(64);
        let rootless = BTreeDescriptor::new(SegmentAccessor::new(&cache), int_pairs(), vec![0], PageOwnerId(1));

        // A root created lazily through one clone stays private to it.
        let mut early = BTreeWriter::new(rootless.clone()).unwrap();
        early.insert(&pair(-1, 0)).unwrap();
        assert!(early.root_page_id().is_valid());
        assert!(rootless.root_page_id().is_null());
        drop(early);

        let mut builder = BTreeBuilder::new(rootless, 1.0).unwrap();
        let root = builder.create_empty_root().unwrap();
        let desc = builder.descriptor().clone();
        std::thread::scope(|s| {
            for t in 0..2 {
                let desc = desc.clone();
                s.spawn(move || {
                    let mut writer = BTreeWriter::new(desc).unwrap();
                    for k in 0..2000 {
                        writer.insert(&pair(k * 2 + t, t)).unwrap();
                    }
                });
            }
        });

        let stats = BTreeVerifier::new(desc, true).verify().unwrap();
        assert_eq!(stats.root_page_id, root);
        assert_eq!(stats.n_tuples, 4000);
    }
}
