//! B-tree reader - Blink-style search and scans.
//!
//! # Search Protocol
//! ```text
//!            ┌─────────┐
//!            │  root   │  lock, search, note terminator = next child
//!            └────┬────┘  (or the right sibling's first child); release
//!                         before locking the child
//!       ┌─────────┴──┐
//!  ┌────▼───┐   ┌────▼───┐
//!  │ node A ├──►│ node B │  key beyond A and A's sibling is not the
//!  └────────┘   └────────┘  terminator: A split after we left the
//!                           parent, so move right to B
//! ```
//! Parents are released before children are locked, so a split can happen
//! between the two. The right-link walk recovers from it; leaf-level right
//! moves are lock coupled.
//!
//! A height-0 root is both root and leaf. If the root lock mode is weaker
//! than the leaf lock mode, the reader tries an in-place upgrade and
//! otherwise restarts with a stronger root lock.

use smallvec::SmallVec;
use tracing::{error, trace};

use crate::buffer::{LockMode, PageGuard};
use crate::common::{Error, PageId, Result};
use crate::tuple::{Datum, DatumRef};

use super::node;
use super::{BTreeDescriptor, DuplicateSeek, NodeAccessor, MAX_DEPTH};

/// Lock strength per tree level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LockModes {
    pub(crate) root: LockMode,
    /// Root mode to return to once the root is no longer a leaf.
    pub(crate) root_default: LockMode,
    pub(crate) non_leaf: LockMode,
    pub(crate) leaf: LockMode,
}

impl LockModes {
    pub(crate) const READ: LockModes = LockModes {
        root: LockMode::Shared,
        root_default: LockMode::Shared,
        non_leaf: LockMode::Shared,
        leaf: LockMode::Shared,
    };

    pub(crate) const WRITE: LockModes = LockModes {
        root: LockMode::Upgradable,
        root_default: LockMode::Upgradable,
        non_leaf: LockMode::Shared,
        leaf: LockMode::Exclusive,
    };
}

/// Where a descent should end up.
#[derive(Clone, Copy)]
pub(crate) enum Target<'k> {
    Key(&'k [DatumRef<'k>], DuplicateSeek),
    First,
    Last,
}

/// Outcome of one descent attempt.
pub(crate) enum Descent {
    Positioned(bool),
    /// The root lock mode was too weak; try again.
    Retry,
}

/// Read-only cursor over one tree.
///
/// A positioned reader keeps its current leaf locked until the next search,
/// [`end_search`](Self::end_search) or drop.
///
/// # Example
/// ```
/// use pagetree::buffer::Cache;
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::index::btree::{BTreeDescriptor, BTreeReader, BTreeWriter, DuplicateSeek};
/// use pagetree::storage::{DiskManager, SegmentAccessor};
/// use pagetree::tuple::{Datum, DatumRef, FieldDescriptor, FieldType, TupleDescriptor};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = Cache::new(
///     CacheConfig::with_pool_size(16),
///     DiskManager::create(dir.path().join("reader.db")).unwrap(),
/// )
/// .unwrap();
/// let records = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int32),
///     FieldDescriptor::new(FieldType::Int32),
/// ]);
/// let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
///
/// let mut writer = BTreeWriter::new(desc).unwrap();
/// for k in [5, 1, 3] {
///     writer.insert(&[DatumRef::Int32(k), DatumRef::Int32(k * 10)]).unwrap();
/// }
/// let mut reader = BTreeReader::new(writer.descriptor().clone()).unwrap();
/// drop(writer);
///
/// assert!(reader.search(&[DatumRef::Int32(3)], DuplicateSeek::Any, false).unwrap());
/// assert_eq!(reader.current_datums().unwrap(), vec![Datum::Int32(3), Datum::Int32(30)]);
/// assert!(!reader.search(&[DatumRef::Int32(4)], DuplicateSeek::Any, true).unwrap());
/// assert_eq!(reader.current_datums().unwrap()[0], Datum::Int32(5));
/// ```
pub struct BTreeReader<'c> {
    pub(crate) descriptor: BTreeDescriptor<'c>,
    pub(crate) leaf: NodeAccessor,
    pub(crate) non_leaf: NodeAccessor,
    pub(crate) modes: LockModes,
    pub(crate) page: Option<PageGuard<'c>>,
    pub(crate) pos: usize,
    pub(crate) singular: bool,
    /// Non-leaf pages visited by the last descent, root first.
    pub(crate) path: SmallVec<[PageId; MAX_DEPTH]>,
    /// The entry at `pos` was deleted; the next `search_next` stays put.
    pub(crate) compensate_next: bool,
}

impl<'c> BTreeReader<'c> {
    /// # Errors
    /// `Error::InvalidArgument` if the descriptor's key projection is bad.
    pub fn new(descriptor: BTreeDescriptor<'c>) -> Result<Self> {
        Self::with_modes(descriptor, LockModes::READ)
    }

    pub(crate) fn with_modes(descriptor: BTreeDescriptor<'c>, modes: LockModes) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            leaf: descriptor.leaf_accessor(),
            non_leaf: descriptor.non_leaf_accessor(),
            descriptor,
            modes,
            page: None,
            pos: 0,
            singular: true,
            path: SmallVec::new(),
            compensate_next: false,
        })
    }

    pub fn descriptor(&self) -> &BTreeDescriptor<'c> {
        &self.descriptor
    }

    #[inline]
    pub fn root_page_id(&self) -> PageId {
        self.descriptor.root_page_id()
    }

    pub fn leaf_accessor(&self) -> &NodeAccessor {
        &self.leaf
    }

    /// `true` when not positioned on an entry.
    #[inline]
    pub fn is_singular(&self) -> bool {
        self.singular
    }

    /// Page and position of the current entry.
    pub fn position(&self) -> Option<(PageId, usize)> {
        if self.singular {
            return None;
        }
        self.page.as_ref().map(|page| (page.page_id(), self.pos))
    }

    /// Hold `page` and stand on entry `pos`.
    pub(crate) fn set_position(&mut self, page: PageGuard<'c>, pos: usize) {
        self.page = Some(page);
        self.pos = pos;
        self.singular = false;
        self.compensate_next = false;
    }

    /// Release the current leaf and become singular.
    pub fn end_search(&mut self) {
        self.page = None;
        self.singular = true;
        self.compensate_next = false;
    }

    /// Bytes of the current record.
    pub fn current_record(&self) -> Option<&[u8]> {
        if self.singular {
            return None;
        }
        let page = self.page.as_ref()?;
        (self.pos < node::entry_count(page.data())).then(|| self.leaf.entry(page.data(), self.pos))
    }

    pub fn current_values(&self) -> Option<Vec<DatumRef<'_>>> {
        let record = self.current_record()?;
        Some(self.leaf.shape().tuple().values(record))
    }

    pub fn current_datums(&self) -> Option<Vec<Datum>> {
        let record = self.current_record()?;
        Some(self.leaf.shape().tuple().to_datums(record))
    }

    // ========================================================================
    // Searches
    // ========================================================================

    /// Position on `key` (a full key or a key prefix).
    ///
    /// Returns `true` on an exact match, settling on the first, last or any
    /// duplicate per `seek`. Otherwise the reader settles on the least upper
    /// bound when `least_upper` is set, or on the greatest lower bound
    /// within the reached leaf, and is singular if there is none.
    pub fn search(
        &mut self,
        key: &[DatumRef<'_>],
        seek: DuplicateSeek,
        least_upper: bool,
    ) -> Result<bool> {
        let leaf_seek = match seek {
            DuplicateSeek::End => DuplicateSeek::Begin,
            other => other,
        };
        let mut found = self.locate(Target::Key(key, leaf_seek))?;
        if self.page.is_none() {
            return Ok(false);
        }

        if !found && self.at_leaf_end() {
            if self.next_leaf_starts_with(key)? {
                self.move_to_next_entry()?;
                found = true;
            } else if least_upper {
                self.move_to_next_entry()?;
                return Ok(false);
            }
        }

        if found {
            if seek == DuplicateSeek::End {
                self.skip_to_last_duplicate(key)?;
            }
            return Ok(true);
        }

        if !least_upper {
            // No backward links: a bound at position 0 stays where it is.
            if self.pos > 0 {
                self.pos -= 1;
            } else if self.at_leaf_end() {
                self.end_search();
            }
        }
        Ok(false)
    }

    /// Position on the first record of the tree.
    pub fn search_first(&mut self) -> Result<bool> {
        self.locate(Target::First)?;
        if self.page.is_none() {
            return Ok(false);
        }
        if self.at_leaf_end() {
            return self.move_to_next_entry();
        }
        Ok(true)
    }

    /// Position on the last record of the tree.
    ///
    /// There are no backward links, so if deletes emptied the rightmost
    /// leaf this reports `false` even though earlier leaves hold records.
    pub fn search_last(&mut self) -> Result<bool> {
        self.locate(Target::Last)?;
        let Some(page) = self.page.as_ref() else {
            return Ok(false);
        };
        let n = node::entry_count(page.data());
        if n == 0 {
            self.end_search();
            return Ok(false);
        }
        self.pos = n - 1;
        Ok(true)
    }

    /// Advance to the next record, following right siblings across empty
    /// leaves. At the end of the tree the reader becomes singular.
    pub fn search_next(&mut self) -> Result<bool> {
        if self.page.is_none() {
            self.singular = true;
            return Ok(false);
        }
        if std::mem::take(&mut self.compensate_next) {
            self.singular = false;
        } else {
            self.pos += 1;
        }
        if !self.at_leaf_end() {
            return Ok(true);
        }
        self.move_to_next_entry()
    }

    // ========================================================================
    // Internal: descent
    // ========================================================================

    /// Descend to the leaf for `target`, leaving it locked in `self.page`.
    ///
    /// Returns whether a key target was found in that leaf.
    pub(crate) fn locate(&mut self, target: Target<'_>) -> Result<bool> {
        loop {
            match self.try_locate(target)? {
                Descent::Positioned(found) => return Ok(found),
                Descent::Retry => continue,
            }
        }
    }

    fn try_locate(&mut self, target: Target<'_>) -> Result<Descent> {
        self.end_search();
        self.path.clear();

        let root = self.descriptor.root_page_id();
        if root.is_null() {
            return Ok(Descent::Positioned(false));
        }

        let mut page = self.lock_node(root, self.modes.root)?;
        if node::is_leaf(page.data()) {
            if !self.settle_root_leaf_mode(&mut page) {
                return Ok(Descent::Retry);
            }
        } else if self.modes.root != self.modes.root_default {
            self.modes.root = self.modes.root_default;
        }
        self.descend(page, PageId::NULL, target)
    }

    /// Continue a descent at `page`, which was reached through a parent
    /// entry whose successor child was `terminator`.
    pub(crate) fn descend(
        &mut self,
        mut page: PageGuard<'c>,
        mut terminator: PageId,
        target: Target<'_>,
    ) -> Result<Descent> {
        loop {
            let data = page.data();
            let n = node::entry_count(data);

            if node::is_leaf(data) {
                let (pos, found) = match target {
                    Target::Key(key, seek) => self.leaf.search(data, key, seek),
                    Target::First => (0, false),
                    Target::Last => (n.saturating_sub(1), false),
                };
                let sibling = node::right_sibling(data);
                let move_right = match target {
                    Target::Key(..) => pos == n && sibling.is_valid() && sibling != terminator,
                    Target::First => false,
                    Target::Last => sibling.is_valid(),
                };
                if move_right {
                    trace!(target: "pagetree::btree::reader", from = page.page_id().0, to = sibling.0, "leaf move right");
                    page = self.lock_coupled(page, sibling, self.modes.leaf)?;
                    continue;
                }

                self.page = Some(page);
                self.pos = pos;
                self.singular = false;
                return Ok(Descent::Positioned(found));
            }

            let sibling = node::right_sibling(data);
            let pos = match target {
                Target::Key(key, _) => self.non_leaf.search(data, key, DuplicateSeek::Begin).0,
                Target::First => 0,
                Target::Last if sibling.is_valid() => n,
                Target::Last => n.saturating_sub(1),
            };
            if pos >= n {
                if sibling.is_valid() && sibling != terminator {
                    trace!(target: "pagetree::btree::reader", from = page.page_id().0, to = sibling.0, "non-leaf move right");
                    let mode = page.mode();
                    page = self.lock_coupled(page, sibling, mode)?;
                    continue;
                }
                error!(target: "pagetree::btree::reader", page = page.page_id().0, "search key beyond the last non-leaf entry");
                return Err(Error::corruption(
                    page.page_id(),
                    "search key beyond the last non-leaf entry",
                ));
            }

            let child = self.non_leaf.child(data, pos);
            terminator = if pos + 1 < n {
                self.non_leaf.child(data, pos + 1)
            } else {
                self.first_child(sibling)?
            };
            let child_mode = if node::height(data) == 1 {
                self.modes.leaf
            } else {
                self.modes.non_leaf
            };
            if self.path.len() < MAX_DEPTH {
                self.path.push(page.page_id());
            }
            drop(page);
            page = self.lock_node(child, child_mode)?;
        }
    }

    /// Make the lock on a leaf root at least as strong as the leaf mode.
    ///
    /// Returns `false` if the descent must restart with a stronger root lock.
    fn settle_root_leaf_mode(&mut self, page: &mut PageGuard<'c>) -> bool {
        let wanted = self.modes.leaf;
        match (page.mode(), wanted) {
            (_, LockMode::Shared) | (LockMode::Exclusive, _) => true,
            (LockMode::Upgradable, LockMode::Upgradable) => true,
            (LockMode::Upgradable, LockMode::Exclusive) => {
                if page.try_upgrade() {
                    return true;
                }
                trace!(target: "pagetree::btree::reader", page = page.page_id().0, "root upgrade failed, relocking");
                self.modes.root = LockMode::Exclusive;
                false
            }
            (LockMode::Shared, _) => {
                self.modes.root = wanted;
                false
            }
        }
    }

    pub(crate) fn lock_node(&self, page_id: PageId, mode: LockMode) -> Result<PageGuard<'c>> {
        let page = self.descriptor.segment().lock_page(page_id, mode)?;
        if !node::is_node(page.data()) {
            error!(target: "pagetree::btree::reader", page = page_id.0, "not a b-tree node");
            return Err(Error::corruption(page_id, "bad node magic"));
        }
        Ok(page)
    }

    /// First child of the non-leaf `page_id`, or NULL for none.
    ///
    /// Called with the left neighbour still locked, so the child found is the
    /// page that followed the left neighbour's last child at that moment.
    fn first_child(&self, page_id: PageId) -> Result<PageId> {
        if page_id.is_null() {
            return Ok(PageId::NULL);
        }
        let page = self.lock_node(page_id, LockMode::Shared)?;
        let data = page.data();
        if node::entry_count(data) == 0 {
            return Ok(PageId::NULL);
        }
        Ok(self.non_leaf.child(data, 0))
    }

    /// Lock `next`, then release `current`.
    pub(crate) fn lock_coupled(
        &self,
        current: PageGuard<'c>,
        next: PageId,
        mode: LockMode,
    ) -> Result<PageGuard<'c>> {
        let page = self.lock_node(next, mode)?;
        drop(current);
        Ok(page)
    }

    // ========================================================================
    // Internal: leaf-level movement
    // ========================================================================

    pub(crate) fn at_leaf_end(&self) -> bool {
        match &self.page {
            Some(page) => self.pos >= node::entry_count(page.data()),
            None => true,
        }
    }

    /// Move to the first entry of the next non-empty leaf.
    ///
    /// Returns `false`, releasing the leaf, when the chain ends.
    pub(crate) fn move_to_next_entry(&mut self) -> Result<bool> {
        let Some(mut page) = self.page.take() else {
            self.singular = true;
            return Ok(false);
        };
        self.singular = true;
        loop {
            let sibling = node::right_sibling(page.data());
            if sibling.is_null() {
                return Ok(false);
            }
            page = self.lock_coupled(page, sibling, self.modes.leaf)?;
            if node::entry_count(page.data()) > 0 {
                self.page = Some(page);
                self.pos = 0;
                self.singular = false;
                return Ok(true);
            }
        }
    }

    /// Whether the first record after the current leaf matches `key`.
    ///
    /// Duplicates may straddle a leaf boundary, and deletes can leave a leaf
    /// whose entries all sort below its parent key.
    pub(crate) fn next_leaf_starts_with(&self, key: &[DatumRef<'_>]) -> Result<bool> {
        let Some(page) = self.page.as_ref() else {
            return Ok(false);
        };
        let mut sibling = node::right_sibling(page.data());
        let mut held: Option<PageGuard<'c>> = None;
        while sibling.is_valid() {
            let next = self.lock_node(sibling, LockMode::Shared)?;
            drop(held.take());
            let data = next.data();
            if node::entry_count(data) > 0 {
                let first = self.leaf.entry(data, 0);
                return Ok(self.leaf.shape().compare(first, key).is_eq());
            }
            sibling = node::right_sibling(data);
            held = Some(next);
        }
        Ok(false)
    }

    fn skip_to_last_duplicate(&mut self, key: &[DatumRef<'_>]) -> Result<()> {
        loop {
            let Some(page) = self.page.as_ref() else {
                return Ok(());
            };
            let data = page.data();
            let n = node::entry_count(data);
            if self.pos + 1 < n {
                if self.leaf.shape().compare(self.leaf.entry(data, self.pos + 1), key).is_eq() {
                    self.pos += 1;
                    continue;
                }
                return Ok(());
            }
            if !self.next_leaf_starts_with(key)? {
                return Ok(());
            }
            self.move_to_next_entry()?;
        }
    }
}

impl std::fmt::Debug for BTreeReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeReader")
            .field("root", &self.descriptor.root_page_id())
            .field("position", &self.position())
            .finish()
    }
}
