//! Bulk construction from sorted input, and truncation.
//!
//! # Build Levels
//! ```text
//!   level 2            [ r ]
//!                     /     \
//!   level 1       [ a ]────►[ b ]          one open node per level;
//!                 / | \      / \           a finished node pushes
//!   level 0    [ ]─►[ ]─►[ ]─►[ ]─►[ ]     (high key, page) upward
//! ```
//! Records are appended left to right. Each level keeps one open node; when
//! it is complete the next node is started, linked as its right sibling and
//! successor, and the finished node's parent record goes one level up.
//!
//! How many records a node takes depends on the [`BuildStrategy`].

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use tracing::{debug, trace};

use crate::buffer::{LockMode, PageGuard};
use crate::common::{Error, PageId, Result};
use crate::tuple::Datum;

use super::node::{self, NODE_HEADER_SIZE};
use super::{BTreeDescriptor, BTreeWriter, Capacity, NodeAccessor};

/// How records are distributed over the nodes of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Fixed-width leaves and non-leaves: node counts per level are known
    /// up front and records are spread evenly.
    Balanced,
    /// Variable-width leaves, fixed-width non-leaves: leaves fill by bytes
    /// while their parent records spool to a temporary file; the upper
    /// levels are then built balanced.
    TwoPass,
    /// Variable-width everywhere: every level fills by bytes, leaving a
    /// fill-factor margin free, and grows a new level on demand.
    Unbalanced,
}

/// Entry counts of one balanced level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelPlan {
    total: usize,
    n_nodes: usize,
}

impl LevelPlan {
    /// Entries node `j` takes. Targets are rounded from the running total
    /// so the remainder spreads over the level instead of piling up at its
    /// end.
    fn target(&self, j: usize) -> usize {
        let fanout = self.total as f64 / self.n_nodes as f64;
        let at = |j: usize| (0.5 + fanout * j as f64).floor() as usize;
        if j + 1 >= self.n_nodes {
            self.total.saturating_sub(at(j))
        } else {
            at(j + 1) - at(j)
        }
    }
}

/// Bulk loader for one tree.
///
/// # Example
/// ```
/// use pagetree::buffer::Cache;
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::index::btree::{BTreeBuilder, BTreeDescriptor, BTreeVerifier, BuildStrategy};
/// use pagetree::storage::{DiskManager, SegmentAccessor};
/// use pagetree::tuple::{Datum, FieldDescriptor, FieldType, TupleDescriptor};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = Cache::new(
///     CacheConfig::with_pool_size(32),
///     DiskManager::create(dir.path().join("build.db")).unwrap(),
/// )
/// .unwrap();
/// let records = TupleDescriptor::new(vec![
///     FieldDescriptor::new(FieldType::Int64),
///     FieldDescriptor::new(FieldType::Int64),
/// ]);
/// let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), records, vec![0], PageOwnerId(1));
///
/// let mut builder = BTreeBuilder::new(desc, 0.9).unwrap();
/// assert_eq!(builder.strategy(), BuildStrategy::Balanced);
/// builder
///     .build(1000, (0..1000i64).map(|k| vec![Datum::Int64(k), Datum::Int64(k * k)]))
///     .unwrap();
///
/// let stats = BTreeVerifier::new(builder.descriptor().clone(), true).verify().unwrap();
/// assert_eq!(stats.n_tuples, 1000);
/// assert_eq!(stats.n_levels, 2);
/// ```
#[derive(Debug)]
pub struct BTreeBuilder<'c> {
    descriptor: BTreeDescriptor<'c>,
    leaf: NodeAccessor,
    non_leaf: NodeAccessor,
    fill_factor: f64,
}

impl<'c> BTreeBuilder<'c> {
    /// # Errors
    /// `Error::InvalidArgument` for a bad key projection or a fill factor
    /// outside `(0, 1]`.
    pub fn new(descriptor: BTreeDescriptor<'c>, fill_factor: f64) -> Result<Self> {
        descriptor.validate()?;
        if !(fill_factor > 0.0 && fill_factor <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "fill factor {fill_factor} outside (0, 1]"
            )));
        }
        Ok(Self {
            leaf: descriptor.leaf_accessor(),
            non_leaf: descriptor.non_leaf_accessor(),
            descriptor,
            fill_factor,
        })
    }

    pub fn descriptor(&self) -> &BTreeDescriptor<'c> {
        &self.descriptor
    }

    pub fn fill_factor(&self) -> f64 {
        self.fill_factor
    }

    pub fn strategy(&self) -> BuildStrategy {
        match (self.leaf.is_fixed_width(), self.non_leaf.is_fixed_width()) {
            (true, true) => BuildStrategy::Balanced,
            (false, true) => BuildStrategy::TwoPass,
            _ => BuildStrategy::Unbalanced,
        }
    }

    fn accessor(&self, height: u32) -> &NodeAccessor {
        if height == 0 {
            &self.leaf
        } else {
            &self.non_leaf
        }
    }

    /// Entries a balanced node at `height` takes at this fill factor.
    fn entries_per_node(&self, height: u32) -> usize {
        let usable = self.descriptor.segment().usable_page_size();
        let floor = if height == 0 { 1 } else { 2 };
        let capacity = self
            .accessor(height)
            .fixed_capacity(usable)
            .unwrap_or(floor)
            .max(floor);
        ((capacity as f64 * self.fill_factor) as usize).clamp(floor, capacity)
    }

    /// Plans for the levels from `height` up to a single root node.
    fn plan_levels(&self, mut total: usize, mut height: u32) -> Vec<LevelPlan> {
        let mut plans = Vec::new();
        loop {
            let n_nodes = total.div_ceil(self.entries_per_node(height)).max(1);
            plans.push(LevelPlan { total, n_nodes });
            if n_nodes == 1 {
                return plans;
            }
            total = n_nodes;
            height += 1;
        }
    }

    /// Free bytes byte-filled nodes keep.
    fn reserve(&self) -> usize {
        let data = self.descriptor.segment().usable_page_size() - NODE_HEADER_SIZE;
        ((1.0 - self.fill_factor) * data as f64) as usize
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the tree from `rows`, which must be sorted by key.
    ///
    /// `n_tuples` must be exact for [`BuildStrategy::Balanced`] and is a
    /// hint otherwise. A tree that already has a root keeps its root page
    /// id; its old content is discarded, so truncate it first.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` for unsorted input or a wrong row count
    /// - `Error::TupleOverflow` for a record too large for any node
    ///
    /// Pages and the spool file held by unfinished levels are released
    /// before the error is returned.
    pub fn build<I>(&mut self, n_tuples: usize, rows: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[Datum]>,
    {
        let strategy = self.strategy();
        let top = {
            let mut build = Build::new(self, strategy, n_tuples)?;
            for row in rows {
                build.add(row.as_ref())?;
            }
            build.finish()?
        };
        let levels = top.as_ref().map_or(1, |page| node::height(page.data()) + 1);
        let root = self.swap_root(top)?;
        debug!(
            target: "pagetree::btree::builder",
            root = root.0,
            ?strategy,
            levels,
            n_tuples,
            "tree built"
        );
        Ok(())
    }

    /// Install the top node of a finished build as the root.
    ///
    /// Without a root, the top node simply becomes it. Otherwise the top
    /// node's content is swapped into the existing root page and the
    /// temporary page is freed, so the root page id stays valid.
    pub fn swap_root(&mut self, top: Option<PageGuard<'c>>) -> Result<PageId> {
        let segment = self.descriptor.segment();
        let root = self.descriptor.root_page_id();
        let Some(mut top) = top else {
            if root.is_null() {
                return self.create_empty_root();
            }
            let mut page = segment.lock_page(root, LockMode::Exclusive)?;
            self.leaf.clear_node(page.data_mut(), 0);
            return Ok(root);
        };

        if root.is_null() {
            let root = top.page_id();
            self.descriptor.set_root_page_id(root);
            return Ok(root);
        }

        let scratch = top.page_id();
        {
            let mut page = segment.lock_page(root, LockMode::Exclusive)?;
            page.swap_data(&mut top);
        }
        drop(top);
        segment.deallocate_page(scratch)?;
        trace!(target: "pagetree::btree::builder", root = root.0, scratch = scratch.0, "root swapped");
        Ok(root)
    }

    /// Give a rootless tree an empty leaf root.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if the tree already has a root.
    pub fn create_empty_root(&mut self) -> Result<PageId> {
        if self.descriptor.root_page_id().is_valid() {
            return Err(Error::InvalidArgument("tree already has a root".into()));
        }
        let mut page = self.descriptor.segment().new_page(self.descriptor.owner())?;
        self.leaf.clear_node(page.data_mut(), 0);
        let root = page.page_id();
        self.descriptor.set_root_page_id(root);
        Ok(root)
    }

    // ========================================================================
    // Truncate
    // ========================================================================

    /// Free every page of the tree except, unless `rootless`, the root,
    /// which becomes an empty leaf.
    ///
    /// With `leaf_page_id_projection`, each leaf record's field at that
    /// index is taken as the first page of an external chain (NULL for
    /// none) and the chain is freed first.
    ///
    /// Returns the number of pages freed. No other reader or writer may use
    /// the tree meanwhile.
    pub fn truncate(&mut self, rootless: bool, leaf_page_id_projection: Option<usize>) -> Result<usize> {
        let segment = self.descriptor.segment();
        let root = self.descriptor.root_page_id();
        if root.is_null() {
            return Ok(0);
        }

        let leftmost = self.leftmost_path(root)?;
        let mut freed = 0;
        if let Some(field) = leaf_page_id_projection {
            if let Some(&first_leaf) = leftmost.last() {
                freed += self.free_external_pages(first_leaf, field)?;
            }
        }

        // Every level below the root is one successor chain.
        for &first in leftmost.iter().skip(1) {
            freed += segment.deallocate_page_range(first)?;
        }

        if rootless {
            segment.deallocate_page(root)?;
            self.descriptor.set_root_page_id(PageId::NULL);
            freed += 1;
        } else {
            let mut page = segment.lock_page(root, LockMode::Exclusive)?;
            self.leaf.clear_node(page.data_mut(), 0);
        }
        debug!(target: "pagetree::btree::builder", root = root.0, rootless, freed, "tree truncated");
        Ok(freed)
    }

    /// Leftmost page of each level, root first.
    fn leftmost_path(&self, root: PageId) -> Result<Vec<PageId>> {
        let segment = self.descriptor.segment();
        let mut path = vec![root];
        let mut page_id = root;
        loop {
            let page = segment.lock_page(page_id, LockMode::Shared)?;
            let data = page.data();
            if !node::is_node(data) {
                return Err(Error::corruption(page_id, "bad node magic"));
            }
            if node::is_leaf(data) {
                return Ok(path);
            }
            if node::entry_count(data) == 0 {
                return Err(Error::corruption(page_id, "empty non-leaf node"));
            }
            page_id = self.non_leaf.child(data, 0);
            path.push(page_id);
        }
    }

    fn free_external_pages(&self, first_leaf: PageId, field: usize) -> Result<usize> {
        if field >= self.descriptor.tuple_descriptor().len() {
            return Err(Error::InvalidArgument(format!(
                "page id field {field} out of range"
            )));
        }
        let segment = self.descriptor.segment();
        let tuple = self.leaf.shape().tuple();
        let mut freed = 0;
        let mut leaf = first_leaf;
        while leaf.is_valid() {
            let (chains, sibling) = {
                let page = segment.lock_page(leaf, LockMode::Shared)?;
                let data = page.data();
                let chains: Vec<PageId> = (0..node::entry_count(data))
                    .filter_map(|i| tuple.field(self.leaf.entry(data, i), field).as_u64())
                    .map(PageId)
                    .filter(PageId::is_valid)
                    .collect();
                (chains, node::right_sibling(data))
            };
            for first in chains {
                freed += segment.deallocate_page_range(first)?;
            }
            leaf = sibling;
        }
        Ok(freed)
    }
}

// ============================================================================
// Build state
// ============================================================================

/// One level under construction.
struct BuildLevel<'c> {
    height: u32,
    /// Open node.
    page: Option<PageGuard<'c>>,
    plan: Option<LevelPlan>,
    /// Nodes started so far.
    nodes: usize,
    /// Entries in the open node.
    in_node: usize,
}

/// Parent records of leaves, held until the leaf count is known.
struct Spool {
    writer: BufWriter<File>,
    record_size: usize,
    count: usize,
}

impl Spool {
    fn new(record_size: usize) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(tempfile::tempfile()?),
            record_size,
            count: 0,
        })
    }

    fn push(&mut self, record: &[u8]) -> Result<()> {
        debug_assert_eq!(record.len(), self.record_size);
        self.writer.write_all(record)?;
        self.count += 1;
        Ok(())
    }

    fn into_reader(self) -> Result<(BufReader<File>, usize, usize)> {
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        Ok((BufReader::new(file), self.record_size, self.count))
    }
}

struct Build<'b, 'c> {
    builder: &'b BTreeBuilder<'c>,
    levels: Vec<BuildLevel<'c>>,
    /// Balanced plans by level; missing levels fill by bytes.
    plans: Vec<Option<LevelPlan>>,
    spool: Option<Spool>,
    reserve: usize,
    expected: Option<usize>,
    rows: usize,
    last: Vec<u8>,
}

impl<'b, 'c> Build<'b, 'c> {
    fn new(builder: &'b BTreeBuilder<'c>, strategy: BuildStrategy, n_tuples: usize) -> Result<Self> {
        let (plans, spool, expected) = match strategy {
            BuildStrategy::Balanced => (
                builder.plan_levels(n_tuples, 0).into_iter().map(Some).collect(),
                None,
                Some(n_tuples),
            ),
            BuildStrategy::TwoPass => {
                let record_size = builder.non_leaf.shape().tuple().fixed_size().unwrap_or(0);
                (Vec::new(), Some(Spool::new(record_size)?), None)
            }
            BuildStrategy::Unbalanced => (Vec::new(), None, None),
        };
        Ok(Self {
            builder,
            levels: Vec::new(),
            plans,
            spool,
            reserve: builder.reserve(),
            expected,
            rows: 0,
            last: Vec::new(),
        })
    }

    fn add(&mut self, row: &[Datum]) -> Result<()> {
        let leaf = &self.builder.leaf;
        let record = leaf.shape().tuple().marshal_values(row)?;
        let max = BTreeWriter::max_record_size();
        if record.len() > max {
            return Err(Error::TupleOverflow {
                size: record.len(),
                max,
            });
        }
        if self.rows > 0 && leaf.compare_entries(&self.last, &record).is_gt() {
            return Err(Error::InvalidArgument(format!(
                "build input out of order at row {}",
                self.rows
            )));
        }
        if self.expected.is_some_and(|n| self.rows >= n) {
            return Err(Error::InvalidArgument(format!(
                "more rows than the {} announced",
                self.rows
            )));
        }
        self.push(0, &record)?;
        self.rows += 1;
        self.last = record;
        Ok(())
    }

    fn push(&mut self, level: usize, record: &[u8]) -> Result<()> {
        if level == self.levels.len() {
            self.levels.push(BuildLevel {
                height: level as u32,
                page: None,
                plan: self.plans.get(level).copied().flatten(),
                nodes: 0,
                in_node: 0,
            });
        }
        if !self.has_room(level, record.len()) {
            self.start_node(level)?;
        }

        let accessor = self.builder.accessor(level as u32);
        let lvl = &mut self.levels[level];
        let Some(page) = lvl.page.as_mut() else {
            return Err(Error::InvalidArgument("build level has no open node".into()));
        };
        if accessor.capacity(page.data(), record.len()) != Capacity::CanFit {
            return Err(Error::corruption(page.page_id(), "build node overflow"));
        }
        let n = node::entry_count(page.data());
        accessor.insert_entry(page.data_mut(), n, record);
        lvl.in_node += 1;
        Ok(())
    }

    fn has_room(&self, level: usize, size: usize) -> bool {
        let lvl = &self.levels[level];
        let Some(page) = lvl.page.as_ref() else {
            return false;
        };
        match lvl.plan {
            Some(plan) => lvl.in_node < plan.target(lvl.nodes - 1),
            None => {
                let accessor = self.builder.accessor(lvl.height);
                lvl.in_node == 0 || accessor.capacity(page.data(), size + self.reserve) == Capacity::CanFit
            }
        }
    }

    /// Open a new node at `level`, linking and closing the previous one.
    fn start_node(&mut self, level: usize) -> Result<()> {
        let builder = self.builder;
        let descriptor = &builder.descriptor;
        let accessor = builder.accessor(level as u32);
        let mut page = descriptor.segment().new_page(descriptor.owner())?;
        accessor.clear_node(page.data_mut(), level as u32);

        let lvl = &mut self.levels[level];
        let previous = lvl.page.replace(page);
        lvl.nodes += 1;
        lvl.in_node = 0;

        if let Some(mut previous) = previous {
            let next = lvl.page.as_ref().map_or(PageId::NULL, PageGuard::page_id);
            node::set_right_sibling(previous.data_mut(), next);
            previous.set_successor(next);
            let parent = self.parent_record(level, &previous)?;
            drop(previous);
            self.emit(level, &parent)?;
        }
        Ok(())
    }

    fn parent_record(&self, level: usize, page: &PageGuard<'_>) -> Result<Vec<u8>> {
        let accessor = self.builder.accessor(level as u32);
        let data = page.data();
        let n = node::entry_count(data);
        if n == 0 {
            return Err(Error::corruption(page.page_id(), "empty build node"));
        }
        trace!(target: "pagetree::btree::builder", page = page.page_id().0, level, entries = n, "node built");
        self.builder
            .non_leaf
            .non_leaf_record(&accessor.key(data, n - 1), page.page_id())
    }

    /// Send a finished node's parent record up.
    fn emit(&mut self, level: usize, record: &[u8]) -> Result<()> {
        if level == 0 {
            if let Some(spool) = self.spool.as_mut() {
                return spool.push(record);
            }
        }
        self.push(level + 1, record)
    }

    /// Close every level and return the top node, or `None` for no input.
    fn finish(mut self) -> Result<Option<PageGuard<'c>>> {
        if let Some(expected) = self.expected {
            if self.rows != expected {
                return Err(Error::InvalidArgument(format!(
                    "{} rows built but {expected} announced",
                    self.rows
                )));
            }
        }

        let mut level = 0;
        while level < self.levels.len() {
            let top = level + 1 == self.levels.len()
                && self.levels[level].nodes == 1
                && self.spool.as_ref().map_or(true, |spool| spool.count == 0);
            let Some(page) = self.levels[level].page.take() else {
                return Err(Error::InvalidArgument("build level has no open node".into()));
            };
            if top {
                return Ok(Some(page));
            }

            let parent = self.parent_record(level, &page)?;
            drop(page);
            self.emit(level, &parent)?;
            if level == 0 {
                self.replay_spool()?;
            }
            level += 1;
        }
        Ok(None)
    }

    /// Build the levels above the leaves from the spooled parent records.
    fn replay_spool(&mut self) -> Result<()> {
        let Some(spool) = self.spool.take() else {
            return Ok(());
        };
        let (mut reader, record_size, count) = spool.into_reader()?;
        self.plans = std::iter::once(None)
            .chain(self.builder.plan_levels(count, 1).into_iter().map(Some))
            .collect();

        let mut record = vec![0u8; record_size];
        for _ in 0..count {
            reader.read_exact(&mut record)?;
            self.push(1, &record)?;
        }
        Ok(())
    }
}
