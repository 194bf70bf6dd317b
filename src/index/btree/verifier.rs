//! Whole-tree consistency check.
//!
//! Walks the tree depth first, one node lock at a time, checking that
//! - every page carries the node magic
//! - heights decrease by one per level down to 0 at every leaf
//! - keys are ordered within each node and lie inside the bounds the parent
//!   entries give them
//! - each node's right sibling matches its page successor link
//! - each level is one sibling chain, ending at NULL
//!
//! In non-strict mode a node whose sibling is not the next node reached from
//! the parent is tolerated as long as the chain reaches it; concurrent
//! splits can produce exactly that.

use std::cmp::Ordering;

use tracing::{debug, error};

use crate::buffer::LockMode;
use crate::common::{Error, PageId, Result};
use crate::tuple::{compare_keys, Datum, DatumRef};

use super::node;
use super::{BTreeDescriptor, NodeAccessor};

/// Aggregate shape of a verified tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BTreeStatistics {
    pub root_page_id: PageId,
    pub n_levels: usize,
    pub n_non_leaf_nodes: usize,
    pub n_leaf_nodes: usize,
    pub n_tuples: usize,
    /// Distinct values of the first key field, counted over the sorted scan.
    pub n_unique_keys: usize,
}

type Key = Vec<Datum>;

/// Keys and children of one non-leaf node, copied out so its lock can be
/// released before descending.
struct NodeCopy {
    keys: Vec<Key>,
    children: Vec<PageId>,
    sibling: PageId,
}

#[derive(Debug)]
pub struct BTreeVerifier<'c> {
    descriptor: BTreeDescriptor<'c>,
    leaf: NodeAccessor,
    non_leaf: NodeAccessor,
    strict: bool,
    /// Next page expected at each level, by height; `None` until the
    /// level's first node is seen.
    expected_next: Vec<Option<PageId>>,
    stats: BTreeStatistics,
    last_first_field: Option<Datum>,
}

impl<'c> BTreeVerifier<'c> {
    pub fn new(descriptor: BTreeDescriptor<'c>, strict: bool) -> Self {
        Self {
            leaf: descriptor.leaf_accessor(),
            non_leaf: descriptor.non_leaf_accessor(),
            descriptor,
            strict,
            expected_next: Vec::new(),
            stats: BTreeStatistics::default(),
            last_first_field: None,
        }
    }

    /// Check the whole tree.
    ///
    /// # Errors
    /// `Error::Corruption` naming the first inconsistent page.
    pub fn verify(&mut self) -> Result<BTreeStatistics> {
        let root = self.descriptor.root_page_id();
        self.stats = BTreeStatistics {
            root_page_id: root,
            ..BTreeStatistics::default()
        };
        self.last_first_field = None;
        if root.is_null() {
            return Ok(self.stats.clone());
        }

        let height = {
            let page = self.descriptor.segment().lock_page(root, LockMode::Shared)?;
            self.check_magic(root, page.data())?;
            node::height(page.data())
        };
        self.expected_next = vec![None; height as usize + 1];
        self.stats.n_levels = height as usize + 1;

        self.visit(root, height, None, None, true)?;

        if self.strict {
            for (level, next) in self.expected_next.iter().enumerate() {
                if let Some(next) = next.filter(PageId::is_valid) {
                    return Err(self.fail(next, format!("level {level} continues past its last node")));
                }
            }
        }
        debug!(
            target: "pagetree::btree::verifier",
            root = root.0,
            levels = self.stats.n_levels,
            tuples = self.stats.n_tuples,
            "tree verified"
        );
        Ok(self.stats.clone())
    }

    /// Verify the subtree at `page_id`, whose keys must lie in
    /// `(lower, upper]`. `rightmost` marks the right edge of the tree.
    fn visit(
        &mut self,
        page_id: PageId,
        height: u32,
        lower: Option<&[Datum]>,
        upper: Option<&[Datum]>,
        rightmost: bool,
    ) -> Result<()> {
        self.check_chain(page_id, height)?;

        let copy = {
            let page = self.descriptor.segment().lock_page(page_id, LockMode::Shared)?;
            let data = page.data();
            self.check_magic(page_id, data)?;
            if node::height(data) != height {
                return Err(self.fail(
                    page_id,
                    format!("height {} where {height} was expected", node::height(data)),
                ));
            }
            let sibling = node::right_sibling(data);
            if sibling != page.successor() {
                return Err(self.fail(
                    page_id,
                    format!("right sibling {sibling} disagrees with successor {}", page.successor()),
                ));
            }
            if rightmost && sibling.is_valid() && self.strict {
                return Err(self.fail(page_id, "rightmost node has a right sibling"));
            }

            let accessor = self.accessor(height);
            let n = node::entry_count(data);
            let keys: Vec<Key> = (0..n)
                .map(|i| accessor.key(data, i).into_iter().map(DatumRef::to_owned).collect())
                .collect();
            let children: Vec<PageId> = if height == 0 {
                Vec::new()
            } else {
                (0..n).map(|i| accessor.child(data, i)).collect()
            };
            NodeCopy {
                keys,
                children,
                sibling,
            }
        };

        self.expected_next[height as usize] = Some(copy.sibling);
        self.check_keys(page_id, height, &copy.keys, lower, upper, rightmost)?;

        if height == 0 {
            self.stats.n_leaf_nodes += 1;
            self.count_leaf(&copy.keys);
            return Ok(());
        }
        self.stats.n_non_leaf_nodes += 1;
        if copy.children.is_empty() {
            return Err(self.fail(page_id, "non-leaf node without entries"));
        }

        let last = copy.children.len() - 1;
        for (i, &child) in copy.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(copy.keys[i - 1].as_slice()) };
            let child_rightmost = rightmost && i == last;
            let child_upper = if child_rightmost { None } else { Some(copy.keys[i].as_slice()) };
            self.visit(child, height - 1, child_lower, child_upper, child_rightmost)?;
        }
        Ok(())
    }

    fn accessor(&self, height: u32) -> &NodeAccessor {
        if height == 0 {
            &self.leaf
        } else {
            &self.non_leaf
        }
    }

    /// The node must be the next one in its level's chain.
    fn check_chain(&self, page_id: PageId, height: u32) -> Result<()> {
        let expected = match self.expected_next[height as usize] {
            None => return Ok(()),
            Some(expected) if expected == page_id => return Ok(()),
            Some(expected) => expected,
        };
        if self.strict || expected.is_null() {
            return Err(self.fail(
                page_id,
                format!("reached from parent but the level chain points at {expected}"),
            ));
        }

        // Follow the chain to the node; anything skipped was split off
        // after its parent entry was read.
        let segment = self.descriptor.segment();
        let mut next = expected;
        while next.is_valid() && next != page_id {
            next = segment.get_page_successor(next)?;
        }
        if next != page_id {
            return Err(self.fail(page_id, "not reachable along its level chain"));
        }
        Ok(())
    }

    fn check_keys(
        &self,
        page_id: PageId,
        height: u32,
        keys: &[Key],
        lower: Option<&[Datum]>,
        upper: Option<&[Datum]>,
        rightmost: bool,
    ) -> Result<()> {
        // The last key of a rightmost non-leaf node stands for +infinity.
        let checked = if height > 0 && rightmost {
            keys.len().saturating_sub(1)
        } else {
            keys.len()
        };
        let keys = &keys[..checked];

        for pair in keys.windows(2) {
            if compare(&pair[0], &pair[1]) == Ordering::Greater {
                return Err(self.fail(page_id, "keys out of order within node"));
            }
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if compare(first, lower) == Ordering::Less {
                return Err(self.fail(page_id, "key below the parent's lower bound"));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if compare(last, upper) == Ordering::Greater {
                return Err(self.fail(page_id, "key above the parent's upper bound"));
            }
        }
        Ok(())
    }

    fn count_leaf(&mut self, keys: &[Key]) {
        self.stats.n_tuples += keys.len();
        for first in keys.iter().filter_map(|key| key.first()) {
            if self.last_first_field.as_ref() != Some(first) {
                self.stats.n_unique_keys += 1;
                self.last_first_field = Some(first.clone());
            }
        }
    }

    fn check_magic(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if node::is_node(data) {
            Ok(())
        } else {
            Err(self.fail(page_id, format!("bad node magic {:#x}", node::magic(data))))
        }
    }

    fn fail(&self, page_id: PageId, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        error!(target: "pagetree::btree::verifier", page = page_id.0, %reason, "tree verification failed");
        Error::corruption(page_id, reason)
    }
}

fn compare(a: &[Datum], b: &[Datum]) -> Ordering {
    let a: Vec<DatumRef<'_>> = a.iter().map(Datum::as_ref).collect();
    let b: Vec<DatumRef<'_>> = b.iter().map(Datum::as_ref).collect();
    compare_keys(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageOwnerId;
    use crate::index::btree::test_util::*;
    use crate::index::btree::BTreeBuilder;
    use crate::storage::SegmentAccessor;

    fn build<'c>(segment: SegmentAccessor<'c>, n: i32) -> BTreeDescriptor<'c> {
        let desc = BTreeDescriptor::new(segment, int_pairs(), vec![0], PageOwnerId(1));
        let mut builder = BTreeBuilder::new(desc, 1.0).unwrap();
        builder
            .build(n as usize, (0..n).map(|k| vec![Datum::Int32(k / 3), Datum::Int32(k)]))
            .unwrap();
        builder.descriptor().clone()
    }

    #[test]
    fn test_statistics() {
        let (cache, _dir) = create_test_cache(32);
        let desc = build(SegmentAccessor::new(&cache), 3000);
        let stats = BTreeVerifier::new(desc.clone(), true).verify().unwrap();
        assert_eq!(stats.root_page_id, desc.root_page_id());
        assert_eq!(stats.n_levels, 2);
        assert_eq!(stats.n_non_leaf_nodes, 1);
        assert_eq!(stats.n_leaf_nodes, 6);
        assert_eq!(stats.n_tuples, 3000);
        assert_eq!(stats.n_unique_keys, 1000);
    }

    #[test]
    fn test_rootless_tree_is_empty() {
        let (cache, _dir) = create_test_cache(4);
        let desc = BTreeDescriptor::new(SegmentAccessor::new(&cache), int_pairs(), vec![0], PageOwnerId(1));
        let stats = BTreeVerifier::new(desc, true).verify().unwrap();
        assert_eq!(stats, BTreeStatistics::default());
        assert!(stats.root_page_id.is_null());
    }

    #[test]
    fn test_detects_out_of_order_keys() {
        let (cache, _dir) = create_test_cache(32);
        let segment = SegmentAccessor::new(&cache);
        let desc = build(segment, 3000);
        let leaf = desc.leaf_accessor();

        let first_leaf = {
            let root = segment.lock_page(desc.root_page_id(), LockMode::Shared).unwrap();
            desc.non_leaf_accessor().child(root.data(), 0)
        };
        {
            let mut page = segment.lock_page(first_leaf, LockMode::Exclusive).unwrap();
            let last = node::entry_count(page.data()) - 1;
            let record = leaf.shape().tuple().marshal(&[DatumRef::Int32(99_999), DatumRef::Int32(0)]).unwrap();
            leaf.deallocate_entry(page.data_mut(), 0);
            leaf.insert_entry(page.data_mut(), last - 1, &record);
        }

        let err = BTreeVerifier::new(desc, true).verify().unwrap_err();
        assert!(matches!(err, Error::Corruption { page_id, .. } if page_id == first_leaf));
    }

    #[test]
    fn test_detects_bad_magic() {
        let (cache, _dir) = create_test_cache(32);
        let segment = SegmentAccessor::new(&cache);
        let desc = build(segment, 3000);
        {
            let mut root = segment.lock_page(desc.root_page_id(), LockMode::Exclusive).unwrap();
            root.data_mut()[0] ^= 0xFF;
        }
        assert!(matches!(
            BTreeVerifier::new(desc, false).verify(),
            Err(Error::Corruption { .. })
        ));
    }
}
