//! Rebuilding tree writers from a logical transaction.

use std::collections::HashMap;

use tracing::debug;

use crate::common::{Error, Result};
use crate::storage::SegmentAccessor;
use crate::txn::{LogicalTxn, LogicalTxnParticipant};

use super::{BTreeDescriptor, BTreeWriter};

/// Creates one [`BTreeWriter`] per logged participant, keyed by root page
/// id, from the descriptions a [`LogicalTxn`] carries.
///
/// # Example
/// ```
/// use std::sync::Arc;
///
/// use pagetree::buffer::Cache;
/// use pagetree::common::config::CacheConfig;
/// use pagetree::common::PageOwnerId;
/// use pagetree::index::btree::{BTreeDescriptor, BTreeRecoveryFactory, BTreeWriter};
/// use pagetree::storage::{DiskManager, SegmentAccessor};
/// use pagetree::tuple::{DatumRef, FieldDescriptor, FieldType, TupleDescriptor};
/// use pagetree::txn::LogicalTxn;
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = Cache::new(
///     CacheConfig::with_pool_size(16),
///     DiskManager::create(dir.path().join("recovery.db")).unwrap(),
/// )
/// .unwrap();
/// let segment = SegmentAccessor::new(&cache);
/// let records = TupleDescriptor::new(vec![FieldDescriptor::new(FieldType::Int64)]);
/// let mut writer = BTreeWriter::new(BTreeDescriptor::new(segment, records, vec![0], PageOwnerId(1))).unwrap();
/// writer.insert(&[DatumRef::Int64(1)]).unwrap();
///
/// let txn = Arc::new(LogicalTxn::new());
/// writer.set_txn(Some(Arc::clone(&txn)));
/// writer.insert(&[DatumRef::Int64(2)]).unwrap();
/// drop(writer);
///
/// let logged = LogicalTxn::from_bytes(&txn.to_bytes()).unwrap();
/// let mut factory = BTreeRecoveryFactory::new(segment);
/// assert_eq!(factory.undo(&logged).unwrap(), 1);
/// assert_eq!(factory.writer_count(), 1);
/// ```
pub struct BTreeRecoveryFactory<'c> {
    segment: SegmentAccessor<'c>,
    writers: HashMap<u64, BTreeWriter<'c>>,
}

impl<'c> BTreeRecoveryFactory<'c> {
    pub fn new(segment: SegmentAccessor<'c>) -> Self {
        Self {
            segment,
            writers: HashMap::new(),
        }
    }

    /// The writer for participant `id`, created from `description` on first
    /// use.
    pub fn writer_for(&mut self, id: u64, description: &[u8]) -> Result<&mut BTreeWriter<'c>> {
        if !self.writers.contains_key(&id) {
            let descriptor = BTreeDescriptor::deserialize(self.segment, description)?;
            if descriptor.root_page_id().0 != id {
                return Err(Error::InvalidArgument(format!(
                    "participant {id} describes root {}",
                    descriptor.root_page_id()
                )));
            }
            self.writers.insert(id, BTreeWriter::new(descriptor)?);
        }
        self.writers
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("no writer for participant {id}")))
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Repeat every action of `txn`, oldest first.
    ///
    /// Returns the number of actions applied.
    pub fn redo(&mut self, txn: &LogicalTxn) -> Result<usize> {
        let descriptions: HashMap<u64, Vec<u8>> = txn.descriptions().into_iter().collect();
        let actions = txn.actions();
        for action in &actions {
            let description = self.description(&descriptions, action.participant)?;
            self.writer_for(action.participant, description)?
                .redo_logical_action(action)?;
        }
        debug!(target: "pagetree::btree::recovery", actions = actions.len(), "redo complete");
        Ok(actions.len())
    }

    /// Reverse every action of `txn`, newest first.
    ///
    /// Returns the number of actions reversed.
    pub fn undo(&mut self, txn: &LogicalTxn) -> Result<usize> {
        let descriptions: HashMap<u64, Vec<u8>> = txn.descriptions().into_iter().collect();
        let actions = txn.actions();
        for action in actions.iter().rev() {
            let description = self.description(&descriptions, action.participant)?;
            self.writer_for(action.participant, description)?
                .undo_logical_action(action)?;
        }
        debug!(target: "pagetree::btree::recovery", actions = actions.len(), "undo complete");
        Ok(actions.len())
    }

    fn description<'d>(&self, descriptions: &'d HashMap<u64, Vec<u8>>, id: u64) -> Result<&'d [u8]> {
        descriptions
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::InvalidArgument(format!("participant {id} was never described")))
    }
}

impl std::fmt::Debug for BTreeRecoveryFactory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeRecoveryFactory")
            .field("writers", &self.writers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::common::PageOwnerId;
    use crate::index::btree::test_util::*;
    use crate::index::btree::{BTreeBuilder, BTreeVerifier};
    use crate::tuple::DatumRef;

    #[test]
    fn test_redo_after_undo_restores_changes() {
        let (cache, _dir) = create_test_cache(32);
        let segment = SegmentAccessor::new(&cache);
        let mut builder = BTreeBuilder::new(
            BTreeDescriptor::new(segment, int_pairs(), vec![0], PageOwnerId(1)),
            1.0,
        )
        .unwrap();
        builder.create_empty_root().unwrap();
        let desc = builder.descriptor().clone();

        let txn = Arc::new(LogicalTxn::new());
        {
            let mut writer = BTreeWriter::new(desc.clone()).unwrap();
            writer.set_txn(Some(Arc::clone(&txn)));
            for k in 0..800 {
                writer.insert(&[DatumRef::Int32(k), DatumRef::Int32(k)]).unwrap();
            }
        }
        let logged = LogicalTxn::from_bytes(&txn.to_bytes()).unwrap();
        let tuples = || BTreeVerifier::new(desc.clone(), true).verify().unwrap().n_tuples;

        let mut factory = BTreeRecoveryFactory::new(segment);
        assert_eq!(factory.undo(&logged).unwrap(), 800);
        assert_eq!(tuples(), 0);
        assert_eq!(factory.redo(&logged).unwrap(), 800);
        assert_eq!(tuples(), 800);
        assert_eq!(factory.writer_count(), 1);
    }

    #[test]
    fn test_mismatched_description_rejected() {
        let (cache, _dir) = create_test_cache(4);
        let segment = SegmentAccessor::new(&cache);
        let mut description = Vec::new();
        BTreeDescriptor::new(segment, int_pairs(), vec![0], PageOwnerId(1))
            .with_root(crate::common::PageId::new(3))
            .serialize(&mut description);

        let mut factory = BTreeRecoveryFactory::new(segment);
        assert!(factory.writer_for(4, &description).is_err());
        assert!(factory.writer_for(3, &description).is_ok());
    }
}
