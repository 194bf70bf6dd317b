//! In-memory logical transaction with a byte-stream form.
//!
//! # Stream Format
//! ```text
//! ┌─────┬────────────────┬───────────────────────────────────────┐
//! │ tag │ participant u64│ payload                               │
//! ├─────┼────────────────┼───────────────────────────────────────┤
//! │  0  │ id             │ description (u32 len + bytes)         │
//! │ 1/2 │ id             │ record image (u32 len + bytes)        │
//! └─────┴────────────────┴───────────────────────────────────────┘
//! ```
//! Tag 0 introduces a participant; tags 1 and 2 are insert and delete
//! actions. A description always precedes the participant's first action.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::codec::{put_bytes, Cursor};
use crate::common::{Error, Result};

use super::{ActionKind, LogicalAction, LogicalTxnParticipant};

const TAG_DESCRIPTION: u8 = 0;

#[derive(Debug, Default)]
struct TxnState {
    /// `(participant, description)` in first-seen order.
    descriptions: Vec<(u64, Vec<u8>)>,
    described: HashSet<u64>,
    actions: Vec<LogicalAction>,
}

/// A logical transaction: an ordered list of record-level actions.
///
/// Shared between writers through `Arc`; appends are serialized internally.
///
/// # Example
/// ```
/// use pagetree::txn::LogicalTxn;
///
/// let txn = LogicalTxn::new();
/// assert!(txn.is_empty());
/// let bytes = txn.to_bytes();
/// assert_eq!(LogicalTxn::from_bytes(&bytes).unwrap().action_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct LogicalTxn {
    state: Mutex<TxnState>,
}

impl LogicalTxn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, describing the participant first if this is its
    /// first action in the transaction.
    pub fn log_action(
        &self,
        participant: &dyn LogicalTxnParticipant,
        kind: ActionKind,
        image: &[u8],
    ) {
        let id = participant.participant_id();
        let mut state = self.state.lock();
        if state.described.insert(id) {
            let mut description = Vec::new();
            participant.describe_participant(&mut description);
            state.descriptions.push((id, description));
        }
        state.actions.push(LogicalAction {
            participant: id,
            kind,
            image: image.to_vec(),
        });
    }

    pub fn action_count(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_count() == 0
    }

    /// Snapshot of the logged actions, oldest first.
    pub fn actions(&self) -> Vec<LogicalAction> {
        self.state.lock().actions.clone()
    }

    /// `(participant, description)` pairs, in first-action order.
    pub fn descriptions(&self) -> Vec<(u64, Vec<u8>)> {
        self.state.lock().descriptions.clone()
    }

    /// Undo every action of `participant`, newest first, and drop them from
    /// the log.
    ///
    /// Returns the number of actions undone.
    ///
    /// # Errors
    /// Stops at the first failing undo; actions not yet undone stay logged.
    pub fn rollback(&self, participant: &mut dyn LogicalTxnParticipant) -> Result<usize> {
        let id = participant.participant_id();
        let mut undone = 0;
        loop {
            let action = {
                let state = self.state.lock();
                match state.actions.iter().rposition(|a| a.participant == id) {
                    Some(index) => (index, state.actions[index].clone()),
                    None => break,
                }
            };
            participant.undo_logical_action(&action.1)?;
            self.state.lock().actions.remove(action.0);
            undone += 1;
        }
        debug!(target: "pagetree::txn", participant = id, undone, "rolled back");
        Ok(undone)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut out = Vec::new();
        let mut written = HashSet::new();
        for action in &state.actions {
            if written.insert(action.participant) {
                if let Some((_, description)) = state
                    .descriptions
                    .iter()
                    .find(|(id, _)| *id == action.participant)
                {
                    out.push(TAG_DESCRIPTION);
                    out.extend_from_slice(&action.participant.to_le_bytes());
                    put_bytes(&mut out, description);
                }
            }
            out.push(action.kind.to_u8());
            out.extend_from_slice(&action.participant.to_le_bytes());
            put_bytes(&mut out, &action.image);
        }
        out
    }

    /// # Errors
    /// `Error::TruncatedLog` if the stream ends mid-record, or
    /// `Error::InvalidArgument` for an action whose participant was never
    /// described.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut state = TxnState::default();
        let mut cursor = Cursor::new(bytes);
        while !cursor.is_empty() {
            let tag = cursor.read_u8()?;
            let participant = cursor.read_u64()?;
            let payload = cursor.read_bytes()?.to_vec();
            if tag == TAG_DESCRIPTION {
                if state.described.insert(participant) {
                    state.descriptions.push((participant, payload));
                }
                continue;
            }
            if !state.described.contains(&participant) {
                return Err(Error::InvalidArgument(format!(
                    "action for undescribed participant {participant}"
                )));
            }
            state.actions.push(LogicalAction {
                participant,
                kind: ActionKind::from_u8(tag)?,
                image: payload,
            });
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Keeps a set of byte strings.
    struct SetParticipant {
        id: u64,
        items: Vec<Vec<u8>>,
    }

    impl LogicalTxnParticipant for SetParticipant {
        fn participant_id(&self) -> u64 {
            self.id
        }

        fn describe_participant(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(b"set");
        }

        fn undo_logical_action(&mut self, action: &LogicalAction) -> Result<()> {
            match action.kind {
                ActionKind::Insert => self.items.retain(|i| *i != action.image),
                ActionKind::Delete => self.items.push(action.image.clone()),
            }
            Ok(())
        }

        fn redo_logical_action(&mut self, action: &LogicalAction) -> Result<()> {
            match action.kind {
                ActionKind::Insert => self.items.push(action.image.clone()),
                ActionKind::Delete => self.items.retain(|i| *i != action.image),
            }
            Ok(())
        }
    }

    fn participant(id: u64) -> SetParticipant {
        SetParticipant { id, items: Vec::new() }
    }

    #[test]
    fn test_describes_once() {
        let txn = LogicalTxn::new();
        let p = participant(7);
        txn.log_action(&p, ActionKind::Insert, b"a");
        txn.log_action(&p, ActionKind::Insert, b"b");

        assert_eq!(txn.action_count(), 2);
        assert_eq!(txn.descriptions(), vec![(7, b"set".to_vec())]);
    }

    #[test]
    fn test_rollback_only_touches_participant() {
        let txn = LogicalTxn::new();
        let mut a = participant(1);
        let b = participant(2);

        for image in [b"x".as_slice(), b"y"] {
            a.items.push(image.to_vec());
            txn.log_action(&a, ActionKind::Insert, image);
        }
        txn.log_action(&b, ActionKind::Insert, b"z");
        a.items.retain(|i| i != b"x");
        txn.log_action(&a, ActionKind::Delete, b"x");

        assert_eq!(txn.rollback(&mut a).unwrap(), 3);
        assert!(a.items.is_empty());
        assert_eq!(txn.action_count(), 1);
        assert_eq!(txn.actions()[0].participant, 2);
    }

    #[test]
    fn test_stream_round_trip() {
        let txn = LogicalTxn::new();
        let a = participant(1);
        let b = participant(2);
        txn.log_action(&a, ActionKind::Insert, b"one");
        txn.log_action(&b, ActionKind::Delete, b"two");
        txn.log_action(&a, ActionKind::Delete, b"one");

        let bytes = txn.to_bytes();
        let decoded = LogicalTxn::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.actions(), txn.actions());
        assert_eq!(decoded.descriptions().len(), 2);

        let mut replayed = participant(1);
        for action in decoded.actions().iter().filter(|a| a.participant == 1) {
            replayed.redo_logical_action(action).unwrap();
        }
        assert!(replayed.items.is_empty());

        assert!(matches!(
            LogicalTxn::from_bytes(&bytes[..bytes.len() - 1]),
            Err(Error::TruncatedLog)
        ));
    }

    #[test]
    fn test_undescribed_action_rejected() {
        let mut bytes = vec![ActionKind::Insert.to_u8()];
        bytes.extend_from_slice(&5u64.to_le_bytes());
        put_bytes(&mut bytes, b"img");
        assert!(matches!(
            LogicalTxn::from_bytes(&bytes),
            Err(Error::InvalidArgument(_))
        ));
    }
}
