//! Logical transaction log.
//!
//! Index writers record one [`LogicalAction`] per insert or delete into a
//! [`LogicalTxn`]. Each action carries the full record image, so undo replays
//! the inverse operation and redo replays the same one. The first action of a
//! participant also records a self-describing blob (see
//! [`LogicalTxnParticipant::describe_participant`]) from which recovery can
//! rebuild the participant.

mod log;

pub use log::LogicalTxn;

use crate::common::{Error, Result};

/// What a logged action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Insert,
    Delete,
}

impl ActionKind {
    /// The action that reverses this one.
    pub fn inverse(self) -> Self {
        match self {
            ActionKind::Insert => ActionKind::Delete,
            ActionKind::Delete => ActionKind::Insert,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ActionKind::Insert => 1,
            ActionKind::Delete => 2,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(ActionKind::Insert),
            2 => Ok(ActionKind::Delete),
            other => Err(Error::InvalidArgument(format!(
                "unknown logical action tag {other}"
            ))),
        }
    }
}

/// One logged record-level action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalAction {
    /// Id of the participant that performed the action.
    pub participant: u64,
    pub kind: ActionKind,
    /// Marshalled record image.
    pub image: Vec<u8>,
}

/// A structure whose record-level actions can be logged, undone and redone.
pub trait LogicalTxnParticipant {
    /// Stable id distinguishing this participant inside one transaction.
    fn participant_id(&self) -> u64;

    /// Append enough identity to `out` to rebuild this participant during
    /// recovery.
    fn describe_participant(&self, out: &mut Vec<u8>);

    /// Reverse `action`.
    fn undo_logical_action(&mut self, action: &LogicalAction) -> Result<()>;

    /// Repeat `action`.
    fn redo_logical_action(&mut self, action: &LogicalAction) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        for kind in [ActionKind::Insert, ActionKind::Delete] {
            assert_eq!(ActionKind::from_u8(kind.to_u8()).unwrap(), kind);
            assert_eq!(kind.inverse().inverse(), kind);
        }
        assert!(ActionKind::from_u8(9).is_err());
    }
}
