//! Frame identifier type.

use std::fmt;

/// Index of a frame in the cache.
///
/// Frames live in a `Vec<Frame>`, and the victim policies keep their linked
/// lists in arenas with one slot per frame, so a `FrameId` indexes both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub usize);

impl FrameId {
    #[inline]
    pub fn new(id: usize) -> Self {
        FrameId(id)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}
