//! LRU (Least Recently Used) victim policy.

use std::ops::ControlFlow;

use parking_lot::RwLock;

use super::list::{LinkArena, PageQueue};
use super::{VictimPolicy, VictimVisitor};
use crate::common::{FrameId, PageId};

/// A single queue ordered from least to most recently used.
///
/// Only mapped frames are queued; free frames are the cache's business.
pub struct LruVictimPolicy {
    state: RwLock<LruState>,
}

#[derive(Default)]
struct LruState {
    arena: LinkArena,
    queue: PageQueue,
}

impl LruVictimPolicy {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LruState::default()),
        }
    }
}

impl Default for LruVictimPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl VictimPolicy for LruVictimPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn register_page(&self, frame: FrameId) {
        self.state.write().arena.ensure_slot(frame.0);
    }

    fn unregister_page(&self, frame: FrameId) {
        let mut state = self.state.write();
        let LruState { arena, queue } = &mut *state;
        if arena.is_linked(frame.0) {
            queue.remove(arena, frame.0);
        }
    }

    fn notify_page_access(&self, frame: FrameId, _page_id: PageId, _pin: bool) {
        let mut state = self.state.write();
        let LruState { arena, queue } = &mut *state;
        if arena.is_linked(frame.0) {
            queue.move_to_tail(arena, frame.0);
        }
    }

    fn notify_page_nice(&self, frame: FrameId) {
        let mut state = self.state.write();
        let LruState { arena, queue } = &mut *state;
        if arena.is_linked(frame.0) {
            queue.move_to_head(arena, frame.0);
        }
    }

    fn notify_page_map(&self, frame: FrameId, _page_id: PageId, _pin: bool) {
        let mut state = self.state.write();
        let LruState { arena, queue } = &mut *state;
        if arena.is_linked(frame.0) {
            queue.move_to_tail(arena, frame.0);
        } else {
            queue.insert_at_tail(arena, frame.0);
        }
    }

    fn notify_page_unmap(&self, frame: FrameId, _page_id: PageId, _discard: bool) {
        self.unregister_page(frame);
    }

    fn for_each_victim(&self, visit: &mut VictimVisitor<'_>) {
        let state = self.state.read();
        for idx in state.queue.iter(&state.arena) {
            if let ControlFlow::Break(()) = visit(FrameId::new(idx)) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::victims;

    fn mapped_policy(n: usize) -> LruVictimPolicy {
        let policy = LruVictimPolicy::new();
        for i in 0..n {
            policy.register_page(FrameId::new(i));
            policy.notify_page_map(FrameId::new(i), PageId::new(i as u64), true);
        }
        policy
    }

    #[test]
    fn test_victims_start_at_least_recent() {
        let policy = mapped_policy(3);
        assert_eq!(victims(&policy), vec![0, 1, 2]);
    }

    #[test]
    fn test_access_moves_to_most_recent_end() {
        let policy = mapped_policy(3);
        policy.notify_page_access(FrameId::new(0), PageId::new(0), true);
        assert_eq!(victims(&policy), vec![1, 2, 0]);
    }

    #[test]
    fn test_nice_moves_to_least_recent_end() {
        let policy = mapped_policy(3);
        policy.notify_page_nice(FrameId::new(2));
        assert_eq!(victims(&policy), vec![2, 0, 1]);
    }

    #[test]
    fn test_unmap_removes_frame() {
        let policy = mapped_policy(3);
        policy.notify_page_unmap(FrameId::new(1), PageId::new(1), false);
        assert_eq!(victims(&policy), vec![0, 2]);

        // Touching an unmapped frame is ignored.
        policy.notify_page_access(FrameId::new(1), PageId::new(1), true);
        assert_eq!(victims(&policy), vec![0, 2]);
    }
}
