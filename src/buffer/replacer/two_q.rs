//! 2Q victim policy (Johnson and Shasha).
//!
//! Three disjoint queues share one link arena:
//! - `freshman`: FIFO of pages seen once
//! - `popular_unpinned`: LRU of pages re-referenced within the history window
//! - `popular_pinned`: FIFO of popular pages currently pinned, never victims
//!
//! `freshman` and `popular_unpinned` each have a dirty-only twin threaded
//! through a second arena, so a flush scan walks only dirty pages. Frame
//! index doubles as the slot index in both arenas.
//!
//! Pages evicted from `freshman` leave their id in a bounded FIFO history.
//! Membership is approximated with a bitmap indexed by `page_id % bits`;
//! collisions can promote a page early and that is accepted.

use std::ops::ControlFlow;

use parking_lot::RwLock;
use tracing::trace;

use super::list::{LinkArena, PageQueue};
use super::{VictimPolicy, VictimVisitor};
use crate::common::{FrameId, PageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PageState {
    #[default]
    Free,
    Freshman,
    PopularUnpinned,
    PopularPinned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DirtyState {
    #[default]
    Clean,
    DirtyFreshman,
    DirtyPopularUnpinned,
    DirtyPopularPinned,
}

pub struct TwoQVictimPolicy {
    freshman_percentage: u32,
    history_percentage: u32,
    state: RwLock<TwoQState>,
}

#[derive(Default)]
struct TwoQState {
    arena: LinkArena,
    dirty_arena: LinkArena,
    freshman: PageQueue,
    popular_unpinned: PageQueue,
    popular_pinned: PageQueue,
    dirty_freshman: PageQueue,
    dirty_popular_unpinned: PageQueue,
    states: Vec<PageState>,
    dirty_states: Vec<DirtyState>,
    history: HistoryWindow,
    max_freshman: usize,
}

/// Bounded FIFO of page ids with bitmap membership.
#[derive(Default)]
struct HistoryWindow {
    ring: Vec<PageId>,
    start: usize,
    len: usize,
    bitmap: Vec<u64>,
}

impl HistoryWindow {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: vec![PageId::NULL; capacity],
            start: 0,
            len: 0,
            bitmap: vec![0; capacity],
        }
    }

    fn bit(&self, page_id: PageId) -> Option<(usize, u64)> {
        let n_bits = self.bitmap.len() as u64 * 64;
        if n_bits == 0 {
            return None;
        }
        let bit = page_id.0 % n_bits;
        Some(((bit / 64) as usize, 1u64 << (bit % 64)))
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.bit(page_id)
            .is_some_and(|(word, mask)| self.bitmap[word] & mask != 0)
    }

    fn clear(&mut self, page_id: PageId) {
        if let Some((word, mask)) = self.bit(page_id) {
            self.bitmap[word] &= !mask;
        }
    }

    fn push(&mut self, page_id: PageId) {
        let capacity = self.ring.len();
        if capacity == 0 {
            return;
        }
        if self.len == capacity {
            let oldest = self.ring[self.start];
            self.clear(oldest);
            self.start = (self.start + 1) % capacity;
            self.len -= 1;
        }
        self.ring[(self.start + self.len) % capacity] = page_id;
        self.len += 1;
        if let Some((word, mask)) = self.bit(page_id) {
            self.bitmap[word] |= mask;
        }
    }
}

impl TwoQVictimPolicy {
    pub fn new(freshman_percentage: u32, history_percentage: u32) -> Self {
        Self {
            freshman_percentage,
            history_percentage,
            state: RwLock::new(TwoQState::default()),
        }
    }

    /// Soft target size of the freshman queue.
    pub fn max_freshman_size(&self) -> usize {
        self.state.read().max_freshman
    }

    #[cfg(test)]
    fn state_of(&self, frame: FrameId) -> PageState {
        self.state.read().states[frame.0]
    }

    #[cfg(test)]
    fn in_history(&self, page_id: PageId) -> bool {
        self.state.read().history.contains(page_id)
    }
}

impl TwoQState {
    fn ensure_slot(&mut self, idx: usize) {
        if idx >= self.states.len() {
            self.states.resize(idx + 1, PageState::Free);
            self.dirty_states.resize(idx + 1, DirtyState::Clean);
        }
        self.arena.ensure_slot(idx);
        self.dirty_arena.ensure_slot(idx);
    }

    fn access(&mut self, idx: usize, page_id: PageId, pin: bool) {
        self.ensure_slot(idx);
        match self.states[idx] {
            PageState::Freshman | PageState::PopularPinned => {}
            PageState::PopularUnpinned => {
                if pin {
                    self.popular_unpinned.remove(&mut self.arena, idx);
                    if self.dirty_states[idx] == DirtyState::DirtyPopularUnpinned {
                        self.dirty_popular_unpinned
                            .remove(&mut self.dirty_arena, idx);
                        self.dirty_states[idx] = DirtyState::DirtyPopularPinned;
                    }
                    self.popular_pinned.insert_at_tail(&mut self.arena, idx);
                    self.states[idx] = PageState::PopularPinned;
                } else {
                    self.popular_unpinned.move_to_tail(&mut self.arena, idx);
                    if self.dirty_states[idx] == DirtyState::DirtyPopularUnpinned {
                        self.dirty_popular_unpinned
                            .move_to_tail(&mut self.dirty_arena, idx);
                    }
                }
            }
            PageState::Free => {
                if self.history.contains(page_id) {
                    trace!(target: "pagetree::cache::2q", page = page_id.0, pin, "promoting from history");
                    if pin {
                        self.popular_pinned.insert_at_tail(&mut self.arena, idx);
                        self.states[idx] = PageState::PopularPinned;
                    } else {
                        self.popular_unpinned.insert_at_tail(&mut self.arena, idx);
                        self.states[idx] = PageState::PopularUnpinned;
                    }
                } else {
                    self.freshman.insert_at_tail(&mut self.arena, idx);
                    self.states[idx] = PageState::Freshman;
                }
            }
        }
    }

    fn unmap(&mut self, idx: usize, page_id: PageId, discard: bool) {
        self.ensure_slot(idx);
        match self.states[idx] {
            PageState::Free => {}
            PageState::Freshman => {
                if !discard {
                    self.history.push(page_id);
                }
                self.freshman.remove(&mut self.arena, idx);
                if self.dirty_states[idx] == DirtyState::DirtyFreshman {
                    self.dirty_freshman.remove(&mut self.dirty_arena, idx);
                }
            }
            PageState::PopularUnpinned => {
                self.popular_unpinned.remove(&mut self.arena, idx);
                if self.dirty_states[idx] == DirtyState::DirtyPopularUnpinned {
                    self.dirty_popular_unpinned
                        .remove(&mut self.dirty_arena, idx);
                }
            }
            PageState::PopularPinned => {
                self.popular_pinned.remove(&mut self.arena, idx);
            }
        }
        if discard && page_id.is_valid() {
            self.history.clear(page_id);
        }
        self.states[idx] = PageState::Free;
        self.dirty_states[idx] = DirtyState::Clean;
    }

    fn scan(
        first: &PageQueue,
        second: &PageQueue,
        arena: &LinkArena,
        visit: &mut VictimVisitor<'_>,
    ) {
        for idx in first.iter(arena).chain(second.iter(arena)) {
            if let ControlFlow::Break(()) = visit(FrameId::new(idx)) {
                return;
            }
        }
    }

    /// Under its target, freshman is protected and popular pages go first.
    fn prefer_popular(&self) -> bool {
        self.freshman.len() < self.max_freshman
    }
}

impl VictimPolicy for TwoQVictimPolicy {
    fn name(&self) -> &'static str {
        "2q"
    }

    fn set_allocated_page_count(&self, count: usize) {
        let mut state = self.state.write();
        state.max_freshman = count * self.freshman_percentage as usize / 100;
        let max_history = count * self.history_percentage as usize / 100;
        state.history = HistoryWindow::with_capacity(max_history);
        state.ensure_slot(count.saturating_sub(1));
    }

    fn register_page(&self, frame: FrameId) {
        self.state.write().ensure_slot(frame.0);
    }

    fn unregister_page(&self, frame: FrameId) {
        let mut state = self.state.write();
        if state.states.get(frame.0).is_some_and(|s| *s != PageState::Free) {
            state.unmap(frame.0, PageId::NULL, true);
        }
    }

    fn notify_page_access(&self, frame: FrameId, page_id: PageId, pin: bool) {
        self.state.write().access(frame.0, page_id, pin);
    }

    fn notify_page_nice(&self, frame: FrameId) {
        let mut state = self.state.write();
        let idx = frame.0;
        state.ensure_slot(idx);
        let TwoQState {
            arena,
            dirty_arena,
            freshman,
            popular_unpinned,
            dirty_freshman,
            dirty_popular_unpinned,
            states,
            dirty_states,
            ..
        } = &mut *state;
        match states[idx] {
            PageState::Freshman => {
                freshman.move_to_head(arena, idx);
                if dirty_states[idx] == DirtyState::DirtyFreshman {
                    dirty_freshman.move_to_head(dirty_arena, idx);
                }
            }
            PageState::PopularUnpinned => {
                popular_unpinned.move_to_head(arena, idx);
                if dirty_states[idx] == DirtyState::DirtyPopularUnpinned {
                    dirty_popular_unpinned.move_to_head(dirty_arena, idx);
                }
            }
            PageState::PopularPinned | PageState::Free => {}
        }
    }

    fn notify_page_map(&self, frame: FrameId, page_id: PageId, pin: bool) {
        let mut state = self.state.write();
        state.ensure_slot(frame.0);
        debug_assert_eq!(state.states[frame.0], PageState::Free);
        state.access(frame.0, page_id, pin);
    }

    fn notify_page_unmap(&self, frame: FrameId, page_id: PageId, discard: bool) {
        self.state.write().unmap(frame.0, page_id, discard);
    }

    fn notify_page_unpin(&self, frame: FrameId) {
        let mut state = self.state.write();
        let idx = frame.0;
        state.ensure_slot(idx);
        if state.states[idx] != PageState::PopularPinned {
            return;
        }
        let TwoQState {
            arena,
            dirty_arena,
            popular_unpinned,
            popular_pinned,
            dirty_popular_unpinned,
            states,
            dirty_states,
            ..
        } = &mut *state;
        popular_pinned.remove(arena, idx);
        popular_unpinned.insert_at_tail(arena, idx);
        states[idx] = PageState::PopularUnpinned;
        if dirty_states[idx] == DirtyState::DirtyPopularPinned {
            dirty_popular_unpinned.insert_at_tail(dirty_arena, idx);
            dirty_states[idx] = DirtyState::DirtyPopularUnpinned;
        }
    }

    fn notify_page_dirty(&self, frame: FrameId) {
        let mut state = self.state.write();
        let idx = frame.0;
        state.ensure_slot(idx);
        if state.dirty_states[idx] != DirtyState::Clean {
            return;
        }
        let TwoQState {
            dirty_arena,
            dirty_freshman,
            dirty_popular_unpinned,
            states,
            dirty_states,
            ..
        } = &mut *state;
        dirty_states[idx] = match states[idx] {
            PageState::Free => return,
            PageState::Freshman => {
                dirty_freshman.insert_at_tail(dirty_arena, idx);
                DirtyState::DirtyFreshman
            }
            PageState::PopularUnpinned => {
                dirty_popular_unpinned.insert_at_tail(dirty_arena, idx);
                DirtyState::DirtyPopularUnpinned
            }
            PageState::PopularPinned => DirtyState::DirtyPopularPinned,
        };
    }

    fn notify_page_clean(&self, frame: FrameId) {
        let mut state = self.state.write();
        let idx = frame.0;
        state.ensure_slot(idx);
        let TwoQState {
            dirty_arena,
            dirty_freshman,
            dirty_popular_unpinned,
            dirty_states,
            ..
        } = &mut *state;
        match dirty_states[idx] {
            DirtyState::Clean => return,
            DirtyState::DirtyFreshman => dirty_freshman.remove(dirty_arena, idx),
            DirtyState::DirtyPopularUnpinned => {
                dirty_popular_unpinned.remove(dirty_arena, idx)
            }
            DirtyState::DirtyPopularPinned => {}
        }
        dirty_states[idx] = DirtyState::Clean;
    }

    fn notify_page_discard(&self, page_id: PageId) {
        self.state.write().history.clear(page_id);
    }

    fn for_each_victim(&self, visit: &mut VictimVisitor<'_>) {
        let state = self.state.read();
        if state.prefer_popular() {
            TwoQState::scan(&state.popular_unpinned, &state.freshman, &state.arena, visit);
        } else {
            TwoQState::scan(&state.freshman, &state.popular_unpinned, &state.arena, visit);
        }
    }

    fn for_each_dirty_victim(&self, visit: &mut VictimVisitor<'_>) {
        let state = self.state.read();
        if state.prefer_popular() {
            TwoQState::scan(
                &state.dirty_popular_unpinned,
                &state.dirty_freshman,
                &state.dirty_arena,
                visit,
            );
        } else {
            TwoQState::scan(
                &state.dirty_freshman,
                &state.dirty_popular_unpinned,
                &state.dirty_arena,
                visit,
            );
        }
    }

    fn tracks_dirty_pages(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::{dirty_victims, victims};

    fn policy(n: usize) -> TwoQVictimPolicy {
        let policy = TwoQVictimPolicy::new(25, 100);
        policy.set_allocated_page_count(n);
        for i in 0..n {
            policy.register_page(FrameId::new(i));
        }
        policy
    }

    fn map(policy: &TwoQVictimPolicy, frame: usize, page: u64) {
        policy.notify_page_map(FrameId::new(frame), PageId::new(page), true);
        policy.notify_page_unpin(FrameId::new(frame));
    }

    #[test]
    fn test_sizing() {
        let policy = policy(8);
        assert_eq!(policy.max_freshman_size(), 2);
        assert_eq!(policy.state.read().history.ring.len(), 8);
        assert_eq!(policy.state.read().history.bitmap.len(), 8);
    }

    #[test]
    fn test_first_touch_goes_to_freshman() {
        let policy = policy(8);
        map(&policy, 0, 100);
        assert_eq!(policy.state_of(FrameId::new(0)), PageState::Freshman);

        // Further touches leave a freshman page where it is.
        policy.notify_page_access(FrameId::new(0), PageId::new(100), true);
        assert_eq!(policy.state_of(FrameId::new(0)), PageState::Freshman);
    }

    #[test]
    fn test_history_promotion() {
        let policy = policy(8);
        map(&policy, 0, 100);
        policy.notify_page_unmap(FrameId::new(0), PageId::new(100), false);
        assert!(policy.in_history(PageId::new(100)));

        // Re-requested while still in history: straight to a popular queue.
        policy.notify_page_map(FrameId::new(3), PageId::new(100), true);
        assert_eq!(policy.state_of(FrameId::new(3)), PageState::PopularPinned);
        assert!(!victims(&policy).contains(&3));

        policy.notify_page_unpin(FrameId::new(3));
        assert_eq!(policy.state_of(FrameId::new(3)), PageState::PopularUnpinned);
        assert!(victims(&policy).contains(&3));
    }

    #[test]
    fn test_unpinned_map_from_history() {
        let policy = policy(8);
        map(&policy, 0, 5);
        policy.notify_page_unmap(FrameId::new(0), PageId::new(5), false);
        policy.notify_page_map(FrameId::new(1), PageId::new(5), false);
        assert_eq!(policy.state_of(FrameId::new(1)), PageState::PopularUnpinned);
    }

    #[test]
    fn test_history_window_is_bounded() {
        // Two frames, 100% history: the window holds two ids.
        let policy = policy(2);
        for page in [10u64, 11, 12] {
            map(&policy, 0, page);
            policy.notify_page_unmap(FrameId::new(0), PageId::new(page), false);
        }

        assert!(!policy.in_history(PageId::new(10)));
        assert!(policy.in_history(PageId::new(11)));
        assert!(policy.in_history(PageId::new(12)));

        map(&policy, 1, 10);
        assert_eq!(policy.state_of(FrameId::new(1)), PageState::Freshman);
    }

    #[test]
    fn test_discard_forgets_history() {
        let policy = policy(8);
        map(&policy, 0, 42);
        policy.notify_page_unmap(FrameId::new(0), PageId::new(42), false);
        assert!(policy.in_history(PageId::new(42)));

        policy.notify_page_discard(PageId::new(42));
        assert!(!policy.in_history(PageId::new(42)));

        map(&policy, 1, 43);
        policy.notify_page_unmap(FrameId::new(1), PageId::new(43), true);
        assert!(!policy.in_history(PageId::new(43)));
    }

    #[test]
    fn test_pinned_popular_pages_are_never_victims() {
        let policy = policy(8);
        map(&policy, 0, 1);
        policy.notify_page_unmap(FrameId::new(0), PageId::new(1), false);
        map(&policy, 0, 1);
        assert_eq!(policy.state_of(FrameId::new(0)), PageState::PopularUnpinned);

        policy.notify_page_access(FrameId::new(0), PageId::new(1), true);
        assert_eq!(policy.state_of(FrameId::new(0)), PageState::PopularPinned);
        assert!(victims(&policy).is_empty());
    }

    #[test]
    fn test_victim_preference_follows_freshman_target() {
        // 8 frames -> freshman target of 2.
        let policy = policy(8);
        // Make frame 0 popular.
        map(&policy, 0, 1);
        policy.notify_page_unmap(FrameId::new(0), PageId::new(1), false);
        map(&policy, 0, 1);
        // One freshman page: under target, popular goes first.
        map(&policy, 1, 2);
        assert_eq!(victims(&policy), vec![0, 1]);

        // Two more freshman pages: at target, freshman goes first.
        map(&policy, 2, 3);
        map(&policy, 3, 4);
        assert_eq!(victims(&policy), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_popular_unpinned_is_lru() {
        let policy = policy(8);
        for (frame, page) in [(0usize, 1u64), (1, 2)] {
            map(&policy, frame, page);
            policy.notify_page_unmap(FrameId::new(frame), PageId::new(page), false);
            map(&policy, frame, page);
        }
        assert_eq!(victims(&policy), vec![0, 1]);

        policy.notify_page_access(FrameId::new(0), PageId::new(1), false);
        assert_eq!(victims(&policy), vec![1, 0]);

        policy.notify_page_nice(FrameId::new(0));
        assert_eq!(victims(&policy), vec![0, 1]);
    }

    #[test]
    fn test_dirty_queues_track_only_dirty_pages() {
        let policy = policy(8);
        for frame in 0..4 {
            map(&policy, frame, frame as u64);
        }
        policy.notify_page_dirty(FrameId::new(1));
        policy.notify_page_dirty(FrameId::new(3));
        assert_eq!(dirty_victims(&policy), vec![1, 3]);

        policy.notify_page_clean(FrameId::new(1));
        assert_eq!(dirty_victims(&policy), vec![3]);

        policy.notify_page_unmap(FrameId::new(3), PageId::new(3), false);
        assert!(dirty_victims(&policy).is_empty());
    }

    #[test]
    fn test_dirty_state_follows_pin_cycle() {
        let policy = policy(8);
        map(&policy, 0, 9);
        policy.notify_page_unmap(FrameId::new(0), PageId::new(9), false);
        policy.notify_page_map(FrameId::new(0), PageId::new(9), true);

        // Dirtied while pinned: not yet a dirty victim.
        policy.notify_page_dirty(FrameId::new(0));
        assert!(dirty_victims(&policy).is_empty());

        policy.notify_page_unpin(FrameId::new(0));
        assert_eq!(dirty_victims(&policy), vec![0]);

        policy.notify_page_access(FrameId::new(0), PageId::new(9), true);
        assert!(dirty_victims(&policy).is_empty());
    }
}
