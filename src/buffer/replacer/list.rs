//! Index-based doubly linked queues for the victim policies.
//!
//! Links live in a [`LinkArena`] with one slot per frame; a [`PageQueue`] is
//! just a head, a tail and a length threaded through that arena. Several
//! queues can share one arena as long as a frame sits in at most one of them
//! at a time. A second arena gives the same frames an independent link set,
//! which is how 2Q keeps its dirty sub-queues.

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

/// Per-frame link storage shared by the queues built on it.
#[derive(Debug, Default)]
pub(crate) struct LinkArena {
    links: Vec<Link>,
}

impl LinkArena {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            links: vec![Link::default(); slots],
        }
    }

    pub(crate) fn ensure_slot(&mut self, idx: usize) {
        if idx >= self.links.len() {
            self.links.resize(idx + 1, Link::default());
        }
    }

    #[inline]
    pub(crate) fn is_linked(&self, idx: usize) -> bool {
        self.links.get(idx).is_some_and(|link| link.linked)
    }
}

/// A FIFO/LRU queue whose head is the best victim and whose tail is the most
/// recently inserted entry.
#[derive(Debug, Default)]
pub(crate) struct PageQueue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl PageQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn insert_at_tail(&mut self, arena: &mut LinkArena, idx: usize) {
        arena.ensure_slot(idx);
        assert!(!arena.links[idx].linked, "slot {idx} already queued");

        arena.links[idx] = Link {
            prev: self.tail,
            next: None,
            linked: true,
        };
        match self.tail {
            Some(tail) => arena.links[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    pub(crate) fn insert_at_head(&mut self, arena: &mut LinkArena, idx: usize) {
        arena.ensure_slot(idx);
        assert!(!arena.links[idx].linked, "slot {idx} already queued");

        arena.links[idx] = Link {
            prev: None,
            next: self.head,
            linked: true,
        };
        match self.head {
            Some(head) => arena.links[head].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
    }

    /// Unlink `idx`. The caller guarantees it belongs to this queue.
    pub(crate) fn remove(&mut self, arena: &mut LinkArena, idx: usize) {
        assert!(arena.is_linked(idx), "slot {idx} is not queued");

        let Link { prev, next, .. } = arena.links[idx];
        match prev {
            Some(prev) => arena.links[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena.links[next].prev = prev,
            None => self.tail = prev,
        }
        arena.links[idx] = Link::default();
        self.len -= 1;
    }

    pub(crate) fn move_to_tail(&mut self, arena: &mut LinkArena, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.remove(arena, idx);
        self.insert_at_tail(arena, idx);
    }

    pub(crate) fn move_to_head(&mut self, arena: &mut LinkArena, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.remove(arena, idx);
        self.insert_at_head(arena, idx);
    }

    /// Walk from head (best victim) to tail.
    pub(crate) fn iter<'a>(&self, arena: &'a LinkArena) -> QueueIter<'a> {
        QueueIter {
            arena,
            next: self.head,
        }
    }
}

pub(crate) struct QueueIter<'a> {
    arena: &'a LinkArena,
    next: Option<usize>,
}

impl Iterator for QueueIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.arena.links[current].next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(queue: &PageQueue, arena: &LinkArena) -> Vec<usize> {
        queue.iter(arena).collect()
    }

    #[test]
    fn test_insert_at_tail_keeps_fifo_order() {
        let mut arena = LinkArena::new(4);
        let mut queue = PageQueue::new();
        for idx in 0..4 {
            queue.insert_at_tail(&mut arena, idx);
        }

        assert_eq!(collect(&queue, &arena), vec![0, 1, 2, 3]);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.head(), Some(0));
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut arena = LinkArena::new(5);
        let mut queue = PageQueue::new();
        for idx in 0..5 {
            queue.insert_at_tail(&mut arena, idx);
        }

        queue.remove(&mut arena, 0);
        queue.remove(&mut arena, 2);
        queue.remove(&mut arena, 4);

        assert_eq!(collect(&queue, &arena), vec![1, 3]);
        assert!(!arena.is_linked(2));
        queue.remove(&mut arena, 1);
        queue.remove(&mut arena, 3);
        assert!(queue.is_empty());
        assert_eq!(queue.head(), None);
    }

    #[test]
    fn test_moves() {
        let mut arena = LinkArena::new(3);
        let mut queue = PageQueue::new();
        for idx in 0..3 {
            queue.insert_at_tail(&mut arena, idx);
        }

        queue.move_to_tail(&mut arena, 0);
        assert_eq!(collect(&queue, &arena), vec![1, 2, 0]);

        queue.move_to_head(&mut arena, 2);
        assert_eq!(collect(&queue, &arena), vec![2, 1, 0]);
    }

    #[test]
    fn test_two_queues_share_an_arena() {
        let mut arena = LinkArena::new(4);
        let mut a = PageQueue::new();
        let mut b = PageQueue::new();
        a.insert_at_tail(&mut arena, 0);
        b.insert_at_tail(&mut arena, 1);
        a.insert_at_tail(&mut arena, 2);
        b.insert_at_head(&mut arena, 3);

        assert_eq!(collect(&a, &arena), vec![0, 2]);
        assert_eq!(collect(&b, &arena), vec![3, 1]);
    }

    #[test]
    fn test_arena_grows_on_demand() {
        let mut arena = LinkArena::new(0);
        let mut queue = PageQueue::new();
        queue.insert_at_tail(&mut arena, 9);
        assert!(arena.is_linked(9));
        assert!(!arena.is_linked(3));
    }

    #[test]
    #[should_panic(expected = "already queued")]
    fn test_double_insert_panics() {
        let mut arena = LinkArena::new(1);
        let mut queue = PageQueue::new();
        queue.insert_at_tail(&mut arena, 0);
        queue.insert_at_tail(&mut arena, 0);
    }
}
