//! Victim (eviction) policies.
//!
//! - [`LruVictimPolicy`] - single least-recently-used queue
//! - [`TwoQVictimPolicy`] - Johnson-Shasha 2Q with a bitmap history window
//!
//! Both keep their queues in index-based linked lists ([`list`]) guarded by
//! a policy-wide `RwLock`: victim scans hold it shared, notifications take it
//! exclusively.

mod list;
mod lru;
mod two_q;

use std::ops::ControlFlow;

use crate::common::config::{CacheConfig, VictimPolicyKind};
use crate::common::{FrameId, PageId};

pub use lru::LruVictimPolicy;
pub use two_q::TwoQVictimPolicy;

/// Callback handed each candidate during a victim scan, best victim first.
/// Returning `ControlFlow::Break` ends the scan.
pub type VictimVisitor<'a> = dyn FnMut(FrameId) -> ControlFlow<()> + 'a;

/// Decides which resident page the cache evicts next.
///
/// The cache issues notifications while holding a pin on the frame, except
/// [`notify_page_unpin`](VictimPolicy::notify_page_unpin), which follows the
/// pin count reaching zero and may race with a fresh pin. Victim scans still
/// check pin counts, so a policy only needs to keep its lists consistent.
/// Visitors passed to the scan methods run under the policy's shared lock and
/// must not call back into the policy.
pub trait VictimPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Total number of frames the cache will register. Called once, before
    /// any frame is registered.
    fn set_allocated_page_count(&self, _count: usize) {}

    fn register_page(&self, frame: FrameId);

    fn unregister_page(&self, frame: FrameId);

    /// A mapped page was touched. `pin` is set when the caller now holds it.
    fn notify_page_access(&self, frame: FrameId, page_id: PageId, pin: bool);

    /// Hint that the page is unlikely to be revisited soon.
    fn notify_page_nice(&self, frame: FrameId);

    /// `frame` now holds `page_id`.
    fn notify_page_map(&self, frame: FrameId, page_id: PageId, pin: bool);

    /// `frame` no longer holds `page_id`. `discard` is set when the page is
    /// being dropped for good rather than victimized.
    fn notify_page_unmap(&self, frame: FrameId, page_id: PageId, discard: bool);

    /// The pin count of `frame` dropped to zero. Sent once per drop.
    fn notify_page_unpin(&self, _frame: FrameId) {}

    fn notify_page_dirty(&self, _frame: FrameId) {}

    fn notify_page_clean(&self, _frame: FrameId) {}

    /// `page_id` was deallocated; forget any history about it.
    fn notify_page_discard(&self, _page_id: PageId) {}

    /// Visit eviction candidates, best victim first.
    fn for_each_victim(&self, visit: &mut VictimVisitor<'_>);

    /// Visit dirty eviction candidates, best victim first. Policies without
    /// dirty tracking fall back to the full victim range.
    fn for_each_dirty_victim(&self, visit: &mut VictimVisitor<'_>) {
        self.for_each_victim(visit)
    }

    /// Whether [`VictimPolicy::for_each_dirty_victim`] yields only dirty pages.
    fn tracks_dirty_pages(&self) -> bool {
        false
    }
}

/// Build the policy named by `config`.
pub fn create_victim_policy(config: &CacheConfig) -> Box<dyn VictimPolicy> {
    match config.victim_policy {
        VictimPolicyKind::Lru => Box::new(LruVictimPolicy::new()),
        VictimPolicyKind::TwoQ => Box::new(TwoQVictimPolicy::new(
            config.freshman_queue_percentage,
            config.page_history_queue_percentage,
        )),
    }
}

/// Collect a full victim scan. Test helper.
#[cfg(test)]
pub(crate) fn victims(policy: &dyn VictimPolicy) -> Vec<usize> {
    let mut out = Vec::new();
    policy.for_each_victim(&mut |frame| {
        out.push(frame.0);
        ControlFlow::Continue(())
    });
    out
}

#[cfg(test)]
pub(crate) fn dirty_victims(policy: &dyn VictimPolicy) -> Vec<usize> {
    let mut out = Vec::new();
    policy.for_each_dirty_victim(&mut |frame| {
        out.push(frame.0);
        ControlFlow::Continue(())
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_picks_policy() {
        assert_eq!(create_victim_policy(&CacheConfig::lru(4)).name(), "lru");
        assert_eq!(
            create_victim_policy(&CacheConfig::with_pool_size(4)).name(),
            "2q"
        );
    }

    #[test]
    fn test_scan_stops_on_break() {
        let policy = LruVictimPolicy::new();
        for i in 0..5 {
            policy.register_page(FrameId::new(i));
            policy.notify_page_map(FrameId::new(i), PageId::new(i as u64), false);
        }

        let mut seen = Vec::new();
        policy.for_each_victim(&mut |frame| {
            seen.push(frame.0);
            if frame.0 == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
