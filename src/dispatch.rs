//! Ordered hand-off queues between background producers and polling consumers.
//!
//! A dispatch queue is the seam between the core's tasks and whatever
//! consumes their output: the producer pushes from its own task, the
//! consumer polls on its own refresh cycle with [`DispatchReceiver::try_recv`].
//! Neither side ever blocks the other. Arrival order is preserved.
//!
//! Two overflow policies cover the two kinds of traffic:
//!
//! - [`OverflowPolicy::DropOldest`] for frame snapshots, where the latest
//!   screen state matters more than history;
//! - [`OverflowPolicy::Unbounded`] for alert/telemetry batches, where
//!   historical records must not be silently lost.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// What to do when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Keep at most `cap` items; pushing to a full queue evicts the oldest.
    DropOldest(usize),
    /// No limit. Use only where the consumer is known to keep up over time.
    Unbounded,
}

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    name: &'static str,
}

/// Producer half of a dispatch queue. Exactly one per queue: the owning
/// component holds it exclusively, which is what guarantees arrival order.
pub struct DispatchSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of a dispatch queue. Cloneable; all clones observe the
/// same underlying queue.
pub struct DispatchReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DispatchReceiver<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

/// Create a dispatch queue with the given overflow policy.
///
/// `name` labels overflow warnings in logs.
pub fn dispatch_queue<T>(
    name: &'static str,
    policy: OverflowPolicy,
) -> (DispatchSender<T>, DispatchReceiver<T>) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        policy,
        dropped: AtomicU64::new(0),
        name,
    });
    (DispatchSender { shared: Arc::clone(&shared) }, DispatchReceiver { shared })
}

impl<T> DispatchSender<T> {
    /// Push one item. Never blocks; under `DropOldest` a full queue evicts
    /// its oldest item first.
    pub fn send(&self, item: T) {
        let mut queue = match self.shared.queue.lock() {
            Ok(guard) => guard,
            // A consumer panicked mid-pop; the queue contents are still
            // structurally sound, so keep producing.
            Err(poisoned) => poisoned.into_inner(),
        };

        if let OverflowPolicy::DropOldest(cap) = self.shared.policy {
            while queue.len() >= cap.max(1) {
                queue.pop_front();
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(
                        queue = self.shared.name,
                        dropped, "dispatch queue overflow, evicting oldest"
                    );
                }
            }
        }

        queue.push_back(item);
    }

    /// Total items evicted by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<T> DispatchReceiver<T> {
    /// Pop the next item in arrival order, or `None` when nothing is ready.
    /// Never blocks.
    pub fn try_recv(&self) -> Option<T> {
        let mut queue = match self.shared.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.pop_front()
    }

    /// Pop everything currently queued, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        let mut queue = match self.shared.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.drain(..).collect()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        match self.shared.queue.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let (tx, rx) = dispatch_queue("test", OverflowPolicy::Unbounded);
        for i in 0..100 {
            tx.send(i);
        }
        for i in 0..100 {
            assert_eq!(rx.try_recv(), Some(i));
        }
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn empty_queue_returns_none_without_blocking() {
        let (_tx, rx) = dispatch_queue::<u32>("test", OverflowPolicy::Unbounded);
        assert_eq!(rx.try_recv(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn drop_oldest_evicts_from_the_front() {
        let (tx, rx) = dispatch_queue("frames", OverflowPolicy::DropOldest(3));
        for i in 0..5 {
            tx.send(i);
        }
        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn unbounded_never_drops() {
        let (tx, rx) = dispatch_queue("records", OverflowPolicy::Unbounded);
        for i in 0..10_000 {
            tx.send(i);
        }
        assert_eq!(tx.dropped(), 0);
        assert_eq!(rx.len(), 10_000);
    }

    #[test]
    fn receiver_clones_share_the_queue() {
        let (tx, rx) = dispatch_queue("test", OverflowPolicy::Unbounded);
        let rx2 = rx.clone();
        tx.send(1);
        tx.send(2);
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx2.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn producer_side_order_survives_interleaved_consumption() {
        let (tx, rx) = dispatch_queue("test", OverflowPolicy::DropOldest(4));
        tx.send(1);
        tx.send(2);
        assert_eq!(rx.try_recv(), Some(1));
        tx.send(3);
        tx.send(4);
        assert_eq!(rx.drain(), vec![2, 3, 4]);
    }
}
