//! Eviction candidate queue.
//!
//! Blocks become eviction candidates the moment their last pin is
//! released. Candidates are kept in a lock-free multi-producer
//! multi-consumer queue ordered by unpin time, giving an approximate
//! FIFO policy rather than strict LRU.
//!
//! The queue holds only weak references, so it never extends a handle's
//! lifetime, and it tolerates stale entries: each node captures the
//! handle's eviction stamp at enqueue time, and a node whose stamp no
//! longer matches is discarded at dequeue.

use std::sync::{Arc, Weak};

use crossbeam_queue::SegQueue;

use crate::handle::BlockHandle;

/// One queued eviction candidate.
pub(crate) struct EvictionNode {
    handle: Weak<BlockHandle>,
    timestamp: u64,
}

impl EvictionNode {
    /// Captures a candidate at its current eviction stamp.
    pub(crate) fn new(handle: &Arc<BlockHandle>, timestamp: u64) -> Self {
        Self {
            handle: Arc::downgrade(handle),
            timestamp,
        }
    }

    /// Upgrades the weak reference; `None` if the handle is gone.
    pub(crate) fn upgrade(&self) -> Option<Arc<BlockHandle>> {
        self.handle.upgrade()
    }

    /// Returns true if the handle has not been pinned and released again
    /// since this node was enqueued.
    pub(crate) fn is_current(&self, handle: &BlockHandle) -> bool {
        self.timestamp == handle.eviction_timestamp()
    }
}

/// Lock-free MPMC queue of eviction candidates.
pub(crate) struct EvictionQueue {
    queue: SegQueue<EvictionNode>,
}

impl EvictionQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Enqueues a candidate. Producers observe per-producer FIFO order.
    pub(crate) fn enqueue(&self, node: EvictionNode) {
        self.queue.push(node);
    }

    /// Dequeues the oldest available candidate without blocking.
    pub(crate) fn try_dequeue(&self) -> Option<EvictionNode> {
        self.queue.pop()
    }

    /// Returns the number of queued nodes, including stale ones.
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for EvictionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionQueue")
            .field("len", &self.len())
            .finish()
    }
}
