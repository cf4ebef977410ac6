use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sink for pool activity counters.
///
/// Implementations see every committed node and relationship change, every
/// commit and abort,
/// and every segment replayed during recovery. Calls happen on the thread that
/// performed the work, after it succeeded.
pub trait PoolMetrics: Send + Sync {
    /// Records a committed node creation.
    fn node_created(&self);

    /// Records a committed node deletion.
    fn node_deleted(&self);

    /// Records a committed relationship creation.
    fn relationship_created(&self);

    /// Records a committed relationship deletion, including those removed
    /// along with a deleted endpoint.
    fn relationship_deleted(&self);

    /// Records a completed commit.
    ///
    /// # Parameters
    /// * `records` - Number of redo records in the segment.
    /// * `bytes` - Encoded payload size.
    fn commit(&self, records: usize, bytes: usize);

    /// Records an aborted transaction.
    fn abort(&self);

    /// Records a segment replayed at open.
    fn replay(&self);
}

/// A no-op implementation of [`PoolMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl PoolMetrics for NoopMetrics {
    fn node_created(&self) {}
    fn node_deleted(&self) {}
    fn relationship_created(&self) {}
    fn relationship_deleted(&self) {}
    fn commit(&self, _records: usize, _bytes: usize) {}
    fn abort(&self) {}
    fn replay(&self) {}
}

/// Atomic counters implementing [`PoolMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Nodes created.
    pub nodes_created: AtomicU64,

    /// Nodes deleted.
    pub nodes_deleted: AtomicU64,

    /// Relationships created.
    pub relationships_created: AtomicU64,

    /// Relationships deleted.
    pub relationships_deleted: AtomicU64,

    /// Commits completed.
    pub commits: AtomicU64,

    /// Redo records written across all commits.
    pub log_records: AtomicU64,

    /// Payload bytes flushed across all commits.
    pub log_bytes: AtomicU64,

    /// Transactions aborted.
    pub aborts: AtomicU64,

    /// Segments replayed by recovery.
    pub replays: AtomicU64,
}

impl PoolMetrics for CounterMetrics {
    fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    fn node_deleted(&self) {
        self.nodes_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_created(&self) {
        self.relationships_created.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_deleted(&self) {
        self.relationships_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn commit(&self, records: usize, bytes: usize) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.log_records
            .fetch_add(records as u64, Ordering::Relaxed);
        self.log_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    fn replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics sink, a [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn PoolMetrics> {
    Arc::new(NoopMetrics)
}
