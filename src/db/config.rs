use std::fmt;
use std::sync::Arc;

use crate::storage::{default_metrics, PoolMetrics};

/// When commits force data to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Synchronous {
    /// Sync after the flush and after the apply of every commit.
    #[default]
    Full,
    /// Never sync. Commits stay atomic but a power loss may drop recent ones.
    Off,
}

/// Configuration supplied when creating or opening a [`super::Pool`].
#[derive(Clone)]
pub struct PoolOptions {
    /// Log area size for newly created pools; `None` picks one from the pool size.
    pub log_capacity: Option<u64>,
    /// Commit sync policy.
    pub synchronous: Synchronous,
    /// Whether to take the cross-process advisory lock on the pool file.
    pub advisory_lock: bool,
    /// Whether node reads check body checksums.
    pub verify_checksums: bool,
    /// Metrics sink.
    pub metrics: Arc<dyn PoolMetrics>,
}

impl PoolOptions {
    /// Options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log area size used at creation.
    pub fn log_capacity(mut self, bytes: u64) -> Self {
        self.log_capacity = Some(bytes);
        self
    }

    /// Sets the commit sync policy.
    pub fn synchronous(mut self, mode: Synchronous) -> Self {
        self.synchronous = mode;
        self
    }

    /// Enables or disables the advisory file lock.
    pub fn advisory_lock(mut self, enabled: bool) -> Self {
        self.advisory_lock = enabled;
        self
    }

    /// Enables or disables body checksum checks on read.
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Installs a metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn PoolMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn sync(&self) -> bool {
        self.synchronous == Synchronous::Full
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            log_capacity: None,
            synchronous: Synchronous::Full,
            advisory_lock: true,
            verify_checksums: true,
            metrics: default_metrics(),
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("log_capacity", &self.log_capacity)
            .field("synchronous", &self.synchronous)
            .field("advisory_lock", &self.advisory_lock)
            .field("verify_checksums", &self.verify_checksums)
            .finish_non_exhaustive()
    }
}
