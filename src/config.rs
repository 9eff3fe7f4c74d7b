use crate::core::{MirrorError, Result};
use crate::partition::ClusterPartition;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the load/patch/convert pipeline and the parallel merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Conversion workers per load.
    pub worker_count: usize,
    /// Capacity of the streaming-mode output queue.
    pub output_queue_capacity: usize,
    /// Capacity of the merge queue shared by all merged sources.
    pub merge_queue_capacity: usize,
    /// Longest wait for one merged item before the merge fails.
    pub merge_next_timeout_ms: u64,
    /// Re-check interval of a streaming consumer waiting for items.
    pub poll_interval_ms: u64,
    /// Longest wait for the worker pool of an eager load to finish.
    pub await_termination_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            worker_count: 15,
            output_queue_capacity: 10_000,
            merge_queue_capacity: 10_000,
            merge_next_timeout_ms: 5 * 60_000,
            poll_interval_ms: 250,
            await_termination_ms: 30 * 60_000,
        }
    }
}

impl LoadConfig {
    pub fn merge_next_timeout(&self) -> Duration {
        Duration::from_millis(self.merge_next_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn await_termination(&self) -> Duration {
        Duration::from_millis(self.await_termination_ms)
    }
}

/// Settings of the bulk synchronization writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Start with the catch-all exception policy instead of rethrowing transient failures.
    pub catch_all: bool,
    /// Case-insensitive patterns marking a failure message as transient.
    pub transient_patterns: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            catch_all: false,
            transient_patterns: vec![
                "not master".to_string(),
                "node is recovering".to_string(),
                "connection refused".to_string(),
                "connection reset".to_string(),
                "timed out".to_string(),
                "no replica set members".to_string(),
                "socket".to_string(),
            ],
        }
    }
}

/// Top-level configuration.
///
/// # Examples
///
/// ```
/// use docmirror::{ClusterPartition, MirrorConfig};
///
/// # fn main() -> docmirror::Result<()> {
/// let config = MirrorConfig::new()
///     .worker_count(4)
///     .partition(ClusterPartition::new(1, 2)?);
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Partition served by this process. `None` loads everything.
    #[serde(default)]
    pub partition: Option<ClusterPartition>,
}

impl MirrorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of conversion workers
    pub fn worker_count(mut self, workers: usize) -> Self {
        self.load.worker_count = workers;
        self
    }

    /// Set the streaming output queue capacity
    pub fn output_queue_capacity(mut self, capacity: usize) -> Self {
        self.load.output_queue_capacity = capacity;
        self
    }

    /// Set the merge queue capacity
    pub fn merge_queue_capacity(mut self, capacity: usize) -> Self {
        self.load.merge_queue_capacity = capacity;
        self
    }

    /// Set the merge pull timeout
    pub fn merge_next_timeout(mut self, timeout: Duration) -> Self {
        self.load.merge_next_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the streaming poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.load.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Serve a single partition
    pub fn partition(mut self, partition: ClusterPartition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Start with the catch-all exception policy
    pub fn catch_all(mut self, enabled: bool) -> Self {
        self.sync.catch_all = enabled;
        self
    }

    /// Add a transient failure pattern
    pub fn transient_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.sync.transient_patterns.push(pattern.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.load.worker_count == 0 {
            return Err(MirrorError::IllegalArgument(
                "load.worker_count must be >= 1".to_string(),
            ));
        }
        if self.load.output_queue_capacity == 0 || self.load.merge_queue_capacity == 0 {
            return Err(MirrorError::IllegalArgument(
                "queue capacities must be >= 1".to_string(),
            ));
        }
        if let Some(partition) = &self.partition {
            partition.validate()?;
        }
        Ok(())
    }
}
