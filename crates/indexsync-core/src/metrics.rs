//! Tracker statistics.
//!
//! Atomic counters shared by the indexers and trackers; cheap enough to
//! update on every node.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic counters for indexing throughput.
pub struct TrackerStats {
    /// Nodes processed (indexed, deleted or failed)
    pub nodes_processed: AtomicU64,
    /// Sum of per-node processing time in microseconds
    pub node_time_us: AtomicU64,
    /// Nodes that ended up as error documents
    pub node_errors: AtomicU64,
    /// Text extractions performed
    pub transformations: AtomicU64,
    /// Sum of extraction time in microseconds
    pub transformation_time_us: AtomicU64,
    /// Descendants re-indexed by cascades
    pub cascaded_nodes: AtomicU64,
    start_time: Instant,
}

impl Default for TrackerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerStats {
    pub fn new() -> Self {
        Self {
            nodes_processed: AtomicU64::new(0),
            node_time_us: AtomicU64::new(0),
            node_errors: AtomicU64::new(0),
            transformations: AtomicU64::new(0),
            transformation_time_us: AtomicU64::new(0),
            cascaded_nodes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record the processing time of one node.
    pub fn record_node(&self, elapsed: Duration) {
        self.nodes_processed.fetch_add(1, Ordering::Relaxed);
        self.node_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_node_error(&self) {
        self.node_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time of one text extraction.
    pub fn record_transformation(&self, elapsed: Duration) {
        self.transformations.fetch_add(1, Ordering::Relaxed);
        self.transformation_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cascade(&self, nodes: u64) {
        self.cascaded_nodes.fetch_add(nodes, Ordering::Relaxed);
    }

    pub fn avg_node_time(&self) -> Duration {
        average(&self.node_time_us, &self.nodes_processed)
    }

    pub fn avg_transformation_time(&self) -> Duration {
        average(&self.transformation_time_us, &self.transformations)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            nodes_processed: self.nodes_processed.load(Ordering::Relaxed),
            node_errors: self.node_errors.load(Ordering::Relaxed),
            avg_node_time_us: self.avg_node_time().as_micros() as u64,
            transformations: self.transformations.load(Ordering::Relaxed),
            avg_transformation_time_us: self.avg_transformation_time().as_micros() as u64,
            cascaded_nodes: self.cascaded_nodes.load(Ordering::Relaxed),
        }
    }
}

fn average(total_us: &AtomicU64, count: &AtomicU64) -> Duration {
    let count = count.load(Ordering::Relaxed);
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(total_us.load(Ordering::Relaxed) / count)
    }
}

/// Point-in-time copy of [`TrackerStats`] for logging.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub nodes_processed: u64,
    pub node_errors: u64,
    pub avg_node_time_us: u64,
    pub transformations: u64,
    pub avg_transformation_time_us: u64,
    pub cascaded_nodes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_average() {
        let stats = TrackerStats::new();
        stats.record_node(Duration::from_micros(100));
        stats.record_node(Duration::from_micros(300));
        assert_eq!(stats.avg_node_time(), Duration::from_micros(200));
    }

    #[test]
    fn test_empty_averages() {
        let stats = TrackerStats::new();
        assert_eq!(stats.avg_transformation_time(), Duration::ZERO);
        assert_eq!(stats.snapshot().nodes_processed, 0);
    }
}
