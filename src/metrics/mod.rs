//! Occupancy metrics with a bounded rolling history
//!
//! Each grid owns exactly one collector; history is never shared
//! process-wide, so parallel worlds and tests cannot cross-contaminate
//! each other's samples.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::grid::index::GridStats;

/// One occupancy sample captured by `sample_metrics()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancySample {
    /// Number of non-empty buckets
    pub cell_count: usize,
    /// Largest bucket cardinality
    pub max_bucket_size: usize,
    /// Distinct tracked ids, never a sum over buckets
    pub tracked_entities: usize,
    /// Unix epoch milliseconds at capture time
    pub timestamp_ms: u64,
}

/// On-demand occupancy snapshot handed to the telemetry exporter
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub cell_count: usize,
    pub max_bucket_size: usize,
    pub tracked_entities: usize,
    pub stats: GridStats,
    pub timestamp_ms: u64,
}

/// avg/min/max of one gauge over the history window
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Aggregate {
    pub avg: f64,
    pub min: usize,
    pub max: usize,
}

/// Rolling aggregates over the current history window
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RollingAggregates {
    pub samples: usize,
    pub cell_count: Aggregate,
    pub max_bucket_size: Aggregate,
    pub tracked_entities: Aggregate,
}

/// Bounded FIFO history of occupancy samples
///
/// Once length exceeds the window, oldest samples are evicted first,
/// keeping memory bounded regardless of session length.
pub struct MetricsCollector {
    window: usize,
    history: VecDeque<OccupancySample>,
}

impl MetricsCollector {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append a sample, evicting oldest entries down to the window size
    pub fn record(&mut self, sample: OccupancySample) {
        self.history.push_back(sample);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    /// Owned copies of the history, oldest first
    pub fn history_snapshot(&self) -> Vec<OccupancySample> {
        self.history.iter().copied().collect()
    }

    /// Rolling avg/min/max per gauge; `None` while the history is empty
    pub fn aggregates(&self) -> Option<RollingAggregates> {
        if self.history.is_empty() {
            return None;
        }
        Some(RollingAggregates {
            samples: self.history.len(),
            cell_count: self.aggregate(|s| s.cell_count),
            max_bucket_size: self.aggregate(|s| s.max_bucket_size),
            tracked_entities: self.aggregate(|s| s.tracked_entities),
        })
    }

    fn aggregate<F: Fn(&OccupancySample) -> usize>(&self, gauge: F) -> Aggregate {
        let mut min = usize::MAX;
        let mut max = 0;
        let mut sum = 0u64;
        for sample in &self.history {
            let v = gauge(sample);
            min = min.min(v);
            max = max.max(v);
            sum += v as u64;
        }
        Aggregate {
            avg: sum as f64 / self.history.len() as f64,
            min,
            max,
        }
    }
}

/// Unix epoch milliseconds; pre-epoch clocks read as zero rather than
/// aborting the frame.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cells: usize, bucket: usize, tracked: usize) -> OccupancySample {
        OccupancySample {
            cell_count: cells,
            max_bucket_size: bucket,
            tracked_entities: tracked,
            timestamp_ms: now_ms(),
        }
    }

    #[test]
    fn test_history_bounded_by_window() {
        let mut collector = MetricsCollector::new(3);
        for i in 0..10 {
            collector.record(sample(i, 1, i));
        }
        assert_eq!(collector.len(), 3);
        let history = collector.history_snapshot();
        // Oldest evicted first: samples 7, 8, 9 remain
        assert_eq!(history[0].cell_count, 7);
        assert_eq!(history[2].cell_count, 9);
    }

    #[test]
    fn test_aggregates_over_window() {
        let mut collector = MetricsCollector::new(60);
        collector.record(sample(2, 1, 4));
        collector.record(sample(4, 3, 8));
        collector.record(sample(6, 2, 6));

        let agg = collector.aggregates().expect("non-empty history");
        assert_eq!(agg.samples, 3);
        assert_eq!(agg.cell_count.min, 2);
        assert_eq!(agg.cell_count.max, 6);
        assert!((agg.cell_count.avg - 4.0).abs() < f64::EPSILON);
        assert_eq!(agg.max_bucket_size.max, 3);
        assert_eq!(agg.tracked_entities.avg, 6.0);
    }

    #[test]
    fn test_empty_history_has_no_aggregates() {
        let collector = MetricsCollector::new(60);
        assert!(collector.aggregates().is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut collector = MetricsCollector::new(2);
        collector.record(sample(1, 1, 1));
        let snapshot = collector.history_snapshot();
        collector.record(sample(2, 2, 2));
        collector.record(sample(3, 3, 3));
        // The earlier snapshot is unaffected by later eviction
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].cell_count, 1);
    }
}
