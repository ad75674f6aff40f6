//! Sparse broad-phase grid with bidirectional membership tracking
//!
//! Buckets map packed cell keys to the entities overlapping that cell;
//! a reverse map records exactly which cells each entity occupies. The
//! two stay transactionally consistent: every mutation applies the full
//! delta or nothing at all.

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::core::config::GridConfig;
use crate::core::types::{Aabb, EntityId};
use crate::grid::cell::{CellKey, CellRange};
use crate::metrics::{MetricsCollector, MetricsSnapshot, OccupancySample, RollingAggregates};

/// Mutation counters for the life of the index
///
/// Monotonically increasing; `clear()` empties the index but leaves
/// these untouched, so a frame loop that rebuilds every frame still
/// accumulates totals across the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GridStats {
    pub insertions: u64,
    pub updates: u64,
    pub removals: u64,
}

/// Grid-based spatial index for broad-phase collision candidate queries
///
/// Owned and mutated by a single frame loop; all operations run to
/// completion synchronously. Entities whose AABB spans multiple cells
/// appear in every covered bucket but are tracked once.
pub struct BroadPhaseGrid {
    cell_size: f32,
    buckets: AHashMap<CellKey, Vec<EntityId>>,
    entity_cells: AHashMap<EntityId, Vec<CellKey>>,
    stats: GridStats,
    metrics: MetricsCollector,
}

impl BroadPhaseGrid {
    /// Construct an index for one simulation world
    ///
    /// The config is assumed validated; a non-positive cell size would
    /// collapse every coordinate into the same cell.
    pub fn new(config: GridConfig) -> Self {
        debug_assert!(config.validate().is_ok());
        Self {
            cell_size: config.cell_size,
            buckets: AHashMap::new(),
            entity_cells: AHashMap::new(),
            stats: GridStats::default(),
            metrics: MetricsCollector::new(config.metrics_window),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn stats(&self) -> GridStats {
        self.stats
    }

    /// Number of distinct entities currently tracked
    #[inline]
    pub fn tracked_entities(&self) -> usize {
        self.entity_cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entity_cells.is_empty()
    }

    /// Empty all buckets and the reverse index
    ///
    /// Stats counters and the metrics history survive; only recreating
    /// the index resets those.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.entity_cells.clear();
    }

    /// Register `id` in every cell covered by `bounds`
    ///
    /// Re-inserting a known id relocates it; it never duplicates.
    /// Malformed bounds (non-finite, negative dimensions) leave the
    /// index untouched and do not count as an insertion.
    pub fn insert(&mut self, id: EntityId, bounds: Aabb) {
        if !bounds.is_valid() {
            tracing::debug!(?id, ?bounds, "insert skipped: malformed bounds");
            return;
        }
        if self.entity_cells.contains_key(&id) {
            self.detach(id);
        }
        let keys: Vec<CellKey> = CellRange::covering(&bounds, self.cell_size).keys().collect();
        for &key in &keys {
            self.buckets.entry(key).or_default().push(id);
        }
        self.entity_cells.insert(id, keys);
        self.stats.insertions += 1;
    }

    /// Move `id` to the cells covered by its new bounds
    ///
    /// Applies only the delta: the entity is removed from cells it no
    /// longer covers and added to newly covered ones, so a stationary
    /// entity costs one range computation and no bucket churn.
    ///
    /// The update counter counts *requests*, not mutations: it
    /// increments on every well-formed call, including the no-op case.
    /// An unknown id is treated as having an empty old cell set.
    pub fn update(&mut self, id: EntityId, bounds: Aabb) {
        if !bounds.is_valid() {
            tracing::debug!(?id, ?bounds, "update skipped: malformed bounds");
            return;
        }
        self.stats.updates += 1;

        let new_keys: Vec<CellKey> = CellRange::covering(&bounds, self.cell_size).keys().collect();
        // Covered cells are generated in row-major order, so slice
        // equality is set equality.
        if self
            .entity_cells
            .get(&id)
            .is_some_and(|old| old[..] == new_keys[..])
        {
            return;
        }

        let old_keys = self.entity_cells.remove(&id).unwrap_or_default();
        let old_set: AHashSet<CellKey> = old_keys.iter().copied().collect();
        let new_set: AHashSet<CellKey> = new_keys.iter().copied().collect();

        for &key in &old_keys {
            if !new_set.contains(&key) {
                self.remove_from_bucket(key, id);
            }
        }
        for &key in &new_keys {
            if !old_set.contains(&key) {
                self.buckets.entry(key).or_default().push(id);
            }
        }
        self.entity_cells.insert(id, new_keys);
    }

    /// Remove `id` from the index
    ///
    /// Returns `false` without mutating anything when the id is
    /// unknown; never panics.
    pub fn remove(&mut self, id: EntityId) -> bool {
        if self.detach(id) {
            self.stats.removals += 1;
            true
        } else {
            false
        }
    }

    /// Collect the deduplicated candidate set overlapping `bounds`
    ///
    /// An entity spanning several queried cells appears exactly once.
    /// Result order is unspecified. Malformed bounds yield an empty set.
    pub fn query(&self, bounds: Aabb) -> Vec<EntityId> {
        if !bounds.is_valid() {
            return Vec::new();
        }
        let mut seen = AHashSet::new();
        let mut result = Vec::new();
        for key in CellRange::covering(&bounds, self.cell_size).keys() {
            if let Some(bucket) = self.buckets.get(&key) {
                for &id in bucket {
                    if seen.insert(id) {
                        result.push(id);
                    }
                }
            }
        }
        result
    }

    /// Rebuild the index from scratch for a fully-procedural frame
    ///
    /// Equivalent to `clear()` followed by `insert()` for each id with
    /// the bounds `bounds_of` returns for it.
    pub fn rebuild<I, F>(&mut self, ids: I, mut bounds_of: F)
    where
        I: IntoIterator<Item = EntityId>,
        F: FnMut(EntityId) -> Aabb,
    {
        self.clear();
        for id in ids {
            let bounds = bounds_of(id);
            self.insert(id, bounds);
        }
    }

    /// Snapshot occupancy and record a sample in the rolling history
    ///
    /// The once-per-frame metrics call. History length stays bounded by
    /// the configured window.
    pub fn sample_metrics(&mut self) -> MetricsSnapshot {
        let snapshot = self.peek_metrics();
        self.metrics.record(OccupancySample {
            cell_count: snapshot.cell_count,
            max_bucket_size: snapshot.max_bucket_size,
            tracked_entities: snapshot.tracked_entities,
            timestamp_ms: snapshot.timestamp_ms,
        });
        snapshot
    }

    /// Snapshot occupancy without touching the rolling history
    pub fn peek_metrics(&self) -> MetricsSnapshot {
        // Buckets are pruned when emptied, so the map length is the
        // non-empty cell count and one pass finds the largest bucket.
        let max_bucket_size = self.buckets.values().map(Vec::len).max().unwrap_or(0);
        MetricsSnapshot {
            cell_count: self.buckets.len(),
            max_bucket_size,
            tracked_entities: self.entity_cells.len(),
            stats: self.stats,
            timestamp_ms: crate::metrics::now_ms(),
        }
    }

    /// Owned copies of the rolling history, oldest first
    ///
    /// Copies rather than references so an off-thread telemetry reader
    /// never observes the live buffer mid-mutation.
    pub fn history_snapshot(&self) -> Vec<OccupancySample> {
        self.metrics.history_snapshot()
    }

    /// Rolling avg/min/max over the current history window
    pub fn rolling_aggregates(&self) -> Option<RollingAggregates> {
        self.metrics.aggregates()
    }

    #[inline]
    pub fn metrics_window(&self) -> usize {
        self.metrics.window()
    }

    /// Drop the reverse entry for `id` and pull it out of every bucket
    /// it listed. Returns whether the id was known.
    fn detach(&mut self, id: EntityId) -> bool {
        let Some(keys) = self.entity_cells.remove(&id) else {
            return false;
        };
        for key in keys {
            self.remove_from_bucket(key, id);
        }
        true
    }

    #[inline]
    fn remove_from_bucket(&mut self, key: CellKey, id: EntityId) {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|&e| e != id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> BroadPhaseGrid {
        BroadPhaseGrid::new(GridConfig::default())
    }

    #[test]
    fn test_insert_then_query() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.insert(id, Aabb::new(10.0, 10.0, 16.0, 16.0));
        assert_eq!(grid.query(Aabb::new(0.0, 0.0, 32.0, 32.0)), vec![id]);
        assert_eq!(grid.stats().insertions, 1);
    }

    #[test]
    fn test_span_entity_deduplicated() {
        let mut grid = grid();
        let id = EntityId::new();
        // 200x200 box spans a 4x4 block of 64-unit cells
        grid.insert(id, Aabb::new(0.0, 0.0, 200.0, 200.0));
        let hits = grid.query(Aabb::new(0.0, 0.0, 200.0, 200.0));
        assert_eq!(hits.len(), 1, "span entity must appear exactly once");
        assert_eq!(grid.tracked_entities(), 1);
    }

    #[test]
    fn test_reinsert_relocates() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.insert(id, Aabb::new(0.0, 0.0, 16.0, 16.0));
        grid.insert(id, Aabb::new(64.0, 64.0, 16.0, 16.0));
        assert!(!grid.query(Aabb::new(0.0, 0.0, 20.0, 20.0)).contains(&id));
        assert!(grid.query(Aabb::new(64.0, 64.0, 20.0, 20.0)).contains(&id));
        assert_eq!(grid.tracked_entities(), 1);
        assert_eq!(grid.stats().insertions, 2);
    }

    #[test]
    fn test_update_same_cells_is_noop_but_counted() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.insert(id, Aabb::new(4.0, 4.0, 8.0, 8.0));
        // Nudge within the same cell
        grid.update(id, Aabb::new(6.0, 6.0, 8.0, 8.0));
        assert!(grid.query(Aabb::new(0.0, 0.0, 10.0, 10.0)).contains(&id));
        assert_eq!(grid.stats().updates, 1, "no-op updates still count requests");
    }

    #[test]
    fn test_update_applies_delta() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.insert(id, Aabb::new(0.0, 0.0, 16.0, 16.0));
        grid.update(id, Aabb::new(200.0, 200.0, 16.0, 16.0));
        assert!(!grid.query(Aabb::new(0.0, 0.0, 32.0, 32.0)).contains(&id));
        assert!(grid.query(Aabb::new(192.0, 192.0, 32.0, 32.0)).contains(&id));
    }

    #[test]
    fn test_update_unknown_id_registers_it() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.update(id, Aabb::new(0.0, 0.0, 16.0, 16.0));
        assert!(grid.query(Aabb::new(0.0, 0.0, 16.0, 16.0)).contains(&id));
        assert_eq!(grid.stats().updates, 1);
        assert_eq!(grid.stats().insertions, 0);
    }

    #[test]
    fn test_remove_known_and_unknown() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.insert(id, Aabb::new(0.0, 0.0, 16.0, 16.0));
        assert!(grid.remove(id));
        assert!(grid.query(Aabb::new(0.0, 0.0, 64.0, 64.0)).is_empty());
        assert!(!grid.remove(id), "second remove finds nothing");
        assert_eq!(grid.stats().removals, 1, "only true removals count");
    }

    #[test]
    fn test_malformed_bounds_rejected_without_damage() {
        let mut grid = grid();
        let id = EntityId::new();
        grid.insert(id, Aabb::new(0.0, 0.0, 16.0, 16.0));
        let before = grid.query(Aabb::new(0.0, 0.0, 64.0, 64.0));

        grid.insert(id, Aabb::new(f32::NAN, 0.0, 1.0, 1.0));
        grid.update(id, Aabb::new(0.0, f32::INFINITY, 1.0, 1.0));
        grid.insert(EntityId::new(), Aabb::new(0.0, 0.0, -5.0, 5.0));

        assert_eq!(grid.query(Aabb::new(0.0, 0.0, 64.0, 64.0)), before);
        assert_eq!(grid.stats().insertions, 1);
        assert_eq!(grid.stats().updates, 0, "malformed update is not a request");
        assert!(grid.query(Aabb::new(f32::NAN, 0.0, 1.0, 1.0)).is_empty());
    }

    #[test]
    fn test_clear_keeps_stats_and_history() {
        let mut grid = grid();
        grid.insert(EntityId::new(), Aabb::new(0.0, 0.0, 16.0, 16.0));
        grid.sample_metrics();
        grid.clear();
        assert!(grid.is_empty());
        assert_eq!(grid.stats().insertions, 1);
        assert_eq!(grid.history_snapshot().len(), 1);
    }

    #[test]
    fn test_negative_space_tiles_symmetrically() {
        let mut grid = grid();
        let id = EntityId::new();
        // Cell (-1, -1) covers [-64, 0) on both axes
        grid.insert(id, Aabb::new(-32.0, -32.0, 16.0, 16.0));
        assert!(grid.query(Aabb::new(-64.0, -64.0, 63.0, 63.0)).contains(&id));
        assert!(!grid.query(Aabb::new(0.0, 0.0, 63.0, 63.0)).contains(&id));
    }

    #[test]
    fn test_gauges_after_mutation() {
        let mut grid = grid();
        let a = EntityId::new();
        let b = EntityId::new();
        grid.insert(a, Aabb::new(0.0, 0.0, 16.0, 16.0));
        grid.insert(b, Aabb::new(8.0, 8.0, 16.0, 16.0));

        let m = grid.peek_metrics();
        assert_eq!(m.cell_count, 1);
        assert_eq!(m.max_bucket_size, 2);
        assert_eq!(m.tracked_entities, 2);

        grid.remove(a);
        grid.remove(b);
        let m = grid.peek_metrics();
        assert_eq!(m.cell_count, 0, "emptied buckets are pruned");
        assert_eq!(m.max_bucket_size, 0);
        assert_eq!(m.tracked_entities, 0);
    }
}
