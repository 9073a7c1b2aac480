//! Immutable render snapshots
//!
//! A [`Snapshot`] owns copies of every scalar and point list a consumer
//! needs to redraw. Once built it has no relationship to the registry and
//! can be moved across threads freely.

use serde::Serialize;

use crate::registry::MetricRegistry;
use crate::series::nan_aware;
use crate::timeline::Point;

/// Why a snapshot was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    /// Unthrottled sample
    Sample,
    /// Periodic throttle flush
    Tick,
    /// Chain reorganisation
    Rollback,
    /// Window size changed
    Resize,
    /// Consumer became visible again
    Replay,
    /// Visibility gating was switched off
    Refresh,
    /// Registry was cleared
    Reset,
}

/// Statistics over rendered timeline points.
///
/// Unlike the windowed values these are exact after a rollback, since they
/// come from truncated timelines.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TailStats {
    pub last: f64,
    pub min: f64,
    pub max: f64,
}

impl TailStats {
    fn from_points(points: &[Point]) -> Self {
        let values = || points.iter().map(|&(_, v)| v);
        Self {
            last: points.last().map(|&(_, v)| v).unwrap_or(0.0),
            min: values()
                .reduce(|a, b| nan_aware(a, b, f64::min))
                .unwrap_or(0.0),
            max: values()
                .reduce(|a, b| nan_aware(a, b, f64::max))
                .unwrap_or(0.0),
        }
    }
}

/// State of one metric at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    /// Most recent sample
    pub last: f64,
    /// Moving average over the window
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Window sum, for rate calculations
    pub sum: f64,
    /// Window size in effect
    pub window: usize,
    /// Samples held by the windowed series
    pub samples: usize,
    pub last_key: Option<i64>,
    /// Newest timeline points, oldest first
    pub points: Vec<Point>,
    /// Raw value stats over `points`
    pub tail: TailStats,
    /// Moving average at each of the newest keys, oldest first
    pub averages: Vec<Point>,
    /// Moving-average stats over `averages`
    pub average_tail: TailStats,
}

impl MetricSnapshot {
    /// Zero-valued snapshot for a metric without data
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            last: 0.0,
            average: 0.0,
            min: 0.0,
            max: 0.0,
            sum: 0.0,
            window: 0,
            samples: 0,
            last_key: None,
            points: Vec::new(),
            tail: TailStats::default(),
            averages: Vec::new(),
            average_tail: TailStats::default(),
        }
    }
}

/// One render cycle worth of metric state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Increases with every dispatch of a pipeline
    pub sequence: u64,
    pub reason: DispatchReason,
    /// Set when `reason` is a rollback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_key: Option<i64>,
    /// Metrics sorted by name
    pub metrics: Vec<MetricSnapshot>,
}

impl Snapshot {
    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Copies registry state into snapshots
#[derive(Debug, Clone, Copy)]
pub struct SnapshotBuilder {
    /// Maximum timeline points per metric
    render_points: usize,
}

impl SnapshotBuilder {
    pub fn new(render_points: usize) -> Self {
        Self { render_points }
    }

    pub fn render_points(&self) -> usize {
        self.render_points
    }

    /// Snapshot of a single metric; unknown names get zero defaults.
    pub fn build_metric(&self, registry: &MetricRegistry, name: &str) -> MetricSnapshot {
        let Some(entry) = registry.metric(name) else {
            return MetricSnapshot::empty(name);
        };

        let points = entry.timeline.tail(self.render_points);
        let tail = TailStats::from_points(&points);
        let averages = entry.averages.tail(self.render_points);
        let average_tail = TailStats::from_points(&averages);
        MetricSnapshot {
            name: name.to_string(),
            last: entry.series.last(),
            average: entry.series.average(),
            min: entry.series.min(),
            max: entry.series.max(),
            sum: entry.series.sum(),
            window: entry.series.window(),
            samples: entry.series.len(),
            last_key: entry.timeline.last_key(),
            points,
            tail,
            averages,
            average_tail,
        }
    }

    /// Snapshot of the requested metrics, sorted by name.
    ///
    /// Sequence and reason are left for the dispatcher to stamp.
    pub fn build<S: AsRef<str>>(&self, registry: &MetricRegistry, names: &[S]) -> Snapshot {
        let mut metrics: Vec<MetricSnapshot> = names
            .iter()
            .map(|name| self.build_metric(registry, name.as_ref()))
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics.dedup_by(|a, b| a.name == b.name);

        Snapshot {
            sequence: 0,
            reason: DispatchReason::Refresh,
            rollback_key: None,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_latency() -> MetricRegistry {
        let mut registry = MetricRegistry::new(100, 3).unwrap();
        for k in 1..=5 {
            registry.record("latency", k, k as f64 * 10.0);
        }
        registry
    }

    #[test]
    fn test_build_copies_statistics() {
        let registry = registry_with_latency();
        let snapshot = SnapshotBuilder::new(10).build(&registry, &["latency"]);
        let latency = snapshot.metric("latency").unwrap();

        assert_eq!(latency.last, 50.0);
        assert_eq!(latency.average, 40.0);
        assert_eq!(latency.min, 30.0);
        assert_eq!(latency.max, 50.0);
        assert_eq!(latency.sum, 120.0);
        assert_eq!(latency.window, 3);
        assert_eq!(latency.samples, 5);
        assert_eq!(latency.last_key, Some(5));
        assert_eq!(latency.points.len(), 5);
    }

    #[test]
    fn test_render_horizon_caps_points() {
        let registry = registry_with_latency();
        let snapshot = SnapshotBuilder::new(2).build(&registry, &["latency"]);
        let latency = snapshot.metric("latency").unwrap();
        assert_eq!(latency.points, vec![(4, 40.0), (5, 50.0)]);
        assert_eq!(latency.tail.min, 40.0);
    }

    #[test]
    fn test_unknown_metric_has_zero_defaults() {
        let registry = registry_with_latency();
        let snapshot = SnapshotBuilder::new(10).build(&registry, &["peers"]);
        assert_eq!(snapshot.metric("peers"), Some(&MetricSnapshot::empty("peers")));
    }

    #[test]
    fn test_snapshot_is_independent_of_registry() {
        let mut registry = registry_with_latency();
        let builder = SnapshotBuilder::new(10);
        let snapshot = builder.build(&registry, &["latency"]);
        let before = snapshot.clone();

        registry.record("latency", 6, 99.0);
        registry.rollback_all(2);
        registry.set_window_all(1).unwrap();
        registry.clear();

        assert_eq!(snapshot, before);
        assert_eq!(snapshot.metric("latency").unwrap().points.len(), 5);
    }

    #[test]
    fn test_tail_is_exact_after_rollback() {
        let mut registry = registry_with_latency();
        registry.rollback_all(2);
        let snapshot = SnapshotBuilder::new(10).build(&registry, &["latency"]);
        let latency = snapshot.metric("latency").unwrap();

        assert_eq!(latency.tail.last, 20.0);
        assert_eq!(latency.tail.max, 20.0);
        // Windowed values still remember the retracted samples
        assert_eq!(latency.last, 50.0);
    }

    #[test]
    fn test_moving_average_is_exact_after_rollback() {
        let mut registry = MetricRegistry::new(100, 3).unwrap();
        for k in 1..=10 {
            registry.record("deadline", k, k as f64);
        }
        registry.rollback_all(5);
        let snapshot = SnapshotBuilder::new(10).build(&registry, &["deadline"]);
        let deadline = snapshot.metric("deadline").unwrap();

        assert_eq!(deadline.average, 9.0);
        assert_eq!(deadline.averages.last(), Some(&(5, 4.0)));
        assert_eq!(deadline.average_tail.last, 4.0);
        assert_eq!(deadline.average_tail.min, 1.0);
        assert_eq!(deadline.average_tail.max, 4.0);
    }

    #[test]
    fn test_tail_stats_carry_nan() {
        let mut registry = MetricRegistry::new(100, 3).unwrap();
        registry.record("latency", 1, 1.0);
        registry.record("latency", 2, f64::NAN);
        registry.record("latency", 3, 3.0);
        let snapshot = SnapshotBuilder::new(10).build(&registry, &["latency"]);
        let latency = snapshot.metric("latency").unwrap();

        assert!(latency.tail.min.is_nan());
        assert!(latency.tail.max.is_nan());
        assert!(latency.min.is_nan());
        assert_eq!(latency.tail.last, 3.0);
    }

    #[test]
    fn test_build_sorts_and_dedups() {
        let mut registry = registry_with_latency();
        registry.record("deadline", 5, 1.0);
        let snapshot =
            SnapshotBuilder::new(10).build(&registry, &["latency", "deadline", "latency"]);
        let names: Vec<&str> = snapshot.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["deadline", "latency"]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = registry_with_latency();
        let snapshot = SnapshotBuilder::new(1).build(&registry, &["latency"]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"reason\":\"refresh\""));
        assert!(json.contains("\"points\":[[5,50.0]]"));
        assert!(!json.contains("rollback_key"));
    }
}
