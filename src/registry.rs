//! Named collection of metric timelines and windowed series
//!
//! The registry is the single write path for metric state. It is owned by
//! the pipeline worker; nothing else mutates it.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{check_window, ConfigError};
use crate::series::WindowedSeries;
use crate::timeline::KeyedTimeline;

/// Storage for one logical metric
#[derive(Debug, Clone)]
pub struct MetricEntry {
    /// Exact keyed history, truncated on rollback
    pub timeline: KeyedTimeline,
    /// Rolling statistics, only aged out by new samples
    pub series: WindowedSeries,
    /// Moving average as it stood at each key, truncated on rollback
    pub averages: KeyedTimeline,
}

/// All metrics of one dashboard session
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    capacity: usize,
    /// Empty series cloned for every new metric
    template: WindowedSeries,
    metrics: HashMap<String, MetricEntry>,
    /// Highest key recorded since the last rollback below it
    high_key: Option<i64>,
}

impl MetricRegistry {
    /// Create an empty registry whose series hold `capacity` samples.
    pub fn new(capacity: usize, window: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            capacity,
            template: WindowedSeries::new(capacity, window)?,
            metrics: HashMap::new(),
            high_key: None,
        })
    }

    /// Record one sample, creating the metric on first use.
    ///
    /// When `key` raises the high-water mark, every timeline drops entries
    /// that fell out of the `capacity`-wide key horizon.
    pub fn record(&mut self, name: &str, key: i64, value: f64) {
        if !self.metrics.contains_key(name) {
            debug!("Registering metric '{}'", name);
            self.metrics.insert(
                name.to_string(),
                MetricEntry {
                    timeline: KeyedTimeline::new(),
                    series: self.template.clone(),
                    averages: KeyedTimeline::new(),
                },
            );
        }
        if let Some(entry) = self.metrics.get_mut(name) {
            entry.timeline.upsert(key, value);
            entry.series.add(value);
            entry.averages.upsert(key, entry.series.average());
        }

        if self.high_key.is_none_or(|high| key > high) {
            self.high_key = Some(key);
            self.evict_below_all(key.saturating_sub(self.capacity as i64));
        }
    }

    /// Truncate every timeline, and its moving-average history, to entries
    /// with key `<= key`.
    ///
    /// Windowed series are left alone; their statistics may still include
    /// retracted samples until newer ones push them out. The averages
    /// timeline gives the exact moving average at the rollback point.
    pub fn rollback_all(&mut self, key: i64) -> usize {
        let removed: usize = self
            .metrics
            .values_mut()
            .map(|entry| {
                entry.averages.truncate_above(key);
                entry.timeline.truncate_above(key)
            })
            .sum();
        if self.high_key.is_some_and(|high| high > key) {
            self.high_key = Some(key);
        }
        info!("Rolled back to key {} ({} points removed)", key, removed);
        removed
    }

    /// Drop entries with key `<= key` from every timeline.
    pub fn evict_below_all(&mut self, key: i64) -> usize {
        self.metrics
            .values_mut()
            .map(|entry| {
                entry.averages.evict_below(key);
                entry.timeline.evict_below(key)
            })
            .sum()
    }

    /// Resize the statistics window of every metric, present and future.
    pub fn set_window_all(&mut self, window: usize) -> Result<(), ConfigError> {
        self.template.set_window(window)?;
        for entry in self.metrics.values_mut() {
            entry.series.set_window(window)?;
        }
        Ok(())
    }

    /// Resize the statistics window of one metric.
    ///
    /// Returns `Ok(false)` when no metric with that name exists yet.
    pub fn set_window(&mut self, name: &str, window: usize) -> Result<bool, ConfigError> {
        check_window(window, self.capacity)?;
        match self.metrics.get_mut(name) {
            Some(entry) => {
                entry.series.set_window(window)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricEntry> {
        self.metrics.get(name)
    }

    /// Names of all registered metrics, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_window(&self) -> usize {
        self.template.window()
    }

    pub fn high_key(&self) -> Option<i64> {
        self.high_key
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Forget every metric
    pub fn clear(&mut self) {
        self.metrics.clear();
        self.high_key = None;
    }
}
