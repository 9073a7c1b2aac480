//! Bounded sample history with moving-window statistics
//!
//! A [`WindowedSeries`] keeps the most recent `capacity` samples of one
//! metric and derives average/min/max/sum over the most recent `window` of
//! them. The window can be resized at any time; statistics are derived on
//! read, so a resize takes effect without new samples.

use std::collections::VecDeque;

use crate::error::{check_window, ConfigError};

/// A ring buffer of metric values with a reconfigurable statistics window
#[derive(Debug, Clone)]
pub struct WindowedSeries {
    /// Maximum number of samples to keep
    capacity: usize,
    /// Number of most recent samples used for statistics
    window: usize,
    /// Stored values, oldest first
    values: VecDeque<f64>,
}

impl WindowedSeries {
    /// Create an empty series.
    ///
    /// Fails when `capacity` is zero or `window` is not in `1..=capacity`.
    pub fn new(capacity: usize, window: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        check_window(window, capacity)?;

        Ok(Self {
            capacity,
            window,
            values: VecDeque::with_capacity(capacity),
        })
    }

    /// Append a value, evicting the oldest one when the series is full.
    ///
    /// Non-finite values are stored as-is and flow into the statistics.
    pub fn add(&mut self, value: f64) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Change the statistics window.
    ///
    /// On error the current window is kept.
    pub fn set_window(&mut self, window: usize) -> Result<(), ConfigError> {
        check_window(window, self.capacity)?;
        self.window = window;
        Ok(())
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The values currently inside the statistics window, oldest first
    fn windowed(&self) -> impl Iterator<Item = &f64> + '_ {
        let skip = self.values.len().saturating_sub(self.window);
        self.values.iter().skip(skip)
    }

    /// Number of samples the statistics are computed over
    fn windowed_len(&self) -> usize {
        self.values.len().min(self.window)
    }

    /// Sum over the window, or `0.0` when empty
    pub fn sum(&self) -> f64 {
        compensated_sum(self.windowed())
    }

    /// Mean over the window, or `0.0` when empty
    pub fn average(&self) -> f64 {
        let n = self.windowed_len();
        if n == 0 {
            return 0.0;
        }
        self.sum() / n as f64
    }

    /// Smallest value in the window, or `0.0` when empty
    pub fn min(&self) -> f64 {
        self.windowed()
            .copied()
            .reduce(|a, b| nan_aware(a, b, f64::min))
            .unwrap_or(0.0)
    }

    /// Largest value in the window, or `0.0` when empty
    pub fn max(&self) -> f64 {
        self.windowed()
            .copied()
            .reduce(|a, b| nan_aware(a, b, f64::max))
            .unwrap_or(0.0)
    }

    /// Most recent value, or `0.0` when empty
    pub fn last(&self) -> f64 {
        self.values.back().copied().unwrap_or(0.0)
    }

    /// Value at logical `index` (0 is the oldest retained), or `0.0` when out of range
    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    /// Get the number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all retained values, oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Drop all stored values, keeping capacity and window
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// `f64::min`/`f64::max` ignore NaN operands; statistics must carry them.
pub(crate) fn nan_aware(a: f64, b: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        pick(a, b)
    }
}

/// Kahan summation; falls back to plain addition once a non-finite term shows up.
fn compensated_sum<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut compensation = 0.0_f64;
    for &value in values {
        if !value.is_finite() || !sum.is_finite() {
            sum += value;
            continue;
        }
        let y = value - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, window: usize, values: &[f64]) -> WindowedSeries {
        let mut series = WindowedSeries::new(capacity, window).unwrap();
        for v in values {
            series.add(*v);
        }
        series
    }

    #[test]
    fn test_new_rejects_bad_window() {
        assert_eq!(
            WindowedSeries::new(5, 0).unwrap_err(),
            ConfigError::InvalidWindow {
                window: 0,
                capacity: 5
            }
        );
        assert!(WindowedSeries::new(5, 6).is_err());
        assert_eq!(
            WindowedSeries::new(0, 0).unwrap_err(),
            ConfigError::ZeroCapacity
        );
        assert!(WindowedSeries::new(5, 5).is_ok());
    }

    #[test]
    fn test_window_statistics() {
        let series = filled(5, 3, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(series.average(), 4.0);
        assert_eq!(series.max(), 5.0);
        assert_eq!(series.min(), 3.0);
        assert_eq!(series.sum(), 12.0);
        assert_eq!(series.last(), 5.0);
    }

    #[test]
    fn test_eviction_moves_window() {
        let mut series = filled(5, 3, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        series.add(6.0);
        assert_eq!(series.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(series.average(), 5.0);
    }

    #[test]
    fn test_bounded_retention() {
        let mut series = WindowedSeries::new(4, 2).unwrap();
        for i in 1..=10 {
            series.add(i as f64);
        }
        assert_eq!(series.len(), 4);
        assert_eq!(series.iter().collect::<Vec<_>>(), vec![7.0, 8.0, 9.0, 10.0]);
        assert_eq!(series.get(0), 7.0);
        assert_eq!(series.get(4), 0.0);
    }

    #[test]
    fn test_partial_window() {
        let series = filled(10, 5, &[2.0, 4.0]);
        assert_eq!(series.average(), 3.0);
        assert_eq!(series.min(), 2.0);
        assert_eq!(series.max(), 4.0);
    }

    #[test]
    fn test_empty_defaults() {
        let series = WindowedSeries::new(3, 2).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.average(), 0.0);
        assert_eq!(series.min(), 0.0);
        assert_eq!(series.max(), 0.0);
        assert_eq!(series.last(), 0.0);
        assert_eq!(series.sum(), 0.0);
    }

    #[test]
    fn test_set_window_applies_immediately() {
        let mut series = filled(5, 2, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(series.average(), 4.5);
        series.set_window(5).unwrap();
        assert_eq!(series.average(), 3.0);
        assert_eq!(series.min(), 1.0);
    }

    #[test]
    fn test_set_window_rejects_and_keeps_state() {
        let mut series = filled(5, 2, &[1.0, 2.0, 3.0]);
        assert!(series.set_window(0).is_err());
        assert!(series.set_window(6).is_err());
        assert_eq!(series.window(), 2);
        assert_eq!(series.average(), 2.5);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_non_finite_values_propagate() {
        let series = filled(4, 4, &[1.0, f64::NAN, 3.0]);
        assert!(series.average().is_nan());
        assert!(series.min().is_nan());
        assert!(series.max().is_nan());

        let series = filled(4, 4, &[1.0, f64::INFINITY]);
        assert_eq!(series.average(), f64::INFINITY);
        assert_eq!(series.max(), f64::INFINITY);
        assert_eq!(series.min(), 1.0);
    }

    #[test]
    fn test_compensated_sum_precision() {
        let mut series = WindowedSeries::new(1000, 1000).unwrap();
        for _ in 0..1000 {
            series.add(0.1);
        }
        assert!((series.sum() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let mut series = filled(3, 2, &[1.0, 2.0]);
        series.clear();
        assert!(series.is_empty());
        assert_eq!(series.window(), 2);
        assert_eq!(series.capacity(), 3);
    }
}
