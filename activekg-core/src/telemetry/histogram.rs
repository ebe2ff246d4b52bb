//! Histogram metric with percentile statistics.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Statistics computed from a histogram's samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Histogram metric tracking a distribution of values (seconds by
/// convention for latency metrics).
#[derive(Debug, Default)]
pub struct Histogram {
    samples: Mutex<Vec<f64>>,
}

impl Histogram {
    /// Create an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a duration observation in seconds.
    pub fn observe(&self, duration: Duration) {
        self.observe_value(duration.as_secs_f64());
    }

    /// Record a raw value.
    pub fn observe_value(&self, value: f64) {
        self.samples.lock().push(value);
    }

    /// Compute statistics over the recorded samples.
    #[must_use]
    pub fn stats(&self) -> HistogramStats {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return HistogramStats::default();
        }

        let count = samples.len() as u64;
        let sum: f64 = samples.iter().sum();
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        HistogramStats {
            count,
            sum,
            min,
            max,
            avg: sum / count as f64,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_reports_zeroes() {
        let h = Histogram::new();
        let stats = h.stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.p99, 0.0);
    }

    #[test]
    fn percentiles_are_ordered() {
        let h = Histogram::new();
        for i in 1..=100 {
            h.observe_value(f64::from(i));
        }
        let stats = h.stats();
        assert_eq!(stats.count, 100);
        assert!(stats.p50 <= stats.p95);
        assert!(stats.p95 <= stats.p99);
        assert!(stats.p99 <= stats.max);
        assert!((stats.avg - 50.5).abs() < 1e-9);
    }
}
