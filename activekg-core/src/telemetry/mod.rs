//! # System Telemetry
//!
//! In-process metrics registry for the engine: counters, gauges, and
//! histograms, with optional labels, a JSON snapshot for `/metrics`, and
//! Prometheus text exposition for `/prometheus`.
//!
//! ## Example
//!
//! ```
//! use activekg_core::telemetry::Telemetry;
//! use std::time::Duration;
//!
//! let telemetry = Telemetry::new();
//! telemetry.counter("webhook_replay_total").increment();
//! telemetry
//!     .counter_with("triggers_fired_total", &[("pattern", "urgent"), ("mode", "targeted")])
//!     .increment();
//! telemetry
//!     .histogram("refresh_node_seconds")
//!     .observe(Duration::from_millis(12));
//! let snapshot = telemetry.snapshot();
//! assert_eq!(snapshot.counters["webhook_replay_total"], 1);
//! ```

pub mod counter;
pub mod gauge;
pub mod histogram;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::{Histogram, HistogramStats};

/// Render a metric key with labels in exposition order.
///
/// `render_key("x_total", &[("result", "ok")])` → `x_total{result="ok"}`.
#[must_use]
pub fn render_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut key = String::with_capacity(name.len() + 16 * labels.len());
    key.push_str(name);
    key.push('{');
    for (i, (k, v)) in labels.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        let _ = write!(key, "{k}=\"{v}\"");
    }
    key.push('}');
    key
}

/// Point-in-time snapshot of every registered metric.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySummary {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, i64>,
    pub histograms: HashMap<String, HistogramStats>,
}

/// Thread-safe metrics registry.
///
/// Cloning is cheap; all clones share the same metric families.
#[derive(Clone, Default, Debug)]
pub struct Telemetry {
    counters: Arc<RwLock<HashMap<String, Arc<Counter>>>>,
    gauges: Arc<RwLock<HashMap<String, Arc<Gauge>>>>,
    histograms: Arc<RwLock<HashMap<String, Arc<Histogram>>>>,
}

impl Telemetry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create an unlabeled counter.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counter_with(name, &[])
    }

    /// Get or create a labeled counter.
    pub fn counter_with(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Counter> {
        let key = render_key(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            return Arc::clone(c);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Counter::new())),
        )
    }

    /// Get or create an unlabeled gauge.
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        self.gauge_with(name, &[])
    }

    /// Get or create a labeled gauge.
    pub fn gauge_with(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Gauge> {
        let key = render_key(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            return Arc::clone(g);
        }
        Arc::clone(
            self.gauges
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Gauge::new())),
        )
    }

    /// Get or create an unlabeled histogram.
    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        self.histogram_with(name, &[])
    }

    /// Get or create a labeled histogram.
    pub fn histogram_with(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Histogram> {
        let key = render_key(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            return Arc::clone(h);
        }
        Arc::clone(
            self.histograms
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Histogram::new())),
        )
    }

    /// Snapshot every metric for the JSON `/metrics` endpoint.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySummary {
        let counters = self
            .counters
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), c.get()))
            .collect();
        let gauges = self
            .gauges
            .read()
            .iter()
            .map(|(k, g)| (k.clone(), g.get()))
            .collect();
        let histograms = self
            .histograms
            .read()
            .iter()
            .map(|(k, h)| (k.clone(), h.stats()))
            .collect();
        TelemetrySummary {
            counters,
            gauges,
            histograms,
        }
    }

    /// Render Prometheus text exposition. Histograms render as summaries
    /// with quantile labels.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let mut counters: Vec<_> = snapshot.counters.into_iter().collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in counters {
            let _ = writeln!(out, "{key} {value}");
        }

        let mut gauges: Vec<_> = snapshot.gauges.into_iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in gauges {
            let _ = writeln!(out, "{key} {value}");
        }

        let mut histograms: Vec<_> = snapshot.histograms.into_iter().collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, stats) in histograms {
            let (name, labels) = split_key(&key);
            let _ = writeln!(out, "{}_sum{} {}", name, label_set(labels, None), stats.sum);
            let _ = writeln!(
                out,
                "{}_count{} {}",
                name,
                label_set(labels, None),
                stats.count
            );
            for (q, v) in [(0.5, stats.p50), (0.95, stats.p95), (0.99, stats.p99)] {
                let _ = writeln!(out, "{}{} {}", name, label_set(labels, Some(q)), v);
            }
        }

        out
    }
}

fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.find('{') {
        Some(idx) => (&key[..idx], Some(&key[idx + 1..key.len() - 1])),
        None => (key, None),
    }
}

fn label_set(labels: Option<&str>, quantile: Option<f64>) -> String {
    match (labels, quantile) {
        (None, None) => String::new(),
        (Some(l), None) => format!("{{{l}}}"),
        (None, Some(q)) => format!("{{quantile=\"{q}\"}}"),
        (Some(l), Some(q)) => format!("{{{l},quantile=\"{q}\"}}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn labeled_counters_are_distinct_series() {
        let t = Telemetry::new();
        t.counter_with("x_total", &[("result", "ok")]).increment();
        t.counter_with("x_total", &[("result", "error")]).add(2);
        let snap = t.snapshot();
        assert_eq!(snap.counters["x_total{result=\"ok\"}"], 1);
        assert_eq!(snap.counters["x_total{result=\"error\"}"], 2);
    }

    #[test]
    fn gauge_set_and_add() {
        let t = Telemetry::new();
        t.gauge("dlq_depth").set(5);
        t.gauge("dlq_depth").add(-2);
        assert_eq!(t.snapshot().gauges["dlq_depth"], 3);
    }

    #[test]
    fn histogram_stats_track_observations() {
        let t = Telemetry::new();
        let h = t.histogram_with("latency_seconds", &[("score_type", "rrf_fused")]);
        h.observe(Duration::from_millis(10));
        h.observe(Duration::from_millis(30));
        let stats = &t.snapshot().histograms["latency_seconds{score_type=\"rrf_fused\"}"];
        assert_eq!(stats.count, 2);
        assert!(stats.max >= stats.min);
    }

    #[test]
    fn prometheus_rendering_includes_all_families() {
        let t = Telemetry::new();
        t.counter_with("hits_total", &[("endpoint", "search")])
            .increment();
        t.gauge("depth").set(1);
        t.histogram("lat").observe_value(2.0);
        let text = t.render_prometheus();
        assert!(text.contains("hits_total{endpoint=\"search\"} 1"));
        assert!(text.contains("depth 1"));
        assert!(text.contains("lat_count 1"));
        assert!(text.contains("lat{quantile=\"0.5\"}"));
    }

    #[test]
    fn render_key_formats_labels() {
        assert_eq!(render_key("a", &[]), "a");
        assert_eq!(
            render_key("a", &[("x", "1"), ("y", "2")]),
            "a{x=\"1\",y=\"2\"}"
        );
    }
}
