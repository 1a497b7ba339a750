//! Metrics Recorder Trait
//!
//! Defines the sink the stats collector forwards polled counters to:
//! - Production: DogStatsD client (`datadog` feature)
//! - Tests: in-memory recording
//!
//! All metric I/O goes through this trait so the collector never touches a
//! process-wide client.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for recording metrics
pub trait MetricsRecorder: Send + Sync + 'static {
    /// Add `value` to a counter
    fn count(&self, name: &str, value: u64, tags: &[&str]);

    /// Set a gauge value
    fn gauge(&self, name: &str, value: f64, tags: &[&str]);
}

/// No-op metrics recorder - zero overhead when metrics are disabled
#[derive(Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    #[inline]
    fn count(&self, _name: &str, _value: u64, _tags: &[&str]) {}
    #[inline]
    fn gauge(&self, _name: &str, _value: f64, _tags: &[&str]) {}
}

/// Recorded metric for testing/simulation
#[derive(Debug, Clone)]
pub struct RecordedMetric {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
    pub metric_type: MetricType,
}

impl RecordedMetric {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

/// Simulated metrics recorder - records all metrics for verification
#[derive(Default)]
pub struct SimulatedMetrics {
    recorded: Mutex<Vec<RecordedMetric>>,
    counter_total: AtomicU64,
}

impl SimulatedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded metrics
    pub fn get_recorded(&self) -> Vec<RecordedMetric> {
        self.recorded.lock().clone()
    }

    /// Get metrics by name
    pub fn get_by_name(&self, name: &str) -> Vec<RecordedMetric> {
        self.recorded
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Sum of every value recorded under `name`
    pub fn sum_by_name(&self, name: &str) -> f64 {
        self.recorded
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.value)
            .sum()
    }

    /// Sum of all counter increments, across names
    pub fn counter_total(&self) -> u64 {
        self.counter_total.load(Ordering::SeqCst)
    }

    /// Clear all recorded metrics
    pub fn clear(&self) {
        self.recorded.lock().clear();
        self.counter_total.store(0, Ordering::SeqCst);
    }

    /// Check a metric was recorded with a specific type
    pub fn assert_metric(&self, name: &str, metric_type: MetricType) -> bool {
        self.recorded
            .lock()
            .iter()
            .any(|m| m.name == name && m.metric_type == metric_type)
    }

    fn push(&self, name: &str, value: f64, tags: &[&str], metric_type: MetricType) {
        self.recorded.lock().push(RecordedMetric {
            name: name.to_string(),
            value,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            metric_type,
        });
    }
}

impl MetricsRecorder for SimulatedMetrics {
    fn count(&self, name: &str, value: u64, tags: &[&str]) {
        self.counter_total.fetch_add(value, Ordering::SeqCst);
        self.push(name, value as f64, tags, MetricType::Counter);
    }

    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        self.push(name, value, tags, MetricType::Gauge);
    }
}

/// Arc wrapper for trait object usage
pub type SharedMetrics = Arc<dyn MetricsRecorder>;

/// Create a no-op metrics recorder
pub fn noop_metrics() -> SharedMetrics {
    Arc::new(NoopMetrics)
}

/// Create a simulated metrics recorder for testing
pub fn simulated_metrics() -> Arc<SimulatedMetrics> {
    Arc::new(SimulatedMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_metrics_records() {
        let metrics = SimulatedMetrics::new();

        metrics.count("test.counter", 3, &["tag:value"]);
        metrics.count("test.counter", 1, &[]);
        metrics.gauge("test.gauge", 100.0, &[]);

        let recorded = metrics.get_recorded();
        assert_eq!(recorded.len(), 3);
        assert!(recorded[0].has_tag("tag:value"));
        assert!(metrics.assert_metric("test.counter", MetricType::Counter));
        assert!(metrics.assert_metric("test.gauge", MetricType::Gauge));
        assert_eq!(metrics.sum_by_name("test.counter"), 4.0);
        assert_eq!(metrics.counter_total(), 4);
    }

    #[test]
    fn test_noop_metrics_no_panic() {
        let metrics = NoopMetrics;

        // All operations should be no-ops without panicking
        metrics.count("test", 5, &[]);
        metrics.gauge("test", 1.0, &[]);
    }

    #[test]
    fn test_clear_metrics() {
        let metrics = SimulatedMetrics::new();

        metrics.count("flow", 10, &[]);
        assert_eq!(metrics.counter_total(), 10);

        metrics.clear();
        assert_eq!(metrics.counter_total(), 0);
        assert!(metrics.get_recorded().is_empty());
    }
}
