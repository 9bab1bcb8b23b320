use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

pub const MESSAGES_APPLIED: &str = "messages.applied";
pub const MESSAGES_DROPPED: &str = "messages.dropped";
pub const MESSAGES_STALE: &str = "messages.stale";
pub const FEATURES_SKIPPED: &str = "features.skipped";
pub const RECONNECTS_SCHEDULED: &str = "reconnects.scheduled";
pub const CONNECTIONS_OPENED: &str = "connections.opened";
pub const VIEWPORTS_REJECTED: &str = "viewports.rejected";
pub const TARGETS: &str = "targets";
pub const SNAPSHOT_SIZE: &str = "snapshot.size";

/// Client metrics with stable ordering.
///
/// Sorted maps keep snapshots deterministic so they can be logged and compared.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, i64>,
    histograms: BTreeMap<String, Histogram>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Histogram {
    pub count: u64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

impl Histogram {
    pub fn record(&mut self, value: i64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: Vec<(String, u64)>,
    pub gauges: Vec<(String, i64)>,
    pub histograms: Vec<(String, Histogram)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, by: u64) {
        *self.counters.entry(name.into()).or_insert(0) += by;
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: i64) {
        self.gauges.insert(name.into(), value);
    }

    pub fn record_histogram(&mut self, name: impl Into<String>, value: i64) {
        self.histograms
            .entry(name.into())
            .or_default()
            .record(value);
    }

    /// Returns a stable, sorted snapshot suitable for logs.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            gauges: self.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            histograms: self
                .histograms
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

/// Metrics handle shared between the client task and whoever reports them.
#[derive(Debug, Default, Clone)]
pub struct SharedMetrics(Arc<Mutex<Metrics>>);

impl SharedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, by: u64) {
        self.0.lock().inc_counter(name, by);
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        self.0.lock().set_gauge(name, value);
    }

    pub fn record(&self, name: &str, value: i64) {
        self.0.lock().record_histogram(name, value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.0.lock().counter(name)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.0.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut m = Metrics::new();
        m.inc_counter(MESSAGES_DROPPED, 1);
        m.inc_counter(MESSAGES_DROPPED, 2);
        assert_eq!(m.counter(MESSAGES_DROPPED), 3);
        assert_eq!(m.counter("missing"), 0);
    }

    #[test]
    fn target_gauge_overwrites() {
        let mut m = Metrics::new();
        assert!(m.snapshot().gauges.is_empty());
        m.set_gauge(TARGETS, 10);
        m.set_gauge(TARGETS, 1);
        assert_eq!(m.snapshot().gauges, vec![(TARGETS.to_string(), 1)]);
    }

    #[test]
    fn snapshot_size_histogram() {
        let mut h = Histogram::default();
        assert_eq!(h.mean(), None);
        h.record(2);
        h.record(0);
        h.record(7);
        assert_eq!((h.count, h.sum, h.min, h.max), (3, 9, 0, 7));
        assert_eq!(h.mean(), Some(3.0));
    }

    #[test]
    fn shared_handle_sees_updates_and_sorts() {
        let shared = SharedMetrics::new();
        let other = shared.clone();
        other.inc(MESSAGES_STALE);
        other.inc(MESSAGES_APPLIED);
        shared.set_gauge(TARGETS, 4);
        assert_eq!(shared.counter(MESSAGES_STALE), 1);

        let snap = shared.snapshot();
        assert_eq!(
            snap.counters,
            vec![
                (MESSAGES_APPLIED.to_string(), 1),
                (MESSAGES_STALE.to_string(), 1)
            ]
        );
        assert_eq!(snap.gauges, vec![(TARGETS.to_string(), 4)]);
    }
}
