use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Upper bounds (seconds) shared by every histogram. Covers both HTTP
/// latencies and command runtimes up to the default execution timeout.
const DURATION_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Histogram {
    /// Non-cumulative count per bucket in `DURATION_BUCKETS`.
    counts: [AtomicU64; DURATION_BUCKETS.len()],
    /// f64 bit pattern.
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        if let Some(i) = DURATION_BUCKETS.iter().position(|le| value <= *le) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// `(upper bound, cumulative count)` pairs.
    fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut running = 0;
        DURATION_BUCKETS
            .iter()
            .zip(self.counts.iter())
            .map(|(le, c)| {
                running += c.load(Ordering::Relaxed);
                (*le, running)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Sorted `key="value"` pairs; part of a counter's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Labels(Vec<(String, String)>);

impl Labels {
    fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort();
        Self(v)
    }

    fn render(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// In-process metrics registry.
///
/// Metric families are created on first use; values are atomics so the hot
/// path only takes a read lock.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<(String, Labels), AtomicU64>>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = (name.to_string(), Labels::new(labels));
        if let Some(c) = read(&self.counters).get(&key) {
            c.fetch_add(1, Ordering::Relaxed);
            return;
        }
        write(&self.counters)
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Add `delta` (possibly negative) to a gauge.
    pub fn add_gauge(&self, name: &str, delta: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        write(&self.gauges).insert(name.to_string(), AtomicI64::new(value));
    }

    pub fn get_gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        if let Some(h) = read(&self.histograms).get(name) {
            h.observe(value);
            return;
        }
        write(&self.histograms)
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .observe(value);
    }

    pub fn histogram_count(&self, name: &str) -> u64 {
        read(&self.histograms).get(name).map(Histogram::count).unwrap_or(0)
    }

    /// Prometheus text exposition format, families sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = read(&self.counters);
        let mut keys: Vec<&(String, Labels)> = counters.keys().collect();
        keys.sort();
        let mut last_family: Option<&str> = None;
        for key in keys {
            let (name, labels) = key;
            if last_family != Some(name.as_str()) {
                out.push_str(&format!("# TYPE {name} counter\n"));
                last_family = Some(name.as_str());
            }
            let value = counters[key].load(Ordering::Relaxed);
            out.push_str(&format!("{name}{} {value}\n", labels.render()));
        }
        drop(counters);

        let gauges = read(&self.gauges);
        let mut names: Vec<&String> = gauges.keys().collect();
        names.sort();
        for name in names {
            out.push_str(&format!("# TYPE {name} gauge\n"));
            out.push_str(&format!("{name} {}\n", gauges[name].load(Ordering::Relaxed)));
        }
        drop(gauges);

        let histograms = read(&self.histograms);
        let mut names: Vec<&String> = histograms.keys().collect();
        names.sort();
        for name in names {
            let h = &histograms[name];
            out.push_str(&format!("# TYPE {name} histogram\n"));
            for (le, count) in h.cumulative() {
                out.push_str(&format!("{name}_bucket{{le=\"{le}\"}} {count}\n"));
            }
            out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", h.count()));
            out.push_str(&format!("{name}_sum {}\n", h.sum()));
            out.push_str(&format!("{name}_count {}\n", h.count()));
        }

        out
    }

    /// The same data as a JSON object with `counters`, `gauges`, `histograms`.
    pub fn export_json(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = read(&self.counters)
            .iter()
            .map(|((name, labels), v)| {
                (format!("{name}{}", labels.render()), v.load(Ordering::Relaxed).into())
            })
            .collect();

        let gauges: serde_json::Map<String, serde_json::Value> = read(&self.gauges)
            .iter()
            .map(|(name, v)| (name.clone(), v.load(Ordering::Relaxed).into()))
            .collect();

        let histograms: serde_json::Map<String, serde_json::Value> = read(&self.histograms)
            .iter()
            .map(|(name, h)| {
                let buckets: Vec<serde_json::Value> = h
                    .cumulative()
                    .into_iter()
                    .map(|(le, count)| serde_json::json!({ "le": le, "count": count }))
                    .collect();
                (
                    name.clone(),
                    serde_json::json!({ "buckets": buckets, "sum": h.sum(), "count": h.count() }),
                )
            })
            .collect();

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }
}

/// The process-wide collector.
pub fn global_metrics() -> &'static MetricsCollector {
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::new)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_labels() {
        let m = MetricsCollector::new();
        m.increment_counter("executions_finished_total", &[("status", "completed")]);
        m.increment_counter("executions_finished_total", &[("status", "completed")]);
        m.increment_counter("executions_finished_total", &[("status", "failed")]);

        assert_eq!(m.get_counter("executions_finished_total", &[("status", "completed")]), 2);
        assert_eq!(m.get_counter("executions_finished_total", &[("status", "failed")]), 1);
        assert_eq!(m.get_counter("executions_finished_total", &[("status", "stopped")]), 0);
    }

    #[test]
    fn gauge_add_and_set() {
        let m = MetricsCollector::new();
        m.add_gauge("executions_running", 2);
        m.add_gauge("executions_running", -1);
        assert_eq!(m.get_gauge("executions_running"), 1);
        m.set_gauge("executions_running", 7);
        assert_eq!(m.get_gauge("executions_running"), 7);
    }

    #[test]
    fn histogram_sum_and_buckets() {
        let m = MetricsCollector::new();
        m.record_histogram("execution_duration_seconds", 0.05);
        m.record_histogram("execution_duration_seconds", 0.5);
        m.record_histogram("execution_duration_seconds", 1000.0);
        assert_eq!(m.histogram_count("execution_duration_seconds"), 3);

        let json = m.export_json();
        let h = &json["histograms"]["execution_duration_seconds"];
        assert_eq!(h["count"], 3);
        assert!((h["sum"].as_f64().unwrap() - 1000.55).abs() < 1e-6);
        // 1000s lands only in +Inf
        let last = h["buckets"].as_array().unwrap().last().unwrap();
        assert_eq!(last["count"], 2);
    }

    #[test]
    fn prometheus_export() {
        let m = MetricsCollector::new();
        m.increment_counter("api_requests_total", &[("status", "200"), ("method", "GET")]);
        m.set_gauge("executions_running", 2);
        m.record_histogram("api_request_duration_seconds", 0.1);

        let out = m.export_prometheus();
        assert!(out.contains("# TYPE api_requests_total counter"));
        assert!(out.contains("api_requests_total{method=\"GET\",status=\"200\"} 1"));
        assert!(out.contains("executions_running 2"));
        assert!(out.contains("api_request_duration_seconds_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("api_request_duration_seconds_count 1"));
    }

    #[test]
    fn global_is_a_singleton() {
        assert!(std::ptr::eq(global_metrics(), global_metrics()));
    }
}
