//! ## skyla-telemetry::metrics
//! **Prometheus recorder for the inspection pipeline**
//!
//! ### Expectations:
//! - Counters for scans, hits, and reload outcomes
//! - Scan latency histogram bucketed for a microsecond-range hot path
//! - Text-encoded gather for scrape endpoints

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub scans_total: prometheus::Counter,
    pub hits_total: prometheus::Counter,
    pub reload_success_total: prometheus::Counter,
    pub reload_failure_total: prometheus::Counter,
    pub scan_latency: prometheus::Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let scans_total = Counter::new("skyla_scans_total", "Total scanned inputs").unwrap();
        let hits_total =
            Counter::new("skyla_hits_total", "Total confirmed detector hits").unwrap();
        let reload_success_total =
            Counter::new("skyla_reload_success_total", "Successful reload ticks").unwrap();
        let reload_failure_total =
            Counter::new("skyla_reload_failure_total", "Failed reload ticks").unwrap();

        let scan_latency = Histogram::with_opts(
            HistogramOpts::new("skyla_scan_latency_ns", "Detection pipeline processing time")
                .buckets(vec![1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]),
        )
        .unwrap();

        registry.register(Box::new(scans_total.clone())).unwrap();
        registry.register(Box::new(hits_total.clone())).unwrap();
        registry
            .register(Box::new(reload_success_total.clone()))
            .unwrap();
        registry
            .register(Box::new(reload_failure_total.clone()))
            .unwrap();
        registry.register(Box::new(scan_latency.clone())).unwrap();

        Self {
            registry,
            scans_total,
            hits_total,
            reload_success_total,
            reload_failure_total,
            scan_latency,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap())
    }

    pub fn observe_scan(&self, latency_ns: f64, hits: usize) {
        self.scans_total.inc();
        self.hits_total.inc_by(hits as f64);
        self.scan_latency.observe(latency_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_every_metric_family() {
        let metrics = MetricsRecorder::new();
        metrics.observe_scan(1_500.0, 3);
        metrics.reload_success_total.inc();
        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("skyla_scans_total 1"));
        assert!(text.contains("skyla_hits_total 3"));
        assert!(text.contains("skyla_reload_success_total 1"));
        assert!(text.contains("skyla_scan_latency_ns"));
    }
}
