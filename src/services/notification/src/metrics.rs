//! Metrics collection module for the notifier
//!
//! Prometheus counters for sweeps, decisions, deliveries and record
//! conflicts, plus a sweep duration histogram. Rendered in the text
//! exposition format at `GET /metrics`.

use crate::config::MetricsConfig;
use crate::error::{NotifierError, Result};

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// Metrics collector for the notifier
#[derive(Clone)]
pub struct NotifierMetrics {
    registry: Arc<Registry>,

    sweeps_total: IntCounterVec,
    deadlines_evaluated: IntCounter,
    decisions_total: IntCounterVec,
    deliveries_total: IntCounterVec,
    delivery_failures_total: IntCounterVec,
    record_conflicts_total: IntCounter,

    sweep_duration: Histogram,
}

fn counter_vec(namespace: &str, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help).namespace(namespace), labels)
        .map_err(|e| NotifierError::internal(format!("Failed to create {} counter: {}", name, e)))
}

fn counter(namespace: &str, name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help).namespace(namespace))
        .map_err(|e| NotifierError::internal(format!("Failed to create {} counter: {}", name, e)))
}

impl NotifierMetrics {
    /// Create a new metrics collector
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        info!("Initializing notifier metrics");

        let ns = config.namespace.as_str();
        let registry = Registry::new();

        let sweeps_total = counter_vec(ns, "sweeps_total", "Sweeps run, by result", &["result"])?;
        let deadlines_evaluated = counter(
            ns,
            "deadlines_evaluated_total",
            "Deadline documents evaluated",
        )?;
        let decisions_total = counter_vec(
            ns,
            "decisions_total",
            "Evaluation decisions, by outcome",
            &["outcome"],
        )?;
        let deliveries_total = counter_vec(
            ns,
            "deliveries_total",
            "Successful deliveries, by channel",
            &["channel"],
        )?;
        let delivery_failures_total = counter_vec(
            ns,
            "delivery_failures_total",
            "Failed delivery attempts, by channel",
            &["channel"],
        )?;
        let record_conflicts_total = counter(
            ns,
            "record_conflicts_total",
            "Bookkeeping writes rejected because another run already recorded",
        )?;
        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new("sweep_duration_seconds", "Duration of a full sweep")
                .namespace(ns)
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        )
        .map_err(|e| NotifierError::internal(format!("Failed to create sweep histogram: {}", e)))?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(sweeps_total.clone()),
            Box::new(deadlines_evaluated.clone()),
            Box::new(decisions_total.clone()),
            Box::new(deliveries_total.clone()),
            Box::new(delivery_failures_total.clone()),
            Box::new(record_conflicts_total.clone()),
            Box::new(sweep_duration.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| NotifierError::internal(format!("Failed to register metric: {}", e)))?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            sweeps_total,
            deadlines_evaluated,
            decisions_total,
            deliveries_total,
            delivery_failures_total,
            record_conflicts_total,
            sweep_duration,
        })
    }

    pub fn record_sweep(&self, result: &str, seconds: f64) {
        self.sweeps_total.with_label_values(&[result]).inc();
        self.sweep_duration.observe(seconds);
    }

    pub fn record_decision(&self, outcome: &str) {
        self.deadlines_evaluated.inc();
        self.decisions_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_delivery(&self, channel: &str) {
        self.deliveries_total.with_label_values(&[channel]).inc();
    }

    pub fn record_delivery_failure(&self, channel: &str) {
        self.delivery_failures_total.with_label_values(&[channel]).inc();
    }

    pub fn record_conflict(&self) {
        self.record_conflicts_total.inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| NotifierError::internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| NotifierError::internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = NotifierMetrics::new(&MetricsConfig::default()).unwrap();
        metrics.record_decision("notify");
        metrics.record_decision("wait");
        metrics.record_delivery("push");
        metrics.record_delivery_failure("email");
        metrics.record_conflict();
        metrics.record_sweep("completed", 1.5);

        let text = metrics.render().unwrap();
        assert!(text.contains("scadenze_deadlines_evaluated_total 2"));
        assert!(text.contains("scadenze_decisions_total{outcome=\"notify\"} 1"));
        assert!(text.contains("scadenze_deliveries_total{channel=\"push\"} 1"));
        assert!(text.contains("scadenze_delivery_failures_total{channel=\"email\"} 1"));
        assert!(text.contains("scadenze_record_conflicts_total 1"));
        assert!(text.contains("scadenze_sweep_duration_seconds_count 1"));
    }

    #[test]
    fn test_independent_registries() {
        let a = NotifierMetrics::new(&MetricsConfig::default()).unwrap();
        let b = NotifierMetrics::new(&MetricsConfig::default()).unwrap();
        a.record_conflict();
        assert!(b.render().unwrap().contains("scadenze_record_conflicts_total 0"));
    }
}
