//! Prometheus metrics definitions for swingscope
//!
//! All metrics use the `swingscope_` prefix and are read-only.

use prometheus::{CounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for the detection pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ticks accepted by the aggregator, per symbol
    pub ticks_ingested_total: CounterVec,
    /// Ticks and bars rejected, by reason
    pub inputs_rejected_total: CounterVec,
    /// Events published, by kind
    pub events_emitted_total: CounterVec,
    /// Emissions suppressed by the dedup gate, by kind
    pub events_deduplicated_total: CounterVec,
    /// Retried store operations
    pub storage_retries_total: CounterVec,
    /// Pipelines per status (running/stopped/failed)
    pub pipelines: IntGaugeVec,
}

impl Metrics {
    /// Create a new Metrics instance with all counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_ingested_total = CounterVec::new(
            Opts::new("swingscope_ticks_ingested_total", "Ticks accepted per symbol"),
            &["symbol"],
        )?;
        registry.register(Box::new(ticks_ingested_total.clone()))?;

        let inputs_rejected_total = CounterVec::new(
            Opts::new(
                "swingscope_inputs_rejected_total",
                "Ticks and bars rejected by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(inputs_rejected_total.clone()))?;

        let events_emitted_total = CounterVec::new(
            Opts::new("swingscope_events_emitted_total", "Events published by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(events_emitted_total.clone()))?;

        let events_deduplicated_total = CounterVec::new(
            Opts::new(
                "swingscope_events_deduplicated_total",
                "Emissions suppressed because their identity was already recorded",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(events_deduplicated_total.clone()))?;

        let storage_retries_total = CounterVec::new(
            Opts::new(
                "swingscope_storage_retries_total",
                "Store operations retried after a failure",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(storage_retries_total.clone()))?;

        let pipelines = IntGaugeVec::new(
            Opts::new("swingscope_pipelines", "Symbol pipelines by status"),
            &["status"],
        )?;
        registry.register(Box::new(pipelines.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks_ingested_total,
            inputs_rejected_total,
            events_emitted_total,
            events_deduplicated_total,
            storage_retries_total,
            pipelines,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_ticks(&self, symbol: &str) {
        self.ticks_ingested_total.with_label_values(&[symbol]).inc();
    }

    pub fn inc_rejected(&self, reason: &str) {
        self.inputs_rejected_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_emitted(&self, kind: &str) {
        self.events_emitted_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_deduplicated(&self, kind: &str) {
        self.events_deduplicated_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_storage_retries(&self, operation: &str) {
        self.storage_retries_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn pipeline_started(&self) {
        self.pipelines.with_label_values(&["running"]).inc();
    }

    pub fn pipeline_ended(&self, failed: bool) {
        self.pipelines.with_label_values(&["running"]).dec();
        let status = if failed { "failed" } else { "stopped" };
        self.pipelines.with_label_values(&[status]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}
