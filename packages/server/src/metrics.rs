//! Prometheus metrics for portal traffic
//!
//! Every network portal owns a [`PortalMetrics`] with its own
//! `prometheus::Registry`; there is no process-wide state, so several portals
//! (or several tests) can coexist in one process.

use crate::error::PortalError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Outcome label of a successful call
pub const OUTCOME_OK: &str = "ok";

/// Per-portal metrics
#[derive(Clone)]
pub struct PortalMetrics {
    registry: Registry,
    calls_total: CounterVec,
    call_duration_seconds: HistogramVec,
    ws_connections: IntGauge,
}

impl Default for PortalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let calls_total = CounterVec::new(
            Opts::new("portico_calls_total", "Total number of function calls served"),
            &["transport", "function", "outcome"],
        )
        .expect("metric can be created");

        let call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "portico_call_duration_seconds",
                "Function call duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["transport", "function"],
        )
        .expect("metric can be created");

        let ws_connections = IntGauge::new(
            "portico_ws_connections",
            "Number of open WebSocket connections",
        )
        .expect("metric can be created");

        registry
            .register(Box::new(calls_total.clone()))
            .expect("portico_calls_total can be registered");
        registry
            .register(Box::new(call_duration_seconds.clone()))
            .expect("portico_call_duration_seconds can be registered");
        registry
            .register(Box::new(ws_connections.clone()))
            .expect("portico_ws_connections can be registered");

        Self {
            registry,
            calls_total,
            call_duration_seconds,
            ws_connections,
        }
    }

    /// Record one served call
    pub fn record_call(
        &self,
        transport: &str,
        function: &str,
        error: Option<&PortalError>,
        elapsed: Duration,
    ) {
        let outcome = error.map(PortalError::code).unwrap_or(OUTCOME_OK);
        self.calls_total
            .with_label_values(&[transport, function, outcome])
            .inc();
        self.call_duration_seconds
            .with_label_values(&[transport, function])
            .observe(elapsed.as_secs_f64());
    }

    pub fn connection_opened(&self) {
        self.ws_connections.inc();
    }

    pub fn connection_closed(&self) {
        self.ws_connections.dec();
    }

    /// Calls recorded for one label set
    pub fn calls(&self, transport: &str, function: &str, outcome: &str) -> u64 {
        self.calls_total
            .with_label_values(&[transport, function, outcome])
            .get() as u64
    }

    pub fn open_connections(&self) -> i64 {
        self.ws_connections.get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode in Prometheus text format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}

impl std::fmt::Debug for PortalMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalMetrics")
            .field("ws_connections", &self.ws_connections.get())
            .finish()
    }
}
