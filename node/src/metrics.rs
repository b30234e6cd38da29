//! # Prometheus Metrics
//!
//! Lifecycle counters for the gateway, scraped at `/metrics` on the metrics
//! port. Registered in a dedicated [`prometheus::Registry`] under the
//! `nova_gateway` namespace.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use nova_lifecycle::{LifecycleEvent, TransactionEvent};

/// Handles to every gateway metric.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Lifecycles accepted by `POST /lifecycle`.
    pub lifecycles_started_total: IntCounter,
    /// Terminal outcomes, labelled `success`, `partially_indexed`, `failed`
    /// or `cancelled`.
    pub lifecycle_outcomes_total: IntCounterVec,
    /// Ledger steps that reached `Confirmed`.
    pub transactions_confirmed_total: IntCounter,
    /// Lifecycles whose stream is still open.
    pub lifecycles_in_flight: IntGauge,
    /// Request-to-terminal-event time in seconds.
    pub lifecycle_duration_seconds: Histogram,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("nova_gateway".into()), None)
            .expect("failed to create prometheus registry");

        let lifecycles_started_total = IntCounter::new(
            "lifecycles_started_total",
            "Total number of lifecycles started",
        )
        .expect("metric creation");
        registry
            .register(Box::new(lifecycles_started_total.clone()))
            .expect("metric registration");

        let lifecycle_outcomes_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_outcomes_total",
                "Lifecycles by terminal outcome",
            ),
            &["outcome"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(lifecycle_outcomes_total.clone()))
            .expect("metric registration");

        let transactions_confirmed_total = IntCounter::new(
            "transactions_confirmed_total",
            "Total number of ledger steps confirmed",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_confirmed_total.clone()))
            .expect("metric registration");

        let lifecycles_in_flight =
            IntGauge::new("lifecycles_in_flight", "Lifecycles currently streaming")
                .expect("metric creation");
        registry
            .register(Box::new(lifecycles_in_flight.clone()))
            .expect("metric registration");

        let lifecycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "lifecycle_duration_seconds",
                "Time from request to terminal event in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(lifecycle_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            lifecycles_started_total,
            lifecycle_outcomes_total,
            transactions_confirmed_total,
            lifecycles_in_flight,
            lifecycle_duration_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// Follows one lifecycle stream and records it.
///
/// If the stream is dropped before its terminal event (client hung up),
/// the lifecycle counts as cancelled.
pub struct LifecycleTracker {
    metrics: SharedMetrics,
    started: Instant,
    finished: bool,
}

impl LifecycleTracker {
    pub fn start(metrics: SharedMetrics) -> Self {
        metrics.lifecycles_started_total.inc();
        metrics.lifecycles_in_flight.inc();
        Self {
            metrics,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn observe(&mut self, event: &LifecycleEvent) {
        if let LifecycleEvent::Transaction {
            event: TransactionEvent::Confirmed { .. },
        } = event
        {
            self.metrics.transactions_confirmed_total.inc();
        }
        if let Some(outcome) = event.outcome() {
            self.finish(outcome);
        }
    }

    fn finish(&mut self, outcome: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.metrics
            .lifecycle_outcomes_total
            .with_label_values(&[outcome])
            .inc();
        self.metrics
            .lifecycle_duration_seconds
            .observe(self.started.elapsed().as_secs_f64());
        self.metrics.lifecycles_in_flight.dec();
    }
}

impl Drop for LifecycleTracker {
    fn drop(&mut self) {
        self.finish("cancelled");
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
