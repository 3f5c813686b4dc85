use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use once_cell::sync::OnceCell;
use tower_http::cors::CorsLayer;

use crate::health::HealthTracker;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_total", "Source fetch attempts.");
        describe_counter!("fetch_errors_total", "Source fetches that failed (network, status, parse, timeout, panic).");
        describe_histogram!("fetch_duration_ms", "Source fetch time in milliseconds.");
        describe_histogram!("feed_parse_ms", "Feed document parse time in milliseconds.");
        describe_counter!("items_new_total", "Items that passed the dedup store.");
        describe_counter!("items_duplicate_total", "Items skipped as already seen.");
        describe_counter!("classify_skipped_total", "Items left unclassified after a service error or timeout.");
        describe_counter!("moderation_dropped_total", "Items dropped for High moderation severity.");
        describe_counter!("moderation_warned_total", "Items delivered with a content warning.");
        describe_counter!("deliveries_total", "Messages accepted by the messaging platform.");
        describe_counter!("delivery_errors_total", "Messages rejected after retries.");
        describe_gauge!("cycle_last_run_ts", "Unix ts when the last cycle finished.");
        describe_histogram!("cycle_duration_ms", "Whole cycle time in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder as the global recorder.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; for tests and embedding.
    pub fn detached() -> (Self, PrometheusRecorder) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (Self { handle }, recorder)
    }

    /// `/metrics` (Prometheus text), `/health` and `/health/sources`.
    pub fn router(&self, health: Arc<HealthTracker>) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route("/health", get(|| async { "ok" }))
            .route("/health/sources", get(source_health))
            .layer(CorsLayer::very_permissive())
            .with_state(health)
    }
}

async fn source_health(
    State(health): State<Arc<HealthTracker>>,
) -> Json<std::collections::BTreeMap<String, crate::health::SourceStats>> {
    Json(health.snapshot())
}
