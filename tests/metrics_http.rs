// tests/metrics_http.rs
//
// Monitoring surface served over the axum router, driven with tower's oneshot.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use chrono::Utc;
use http::{header, Request, StatusCode};
use metrics::counter;
use newsrelay::health::HealthTracker;
use newsrelay::ingest::types::{FeedSource, Fixture, FixtureFeedSource};
use newsrelay::metrics::Metrics;
use newsrelay::Source;
use tower::ServiceExt;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, http::HeaderMap, String) {
    let req = Request::builder()
        .uri(uri)
        .header(header::ORIGIN, "https://dash.test")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn health_is_ok_with_cors() {
    let (metrics, _recorder) = Metrics::detached();
    let (status, headers, body) = get(metrics.router(Arc::new(HealthTracker::new())), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://dash.test"
    );
}

#[tokio::test]
async fn source_health_is_served_as_json() {
    let (metrics, _recorder) = Metrics::detached();
    let health = Arc::new(HealthTracker::new());
    health.record_success("TechWire", Duration::from_millis(120), Utc::now());
    health.record_accepted("TechWire", 4);
    health.record_failure("Down", "non-success status 503", Duration::from_millis(40), Utc::now());

    let (status, _, body) = get(metrics.router(health), "/health/sources").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["TechWire"]["feed_count"], 4);
    assert_eq!(v["TechWire"]["error_count"], 0);
    assert_eq!(v["Down"]["error_count"], 1);
    assert_eq!(v["Down"]["last_error"], "non-success status 503");
}

#[tokio::test]
async fn metrics_renders_recorded_series() {
    let (metrics, recorder) = Metrics::detached();
    metrics::with_local_recorder(&recorder, || {
        counter!("fetch_total").increment(3);
        counter!("deliveries_total").increment(2);
    });

    let (status, _, body) = get(metrics.router(Arc::new(HealthTracker::new())), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("fetch_total 3"), "{body}");
    assert!(body.contains("deliveries_total 2"), "{body}");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (metrics, _recorder) = Metrics::detached();
    let (status, _, _) = get(metrics.router(Arc::new(HealthTracker::new())), "/admin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn scripted_documents_record_parse_time() {
    let (metrics, recorder) = Metrics::detached();
    let feed = FixtureFeedSource::new().with(
        "Wire",
        Fixture::Document(include_str!("fixtures/atom.xml").to_string()),
    );
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let entries = metrics::with_local_recorder(&recorder, || rt.block_on(feed.fetch(&Source::new("Wire", "u"))));
    assert!(!entries.unwrap().is_empty());

    let body = metrics.handle.render();
    assert!(body.contains("feed_parse_ms_count 1"), "{body}");
}
