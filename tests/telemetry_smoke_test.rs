//! Smoke tests against a local OTLP collector with Tempo, Prometheus and Loki.
//!
//! Run with the observability stack up:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use ingestq::model::JobId;
use ingestq::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry, job, metrics};
use opentelemetry::KeyValue;

const SERVICE: &str = "ingestq-smoke-test";

static TELEMETRY: OnceLock<TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        init_telemetry(TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: SERVICE.to_string(),
            default_level: "info".to_string(),
        })
        .expect("failed to init telemetry")
    })
}

async fn flush_and_wait(guard: &TelemetryGuard) {
    guard.force_flush();
    tokio::time::sleep(Duration::from_secs(8)).await;
}

async fn query(url: &str, params: &[(&str, &str)]) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .get(url)
        .query(params)
        .send()
        .await
        .expect("backend unreachable");
    assert!(resp.status().is_success(), "{url}: {}", resp.status());
    resp.json().await.expect("backend returned non-JSON")
}

#[test]
#[ignore]
fn smoke_traces() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();
        {
            let span = job::start_job_span("simple_conversion", &JobId::new());
            let _enter = span.enter();
            job::record_state_transition(&span, "pending", "running");
            job::record_state_transition(&span, "running", "completed");
        }
        flush_and_wait(guard).await;

        let service_tag = format!("service.name={SERVICE}");
        let body = query(
            "http://localhost:3200/api/search",
            &[("tags", service_tag.as_str()), ("limit", "5")],
        )
        .await;
        assert!(
            body["traces"].as_array().is_some_and(|t| !t.is_empty()),
            "expected traces in Tempo, got: {body}"
        );
    });
}

#[test]
#[ignore]
fn smoke_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        metrics::events_submitted().add(2, &[KeyValue::new("result", "accepted")]);
        metrics::job_state_transitions().add(
            1,
            &[KeyValue::new("from", "pending"), KeyValue::new("to", "running")],
        );
        metrics::queue_depth().record(4, &[]);
        flush_and_wait(guard).await;

        let body = query(
            "http://localhost:9090/api/v1/query",
            &[("query", "ingestq_events_submitted_total")],
        )
        .await;
        assert!(
            body["data"]["result"]
                .as_array()
                .is_some_and(|r| !r.is_empty()),
            "expected metric series in Prometheus, got: {body}"
        );
    });
}

#[test]
#[ignore]
fn smoke_logs() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        tracing::info!(component = "smoke-test", "smoke test info log");
        tracing::warn!(component = "smoke-test", "smoke test warning log");
        flush_and_wait(guard).await;

        let selector = format!(r#"{{service_name="{SERVICE}"}}"#);
        let body = query(
            "http://localhost:3100/loki/api/v1/query_range",
            &[("query", selector.as_str()), ("limit", "10")],
        )
        .await;
        assert!(
            body["data"]["result"]
                .as_array()
                .is_some_and(|s| !s.is_empty()),
            "expected log streams in Loki, got: {body}"
        );
    });
}
