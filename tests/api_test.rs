//! HTTP control API, exercised over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ingestq::api::{self, AppState};
use ingestq::engine::{Orchestrator, OrchestratorConfig};
use ingestq::worker::{InProcessLauncher, InspectProcessor};
use secrecy::SecretString;
use serde_json::{Value, json};
use uuid::Uuid;

struct TestServer {
    base: String,
    orch: Orchestrator,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.orch.shutdown();
    }
}

async fn start(token: Option<&str>) -> TestServer {
    serve(token, true).await
}

/// Server whose dispatcher never runs, so queued events stay queued.
async fn start_idle() -> TestServer {
    serve(None, false).await
}

async fn serve(token: Option<&str>, run_loops: bool) -> TestServer {
    let config = OrchestratorConfig {
        dispatch_interval: Duration::from_millis(10),
        progress_interval: Duration::from_millis(10),
        state_dir: std::env::temp_dir()
            .join("ingestq-test")
            .join(Uuid::new_v4().to_string()),
        ..OrchestratorConfig::default()
    };
    let orch = Orchestrator::new(config, Arc::new(InProcessLauncher::new(InspectProcessor)));
    orch.init().await.unwrap();

    if run_loops {
        let runner = orch.clone();
        tokio::spawn(async move { runner.run().await });
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let state = AppState::new(orch.clone(), token.map(|t| SecretString::from(t.to_string())));
    tokio::spawn(api::serve(listener, state, orch.shutdown_signal()));

    TestServer {
        base: format!("http://{addr}"),
        orch,
        client: reqwest::Client::new(),
    }
}

async fn wait_for_state(server: &TestServer, job_id: &str, state: &str) -> Value {
    for _ in 0..300 {
        let job: Value = server
            .client
            .get(server.url(&format!("/jobs/{job_id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job["state"] == state {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {state}");
}

// ---------------------------------------------------------------------------
// Events and queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_execution_kind() {
    let server = start(None).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["executionKind"], "in_process");
}

#[tokio::test]
async fn duplicate_event_is_suppressed() {
    let server = start(None).await;
    let event = json!({ "resourcePath": "/in/a.pdf", "changeKind": "changed" });

    let first: Value = server
        .client
        .post(server.url("/events"))
        .json(&event)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["accepted"], true);

    let second: Value = server
        .client
        .post(server.url("/events"))
        .json(&event)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["accepted"], false);
}

#[tokio::test]
async fn event_without_change_kind_is_rejected() {
    let server = start(None).await;
    let resp = server
        .client
        .post(server.url("/events"))
        .json(&json!({ "resourcePath": "/in/a.pdf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn queue_depth_and_clear() {
    let server = start_idle().await;
    for path in ["/a", "/b", "/c"] {
        let resp = server
            .client
            .post(server.url("/events"))
            .json(&json!({ "resourcePath": path, "changeKind": "created" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let depth: Value = server
        .client
        .get(server.url("/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(depth["depth"], 3);

    let cleared: Value = server
        .client
        .delete(server.url("/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["removed"], 3);
    assert_eq!(server.orch.queue_depth(), 0);
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_get_list_job() {
    let server = start(None).await;
    let file = std::env::temp_dir()
        .join("ingestq-test")
        .join(format!("{}.txt", Uuid::new_v4()));
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "hello").unwrap();

    let resp = server
        .client
        .post(server.url("/jobs"))
        .json(&json!({
            "kind": "simple_conversion",
            "resourcePath": file.to_string_lossy(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["state"], "pending");
    let job_id = ack["jobId"].as_str().unwrap().to_string();

    let job = wait_for_state(&server, &job_id, "completed").await;
    assert_eq!(job["progressPercent"], 100);
    assert_eq!(job["kind"], "simple_conversion");
    assert!(job.get("processedCount").is_none());

    let list: Value = server
        .client
        .get(server.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["jobs"][0]["jobId"], job_id.as_str());
}

#[tokio::test]
async fn start_job_without_path_is_rejected() {
    let server = start(None).await;
    let resp = server
        .client
        .post(server.url("/jobs"))
        .json(&json!({ "kind": "batch_with_counts" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    let server = start(None).await;

    let resp = server
        .client
        .get(server.url(&format!("/jobs/{}", Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");

    let resp = server
        .client
        .post(server.url(&format!("/jobs/{}/stop", Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .get(server.url("/jobs/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stop_finished_job_echoes_state() {
    let server = start(None).await;
    let ack: Value = server
        .client
        .post(server.url("/jobs"))
        .json(&json!({
            "kind": "simple_conversion",
            "resourcePath": "/no/such/file.pdf",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = ack["jobId"].as_str().unwrap().to_string();
    wait_for_state(&server, &job_id, "failed").await;

    let stopped: Value = server
        .client
        .post(server.url(&format!("/jobs/{job_id}/stop")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["state"], "failed");
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn token_guards_everything_but_health() {
    let server = start(Some("s3cret")).await;

    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let anon = server.client.get(server.url("/jobs")).send().await.unwrap();
    assert_eq!(anon.status(), 401);
    let body: Value = anon.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    let wrong = server
        .client
        .get(server.url("/jobs"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = server
        .client
        .get(server.url("/jobs"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
}
