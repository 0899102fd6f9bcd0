//! Route handlers. Each one is a thin shim over [`Orchestrator`](crate::engine::Orchestrator).

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::auth::Caller;
use super::error::{ApiError, ApiResult};
use crate::engine::SubmitOutcome;
use crate::error::Error;
use crate::event::{ChangeEvent, ChangeKind};
use crate::model::{Job, JobAck, JobId, JobKind, JobList, StartJobParams};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub resource_path: Option<String>,
    pub change_kind: Option<ChangeKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub kind: Option<JobKind>,
    #[serde(flatten)]
    pub params: StartJobParams,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "executionKind": state.orchestrator.execution_kind().to_string(),
        "activeWorkers": state.orchestrator.active_workers(),
    }))
}

/// POST /events
pub async fn submit_event(
    _caller: Caller,
    State(state): State<AppState>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitOutcome>> {
    let request = body(payload)?;
    let resource_path = request
        .resource_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Error::Validation("resourcePath is required".to_string()))?;
    let change_kind = request
        .change_kind
        .ok_or_else(|| Error::Validation("changeKind is required".to_string()))?;

    let outcome = state
        .orchestrator
        .submit_event(ChangeEvent::new(change_kind, resource_path));
    Ok(Json(outcome))
}

/// GET /queue
pub async fn queue_depth(_caller: Caller, State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "depth": state.orchestrator.queue_depth() }))
}

/// DELETE /queue
pub async fn clear_queue(_caller: Caller, State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "removed": state.orchestrator.clear_queue() }))
}

/// POST /jobs
pub async fn start_job(
    _caller: Caller,
    State(state): State<AppState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAck>)> {
    let request = body(payload)?;
    let kind = request
        .kind
        .ok_or_else(|| Error::Validation("kind is required".to_string()))?;
    let ack = state.orchestrator.start_job(kind, request.params)?;
    Ok((StatusCode::CREATED, Json(ack)))
}

/// GET /jobs
pub async fn list_jobs(_caller: Caller, State(state): State<AppState>) -> Json<JobList> {
    Json(state.orchestrator.list_jobs())
}

/// GET /jobs/{id}
pub async fn get_job(
    _caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.orchestrator.get_job(id)?))
}

/// POST /jobs/{id}/stop
pub async fn stop_job(
    _caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobAck>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.orchestrator.stop_job(id)?))
}
