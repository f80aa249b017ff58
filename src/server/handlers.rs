use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ApiResult};
use crate::engine::{Engine, HealthReport};
use crate::registry::Registration;
use crate::state_machine::{Signal, TaskSnapshot, Transition};

pub type AppState = Arc<Engine>;

#[derive(Debug, Deserialize)]
pub struct RegisterCallbackRequest {
    pub task_id: String,
    pub client_id: String,
    pub callback_url: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterCallbackResponse {
    pub status: &'static str,
    pub task_id: String,
    pub client_id: String,
    pub callback_url: String,
    pub registered_callbacks: usize,
    pub replaced: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterCallbackRequest {
    pub task_id: String,
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct UnregisterCallbackResponse {
    pub status: &'static str,
    pub task_id: String,
    pub client_id: String,
    pub registered_callbacks: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub task_id: String,
    pub client_id: String,
    #[serde(default)]
    pub validate: bool,
}

#[derive(Debug, Serialize)]
pub struct StartTaskResponse {
    pub status: &'static str,
    pub task_id: String,
    pub client_id: String,
    pub validate: bool,
    pub registered_callbacks: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reextract,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub task_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub status: &'static str,
    pub task_id: String,
    pub iteration_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CallbacksResponse {
    pub task_id: String,
    pub callback_count: usize,
    pub callbacks: Vec<Registration>,
    pub timestamp: DateTime<Utc>,
}

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    Ok(())
}

pub async fn register_callback(
    State(engine): State<AppState>,
    payload: Result<Json<RegisterCallbackRequest>, JsonRejection>,
) -> ApiResult<Json<RegisterCallbackResponse>> {
    let Json(req) = payload?;
    require("task_id", &req.task_id)?;
    require("client_id", &req.client_id)?;
    require("callback_url", &req.callback_url)?;

    let outcome = engine.register_callback(&req.task_id, &req.client_id, &req.callback_url);
    Ok(Json(RegisterCallbackResponse {
        status: "registered",
        task_id: req.task_id,
        client_id: req.client_id,
        callback_url: req.callback_url,
        registered_callbacks: outcome.registered_callbacks,
        replaced: outcome.replaced,
        timestamp: Utc::now(),
    }))
}

pub async fn unregister_callback(
    State(engine): State<AppState>,
    payload: Result<Json<UnregisterCallbackRequest>, JsonRejection>,
) -> ApiResult<Json<UnregisterCallbackResponse>> {
    let Json(req) = payload?;
    let (removed, remaining) = engine.unregister_callback(&req.task_id, &req.client_id);
    Ok(Json(UnregisterCallbackResponse {
        status: if removed { "unregistered" } else { "not_registered" },
        task_id: req.task_id,
        client_id: req.client_id,
        registered_callbacks: remaining,
        timestamp: Utc::now(),
    }))
}

pub async fn start_task_with_callbacks(
    State(engine): State<AppState>,
    payload: Result<Json<StartTaskRequest>, JsonRejection>,
) -> ApiResult<Json<StartTaskResponse>> {
    let Json(req) = payload?;
    require("task_id", &req.task_id)?;
    require("client_id", &req.client_id)?;

    // The cycle keeps running after the handle is dropped.
    let report = engine.start_task(&req.task_id, &req.client_id, req.validate)?;
    Ok(Json(StartTaskResponse {
        status: "started",
        task_id: req.task_id,
        client_id: req.client_id,
        validate: req.validate,
        registered_callbacks: report.registered_callbacks,
        timestamp: Utc::now(),
    }))
}

pub async fn validate(
    State(engine): State<AppState>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> ApiResult<Json<ValidateResponse>> {
    let Json(req) = payload?;
    let signal = match req.decision {
        Decision::Accept => Signal::Accept,
        Decision::Reextract => Signal::Reextract {
            comments: req.comments,
        },
    };

    let report = engine.validate(&req.task_id, signal)?;
    let status = match report.transition {
        Transition::Accepted => "accepted",
        Transition::Reextract { .. } => "reextracting",
        Transition::Escalated { .. } => "max_iter_reached",
    };
    info!(task_id = %req.task_id, status, "validation signal applied");
    Ok(Json(ValidateResponse {
        status,
        task_id: req.task_id,
        iteration_count: report.task.iteration_count,
        timestamp: Utc::now(),
    }))
}

pub async fn task_result(
    State(engine): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskSnapshot>> {
    Ok(Json(engine.task_result(&task_id)?))
}

pub async fn registered_callbacks(
    State(engine): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<CallbacksResponse> {
    let callbacks = engine.callbacks(&task_id);
    Json(CallbacksResponse {
        task_id,
        callback_count: callbacks.len(),
        callbacks,
        timestamp: Utc::now(),
    })
}

pub async fn health(State(engine): State<AppState>) -> Json<HealthReport> {
    Json(engine.health())
}
