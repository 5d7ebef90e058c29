//! Job management routes.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use cadence_scheduler::JobUpdate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::bot::settings_update;
use super::error::ApiResult;
use super::schedule::ScheduleInput;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub chat_id: String,
    pub text: String,
    #[serde(flatten)]
    pub schedule: ScheduleInput,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub text: Option<String>,
    #[serde(flatten)]
    pub schedule: ScheduleInput,
}

/// POST /scheduler/create: set an explicit schedule for a subscriber.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRequest>,
) -> ApiResult<Json<Value>> {
    let def = req.schedule.required_definition()?;
    let res = state
        .orchestrator
        .update_settings(&req.chat_id, settings_update(Some(req.text), Some(def)))
        .await?;
    Ok(Json(json!({
        "status": "Schedule created",
        "chat_id": req.chat_id,
        "job": res.job,
    })))
}

/// GET /scheduler/list
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let jobs = state.orchestrator.list_jobs()?;
    Ok(Json(json!(jobs)))
}

/// GET /scheduler/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let detail = state.orchestrator.get_job(id)?;
    Ok(Json(json!(detail)))
}

/// PUT /scheduler/update/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Json<Value>> {
    let update = JobUpdate {
        schedule: req.schedule.definition()?,
        message_text: req.text,
    };
    let res = state.orchestrator.update_job(id, update).await?;
    Ok(Json(json!({
        "status": "Task updated",
        "task_id": res.job.id,
        "job": res.job,
    })))
}

/// DELETE /scheduler/delete/{id}: a missing job is reported, not an error.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    match state.orchestrator.delete_job(id).await? {
        Some(job) => Ok(Json(json!({
            "status": "Schedule deleted",
            "task_id": job.id,
        }))),
        None => {
            warn!(task_id = id, "delete of unknown job");
            Ok(Json(json!({
                "status": "Schedule not found",
                "task_id": id,
            })))
        }
    }
}
