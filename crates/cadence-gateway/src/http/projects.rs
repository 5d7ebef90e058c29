//! Project-scoped ad-hoc search schedules. Membership is checked by the
//! project service in front of this gateway.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use cadence_scheduler::ProjectSearchRequest;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiResult;
use super::schedule::ScheduleInput;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ScheduleSearchRequest {
    pub user_id: i64,
    pub query: String,
    pub country: Option<String>,
    pub language: Option<String>,
    pub domain: Option<String>,
    #[serde(flatten)]
    pub schedule: ScheduleInput,
}

#[derive(Debug, Deserialize)]
pub struct SearchKey {
    pub user_id: i64,
    pub query: String,
}

/// POST /projects/{project_id}/schedule
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Json(req): Json<ScheduleSearchRequest>,
) -> ApiResult<Json<Value>> {
    let def = req.schedule.required_definition()?;
    let kind = def.kind();
    let res = state
        .orchestrator
        .schedule_project_search(ProjectSearchRequest {
            project_id,
            user_id: req.user_id,
            query: req.query,
            schedule: def,
            country: req.country,
            language: req.language,
            domain: req.domain,
        })
        .await?;
    Ok(Json(json!({
        "scheduled": true,
        "message": format!("The request is scheduled with the type {}", kind.as_str()),
        "job": res.job,
    })))
}

/// DELETE /projects/{project_id}/schedule?user_id=&query=
pub async fn unschedule(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Query(key): Query<SearchKey>,
) -> ApiResult<Json<Value>> {
    let deleted = state
        .orchestrator
        .delete_project_search(project_id, key.user_id, &key.query)
        .await?;
    Ok(Json(json!({ "deleted": deleted })))
}
