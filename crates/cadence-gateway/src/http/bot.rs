//! Chat subscriber routes: start, stop, settings, listing.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use cadence_scheduler::{ScheduleDefinition, SettingsUpdate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::error::ApiResult;
use super::schedule::ScheduleInput;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub chat_id: String,
    pub message_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub message_text: Option<String>,
    #[serde(flatten)]
    pub schedule: ScheduleInput,
}

/// Split an explicit definition into the subscriber-level update: interval
/// schedules also become the subscriber's stored period.
pub(crate) fn settings_update(
    message_text: Option<String>,
    schedule: Option<ScheduleDefinition>,
) -> SettingsUpdate {
    let interval_secs = match &schedule {
        Some(ScheduleDefinition::Interval { every, unit })
            if *unit == cadence_scheduler::IntervalUnit::Seconds =>
        {
            Some(*every)
        }
        _ => None,
    };
    SettingsUpdate {
        message_text,
        interval_secs,
        schedule,
    }
}

/// POST /bot/start
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> ApiResult<Json<Value>> {
    let reg = state
        .orchestrator
        .register(&req.chat_id, req.message_text.as_deref())
        .await?;
    Ok(Json(json!({
        "status": "Bot started",
        "chat_id": reg.subscriber.chat_id,
        "created": reg.created,
        "job": reg.job,
    })))
}

/// POST /bot/stop?chat_id=
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ChatQuery>,
) -> ApiResult<Json<Value>> {
    info!(chat_id = %q.chat_id, "stop requested");
    let outcome = state.orchestrator.stop(&q.chat_id).await?;
    Ok(Json(json!({
        "status": "Bot stopped!",
        "chat_id": q.chat_id,
        "subscriber_found": outcome.subscriber_found,
        "job_disabled": outcome.job_disabled,
    })))
}

/// GET /bot/users
pub async fn users(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let subscribers = state.orchestrator.list_subscribers()?;
    Ok(Json(json!(subscribers)))
}

/// PUT /bot/settings?chat_id=
pub async fn settings(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ChatQuery>,
    Json(req): Json<SettingsRequest>,
) -> ApiResult<Json<Value>> {
    let def = req.schedule.definition()?;
    let res = state
        .orchestrator
        .update_settings(&q.chat_id, settings_update(req.message_text, def))
        .await?;
    Ok(Json(json!({
        "status": "Updated",
        "user": q.chat_id,
        "job": res.job,
        "cancelled": res.cancelled,
    })))
}
