use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use cadence_core::config::CadenceConfig;
use cadence_scheduler::Orchestrator;

use crate::http::{bot, health, projects, scheduler};

/// Shared state handed to every handler as `Arc<AppState>`.
pub struct AppState {
    pub config: CadenceConfig,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: CadenceConfig, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/bot/start", post(bot::start))
        .route("/bot/stop", post(bot::stop))
        .route("/bot/users", get(bot::users))
        .route("/bot/settings", put(bot::settings))
        .route("/scheduler/create", post(scheduler::create))
        .route("/scheduler/list", get(scheduler::list))
        .route("/scheduler/{id}", get(scheduler::get))
        .route("/scheduler/update/{id}", put(scheduler::update))
        .route("/scheduler/delete/{id}", delete(scheduler::delete))
        .route(
            "/projects/{project_id}/schedule",
            post(projects::schedule).delete(projects::unschedule),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
