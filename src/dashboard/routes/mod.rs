pub mod actions;
pub mod logs;
pub mod status;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::orchestrator::Supervisor;

use super::static_files;

#[derive(Clone)]
pub struct DashboardState {
    pub supervisor: Arc<Supervisor>,
}

pub fn api_router(state: DashboardState) -> Router {
    Router::new()
        .route(
            "/",
            get(static_files::serve_index).post(actions::submit_action),
        )
        .route("/api/status", get(status::get_status))
        .route("/api/logs", get(logs::list_logs))
        .with_state(state)
}
