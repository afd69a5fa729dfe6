use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Form;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::orchestrator::Action;

use super::DashboardState;

#[derive(Debug, Deserialize)]
pub struct ActionForm {
    pub action: String,
}

/// `POST /` with `action=<name>`. The command runs in the background; the
/// response only says whether it was accepted.
pub async fn submit_action(
    State(state): State<DashboardState>,
    Form(form): Form<ActionForm>,
) -> impl IntoResponse {
    let action: Action = match form.action.parse() {
        Ok(action) => action,
        Err(e) => {
            debug!(action = %form.action, "rejected web action");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    if let Action::Start(id) | Action::Stop(id) = &action {
        if !state.supervisor.service_ids().contains(id) {
            return (StatusCode::BAD_REQUEST, format!("unknown service `{}`", id)).into_response();
        }
    }

    let supervisor = state.supervisor.clone();
    tokio::spawn(async move {
        if let Err(e) = supervisor.dispatch(action).await {
            warn!("web action failed: {}", e);
        }
    });
    (StatusCode::OK, "OK").into_response()
}
