use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use super::DashboardState;

pub async fn get_status(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.supervisor.status()).into_response()
}
