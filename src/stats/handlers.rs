use axum::{extract::State, routing::get, Json, Router};
use tracing::instrument;

use crate::{
    state::AppState,
    stats::services::{ApiStats, SystemStats},
};

pub fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/stats/system", get(system_stats))
        .route("/stats/api", get(api_stats))
}

#[instrument(skip(state))]
pub async fn system_stats(State(state): State<AppState>) -> Json<SystemStats> {
    Json(state.stats.system_stats())
}

#[instrument(skip(state))]
pub async fn api_stats(State(state): State<AppState>) -> Json<ApiStats> {
    Json(ApiStats {
        total_requests: state.stats.total_requests(),
        active_connections: state.stats.active_requests(),
        users_total: state.users.count(),
        user_operations: state.user_ops.snapshot(),
    })
}
