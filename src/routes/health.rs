use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub docs: &'static str,
    pub status: &'static str,
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

pub async fn root() -> Json<RootResponse> {
    tracing::debug!("root endpoint accessed");
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        docs: "/api/v1",
        status: "healthy",
    })
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn readyz() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}
