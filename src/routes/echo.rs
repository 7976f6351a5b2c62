use axum::{extract::rejection::JsonRejection, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    error::{ApiError, FieldErrors},
    state::AppState,
};

const MAX_MESSAGE_LEN: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct EchoRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EchoResponse {
    pub message: String,
}

pub fn echo_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/echo", post(echo))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "pong": "ok" }))
}

#[instrument(skip(payload))]
pub async fn echo(
    payload: Result<Json<EchoRequest>, JsonRejection>,
) -> Result<Json<EchoResponse>, ApiError> {
    let Json(EchoRequest { message }) = payload?;

    let mut fields = FieldErrors::new();
    if message.is_empty() {
        fields.insert("message".into(), "message is required".into());
    } else if message.chars().count() > MAX_MESSAGE_LEN {
        fields.insert(
            "message".into(),
            format!("must be at most {MAX_MESSAGE_LEN} characters"),
        );
    }
    if !fields.is_empty() {
        return Err(ApiError::Validation(fields));
    }

    Ok(Json(EchoResponse { message }))
}
