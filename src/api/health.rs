use crate::api::AppState;
use crate::error::AppError;
use axum::{extract::State, Json};
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ready(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.repo.ping().await?;
    Ok(Json(json!({ "status": "ready" })))
}
