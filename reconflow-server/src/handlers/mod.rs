//! HTTP handlers.

pub mod scan;
pub mod tools;

use axum::Json;
use serde_json::{Value, json};

/// Liveness check, always `{"status": "ok"}`.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
