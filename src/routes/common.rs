//! Ambient routes: liveness, readiness, version.

use crate::store::Database;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 503 while the database cannot answer a ping.
async fn ready(State(db): State<Arc<dyn Database>>) -> (StatusCode, Json<Value>) {
    if let Err(e) = db.ping().await {
        tracing::warn!(error = %e, "readiness check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unavailable" })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "ok", "database": "ok" })))
}

async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn common_routes(db: Arc<dyn Database>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(db)
}
