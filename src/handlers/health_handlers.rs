//! Health & liveness handlers.
//!
//! - GET /healthz -> simple liveness ("ok")
//! - GET /health  -> cached reachability of both stores plus slot usage

use crate::{handlers::AppState, services::health::HealthReport};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
}

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(LivenessResponse { status: "ok" }))
}

/// `GET /health`
///
/// 200 while both stores answer (or answered within the cache window),
/// 503 otherwise or once shutdown has begun.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
