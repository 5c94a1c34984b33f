//! Local control API
//!
//! - `GET /health`: liveness
//! - `GET /status`: guard status as JSON
//! - `POST /rotate`: start a rotation (202, or 409 while one runs)
//! - `GET /metrics`: Prometheus text exposition

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tunnelguard_vpn::{Guard, GuardStatus, RotationError};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<Guard>,
    pub metrics: PrometheusHandle,
}

/// Rotation request outcome
#[derive(Serialize)]
pub struct RotateResponse {
    pub accepted: bool,
    pub message: String,
}

/// Install the global Prometheus recorder and describe the guard metrics
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tunnelguard_vpn::describe_metrics();
    Ok(handle)
}

pub fn router(guard: Arc<Guard>, metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rotate", post(rotate_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState { guard, metrics })
}

/// GET /health
async fn health_handler() -> &'static str {
    "OK"
}

/// GET /status
async fn status_handler(State(state): State<AppState>) -> Json<GuardStatus> {
    Json(state.guard.status().await)
}

/// POST /rotate - manual rotation
async fn rotate_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.guard.trigger_rotation() {
        Ok(()) => {
            info!("Manual rotation requested");
            (
                StatusCode::ACCEPTED,
                Json(RotateResponse {
                    accepted: true,
                    message: "Rotation started".to_string(),
                }),
            )
        }
        Err(e @ RotationError::InProgress) => (
            StatusCode::CONFLICT,
            Json(RotateResponse {
                accepted: false,
                message: e.to_string(),
            }),
        ),
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
