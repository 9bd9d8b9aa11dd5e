//! HTTP request handlers.

use super::AppState;
use crate::config::ConfigView;
use crate::health::HealthState;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::Serialize;

/// Liveness: recomputed on every request.
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.evaluate(Utc::now());
    let code = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub health: HealthState,
    pub config: ConfigView,
    pub targets: Vec<String>,
    pub uptime_seconds: f64,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        health: state.health.snapshot(),
        config: state.config.view(),
        targets: state.config.target_names(),
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
    })
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok((body, content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
