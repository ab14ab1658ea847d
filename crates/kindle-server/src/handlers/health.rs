//! Liveness, readiness and status probes.

use axum::{extract::State, http::StatusCode, Json};

use crate::lifecycle::ReadinessState;
use crate::models::{HealthResponse, LiveResponse, PingResponse, ReadyResponse, RootResponse};
use crate::state::AppState;

fn status(ready: bool) -> StatusCode {
    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Always 200 while the process runs.
pub async fn handle_live() -> Json<LiveResponse> {
    Json(LiveResponse { alive: true })
}

pub async fn handle_ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.lifecycle().is_ready();
    (status(ready), Json(ReadyResponse { ready }))
}

/// Combined probe. Includes session utilization when ready.
pub async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let readiness = state.lifecycle().readiness();
    let body = match readiness.state {
        ReadinessState::Ready => HealthResponse {
            status: "healthy",
            ready: true,
            service: Some(state.config.service_name.clone()),
            model: Some(state.config.model_name.clone()),
            active_generations: Some(state.sessions.active_count()),
            message: None,
        },
        ReadinessState::Starting => HealthResponse {
            status: "unavailable",
            ready: false,
            service: None,
            model: None,
            active_generations: None,
            message: Some(format!("{} engine is still loading", state.config.service_name)),
        },
        ReadinessState::Unavailable => HealthResponse {
            status: "unavailable",
            ready: false,
            service: None,
            model: None,
            active_generations: None,
            message: Some(readiness.reason),
        },
    };
    (status(body.ready), Json(body))
}

/// Legacy alias of the health probe.
pub async fn handle_ping(State(state): State<AppState>) -> (StatusCode, Json<PingResponse>) {
    if state.lifecycle().is_ready() {
        (StatusCode::OK, Json(PingResponse { status: "healthy" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PingResponse { status: "starting" }),
        )
    }
}

pub async fn handle_root(State(state): State<AppState>) -> Json<RootResponse> {
    let status = if state.lifecycle().is_ready() {
        "running"
    } else {
        "starting"
    };
    Json(RootResponse {
        name: state.config.app_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        status,
        started_at: state.started_at,
    })
}
