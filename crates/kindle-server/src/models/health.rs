//! Probe response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// `GET /live`.
#[derive(Debug, Clone, Serialize)]
pub struct LiveResponse {
    pub alive: bool,
}

/// `GET /ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// `GET /health`. Identifiers are present when ready, a message otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_generations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /ping`.
#[derive(Debug, Clone, Serialize)]
pub struct PingResponse {
    pub status: &'static str,
}

/// `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct RootResponse {
    pub name: String,
    pub version: &'static str,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
}
