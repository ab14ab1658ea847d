//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kindle_sampling::SamplingError;
use serde_json::json;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    /// The request itself is unusable (empty prompt, bad body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid sampling configuration: {0}")]
    InvalidConfig(#[from] SamplingError),

    /// Building or warming up the engine failed.
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    /// A generation failed and its single retry failed too.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("server at capacity")]
    AtCapacity,

    /// The server stopped the generation while shutting down.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Stable machine-readable code, shared by JSON bodies and stream error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::InvalidConfig(_) => "invalid_config",
            ServerError::EngineInit(_) => "engine_init_failed",
            ServerError::EngineUnavailable(_) => "engine_unavailable",
            ServerError::AtCapacity => "at_capacity",
            ServerError::ShuttingDown => "shutting_down",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::EngineInit(_)
            | ServerError::EngineUnavailable(_)
            | ServerError::AtCapacity
            | ServerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message shown to clients.
    pub fn client_message(&self) -> String {
        match self {
            ServerError::InvalidRequest(msg) => msg.clone(),
            ServerError::InvalidConfig(err) => err.to_string(),
            ServerError::EngineInit(_) => {
                "The model is still loading or failed to load, try again later".to_string()
            }
            ServerError::EngineUnavailable(_) => {
                "The model is temporarily unavailable, try again later".to_string()
            }
            ServerError::AtCapacity => "Server at capacity, try again later".to_string(),
            ServerError::ShuttingDown => {
                "Server is shutting down, try again later".to_string()
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = if status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, code = self.code(), "request failed");
        }

        let body = Json(json!({
            "error": {
                "message": self.client_message(),
                "type": error_type,
                "code": self.code(),
            }
        }));

        (status, body).into_response()
    }
}
