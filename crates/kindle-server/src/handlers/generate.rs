//! Generation handler.

use axum::{extract::rejection::JsonRejection, extract::State, response::Response, Json};
use uuid::Uuid;

use crate::error::ServerError;
use crate::models::AskRequest;
use crate::state::AppState;
use crate::streaming;

/// Handle `POST /api/v1/ask`: stream the answer as server-sent events.
pub async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(req) = payload.map_err(|rejection| ServerError::InvalidRequest(rejection.body_text()))?;

    let session_id = Uuid::new_v4();
    let guard = state.sessions.try_acquire(session_id).ok_or_else(|| {
        if state.sessions.is_closed() {
            ServerError::ShuttingDown
        } else {
            ServerError::AtCapacity
        }
    })?;

    tracing::debug!(%session_id, prompt_len = req.prompt.len(), "generation requested");
    let events = state
        .orchestrator
        .generate(&req.prompt, guard.cancellation_token())
        .await?;

    Ok(streaming::stream_generation(events, guard))
}
