//! Server-Sent Events (SSE) encoding of generation streams.
//!
//! Each event is sent as `data: {json}\n\n`:
//! - `{"type":"answer_part","data":"..."}` per fragment
//! - `{"type":"done"}` last, on success
//! - `{"type":"error","message":"..."}` last, when the generation fails
//!   after the response has started

use std::convert::Infallible;

use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::json;

use crate::error::ServerError;
use crate::formatter::WireEvent;
use crate::orchestrator::EventStream;
use crate::session_manager::SessionGuard;

/// Build the SSE response for one generation.
///
/// The stream owns the `SessionGuard`. When the client disconnects, axum
/// drops the stream, which drops the guard, which cancels the token and
/// frees the session slot.
pub fn stream_generation(events: EventStream, guard: SessionGuard) -> Response {
    let session_id = guard.session_id();
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut events = events;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => yield Ok::<_, Infallible>(encode(&event)),
                Err(err) => {
                    tracing::warn!(%session_id, error = %err, "generation ended with an error");
                    yield Ok(error_event(&err));
                    return;
                }
            }
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn encode(event: &WireEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().data(data),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode wire event");
            Event::default().comment("unencodable event")
        }
    }
}

fn error_event(err: &ServerError) -> Event {
    let frame = json!({
        "type": "error",
        "code": err.code(),
        "message": err.client_message(),
    });
    Event::default().data(frame.to_string())
}
