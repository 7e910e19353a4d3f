//! Server-to-client progress channel.
//!
//! One SSE stream per session. The hub enforces single-subscriber
//! semantics: opening the stream again (page reload) evicts the previous
//! connection. The stream ends after the terminal update is delivered; a
//! client connecting after the session already finished receives the
//! retained terminal update immediately.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::api::{ApiError, SharedState};

/// `GET /jobs/{id}/stream`
pub async fn stream_job(
    Path(id): Path<String>,
    State(state): State<SharedState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // The store stays authoritative for existence; the hub only routes.
    state.store.get(&id)?;
    let rx = state
        .store
        .hub()
        .subscribe(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Session {id} not found")))?;

    debug!(session_id = %id, "progress subscriber attached");

    let stream =
        ReceiverStream::new(rx).map(|update| Event::default().event("update").json_data(&update));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
