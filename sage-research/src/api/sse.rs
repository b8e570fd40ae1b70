//! Server-Sent Events for session progress streaming

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use sage_common::sse::create_event_sse_stream;

use crate::AppState;

/// GET /events query
#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    /// Only forward events of this session
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// GET /events - SSE stream of learning events
///
/// Streams session lifecycle events (SessionCreated, SessionStarted,
/// SessionPaused, SessionResumed, SessionCompleted, SessionFailed), phase
/// boundaries and SessionProgress updates.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.event_bus().subscribe();
    create_event_sse_stream("sage-research", rx, move |event| {
        query.session_id.map_or(true, |id| event.session_id() == id)
    })
}
