//! Server-Sent Events for record lifecycle notifications

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events - SSE event stream
///
/// Streams events:
/// - ConnectionStatus (on connect)
/// - RecordCreated / RecordDeleted
/// - heartbeat comments every 15 seconds
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    archive_common::sse::create_event_sse_stream("archive-history", &state.event_bus)
}
