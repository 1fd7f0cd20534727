//! Server-sent events — one-way bus streaming.
//!
//! Frames are `event: <bus-event-type>` / `data: <json>`; keep-alive is the
//! underlying transport's concern. An optional `sessionId` query filters to
//! one session.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures::Stream;
use serde::Deserialize;
use tracing::warn;

use crate::state::SharedState;

/// Query of `GET /api/events`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    /// Restrict the stream to one session.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `GET /api/events`.
pub async fn events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.manager.bus().subscribe_channel(query.session_id.as_deref());

    // The subscription rides inside the stream state, so dropping the SSE
    // response unsubscribes from the bus.
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let bus_event = subscription.recv().await?;
        let sse_event = match Event::default().event(bus_event.event_type.clone()).json_data(&bus_event)
        {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "failed to serialize SSE event");
                Event::default().event(bus_event.event_type.clone()).data("{}")
            }
        };
        Some((Ok(sse_event), subscription))
    });
    Sse::new(stream)
}
