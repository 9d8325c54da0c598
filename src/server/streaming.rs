//! SSE (Server-Sent Events) streaming for completion chunks.
//!
//! Converts the completion event stream into an axum SSE response. Each
//! chunk becomes one `data:` event; the stream ends with `data: [DONE]`.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};

use crate::completion::response::StreamEvent;
use crate::completion::CompletionError;

/// Encode one completion event as an SSE event.
pub fn to_sse_event(event: &StreamEvent) -> Result<Event, CompletionError> {
    Ok(Event::default().data(event.data()?))
}

/// Wrap completion events in an SSE response.
///
/// An error item aborts the response body, so clients see a truncated
/// stream rather than `[DONE]`.
pub fn completion_sse<S>(
    events: S,
) -> Sse<impl Stream<Item = Result<Event, CompletionError>>>
where
    S: Stream<Item = Result<StreamEvent, CompletionError>> + Send + 'static,
{
    let stream = events.map(|item| item.and_then(|event| to_sse_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
