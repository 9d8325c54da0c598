//! Completion shaping: turns a backend fragment stream into
//! OpenAI-compatible completion responses.
//!
//! - [`options`]: Query/body option parsing and typed parameters
//! - [`choice`]: Fragments, choices and the choice reducer
//! - [`scheduler`]: Time-windowed buffering for streamed responses
//! - [`aggregator`]: Whole-response buffering with token usage
//! - [`response`]: Response template and stream events

pub mod aggregator;
pub mod choice;
pub mod options;
pub mod response;
pub mod scheduler;

use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, FragmentStream};
use aggregator::ChoiceAggregator;
use response::{CompletionResponse, ResponseTemplate, StreamEvent};
use scheduler::StreamScheduler;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Cannot reduce an empty choice buffer")]
    EmptyChoice,

    #[error("No model specified")]
    MissingModel,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Stream a completion as time-windowed chunks followed by `[DONE]`.
///
/// Fragments are pulled by a dedicated task. The task stops, dropping the
/// fragment stream, as soon as the receiver goes away. A backend error is
/// forwarded as the last item, without `[DONE]`.
///
/// Takes an already started `fragments` stream rather than the request
/// options: the HTTP handler parses options and calls
/// [`GenerationBackend::generate`](crate::backend::GenerationBackend::generate)
/// first, so a generation that fails to start is still answered with a
/// JSON error instead of an empty event stream.
pub fn handle_stream(
    mut fragments: FragmentStream,
    template: ResponseTemplate,
    max_interval: Duration,
) -> impl Stream<Item = Result<StreamEvent, CompletionError>> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut scheduler = StreamScheduler::new(max_interval);
        let mut chunks = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => {
                    info!(id = template.id, chunks, "Client disconnected, stopping generation");
                    return;
                }
                next = fragments.next() => next,
            };

            let fragment = match next {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => {
                    warn!(id = template.id, "Generation failed mid-stream: {e}");
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
                None => break,
            };

            match scheduler.push(fragment, Instant::now()) {
                Ok(Some(choice)) => {
                    chunks += 1;
                    let event = StreamEvent::Chunk(template.response(vec![choice]));
                    if tx.send(Ok(event)).await.is_err() {
                        // Receiver dropped, stop generating.
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        let remaining = match scheduler.finish() {
            Ok(remaining) => remaining,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        debug!(id = template.id, remaining = remaining.len(), "Flushing remaining choices");

        for choice in remaining {
            chunks += 1;
            let event = StreamEvent::Chunk(template.response(vec![choice]));
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }

        let _ = tx.send(Ok(StreamEvent::Done)).await;
        info!(id = template.id, chunks, "Stream complete");
    });

    ReceiverStream::new(rx)
}

/// Consume the whole fragment stream and return one response with usage.
///
/// Like [`handle_stream`], this starts from the backend's fragments; option
/// parsing and `generate` happen in the HTTP handler.
pub async fn handle_json(
    mut fragments: FragmentStream,
    template: ResponseTemplate,
) -> Result<CompletionResponse, CompletionError> {
    let mut aggregator = ChoiceAggregator::new();

    while let Some(fragment) = fragments.next().await {
        aggregator.push(fragment?);
    }

    info!(
        id = template.id,
        completion_tokens = aggregator.completion_tokens(),
        "Completion complete"
    );
    aggregator.finish(&template)
}
