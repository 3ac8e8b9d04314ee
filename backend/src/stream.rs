use actix_web::HttpResponse;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use actix_web::web::Bytes;
use futures::{Stream, StreamExt, future, stream};
use shared::StreamEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::PipelineRunner;
use crate::store::{StoreError, TaskStore};

pub const TASK_NOT_FOUND_MESSAGE: &str = "Task not found.";

/// Encodes one event as a server-sent-events frame: `data: <json>\n\n`.
pub fn encode_frame(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

fn frames<S>(events: S) -> impl Stream<Item = Result<Bytes, actix_web::Error>>
where
    S: Stream<Item = StreamEvent>,
{
    events.map(|event| {
        encode_frame(&event).map_err(|e| {
            log::error!("Failed to encode {} event: {}", event.kind(), e);
            actix_web::error::ErrorInternalServerError(e)
        })
    })
}

fn event_stream_response<S>(events: S) -> HttpResponse
where
    S: Stream<Item = StreamEvent> + 'static,
{
    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, HeaderValue::from_static("text/event-stream")))
        .insert_header((CACHE_CONTROL, HeaderValue::from_static("no-cache")))
        .streaming(frames(events))
}

/// Consumes the task and streams its pipeline events.
///
/// The runner lives on a spawned task feeding a bounded channel; the
/// response body drains the channel. The body is dropped when the client
/// disconnects, which makes the runner's next send fail and stops it.
/// An unknown id gets a body holding a single `error` event.
pub fn open(
    task_id: &str,
    store: &TaskStore,
    runner: &PipelineRunner,
    capacity: usize,
) -> HttpResponse {
    match store.take(task_id) {
        Ok(task) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            let runner = runner.clone();
            actix_web::rt::spawn(async move {
                runner.run(task, &tx).await;
            });
            event_stream_response(ReceiverStream::new(rx))
        }
        Err(StoreError::NotFound(_)) => {
            log::warn!("TASK {}: Stream requested for unknown task", task_id);
            event_stream_response(stream::once(future::ready(StreamEvent::Error {
                message: TASK_NOT_FOUND_MESSAGE.to_string(),
            })))
        }
    }
}
