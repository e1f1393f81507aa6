//! The SSE mutation-event stream.

use super::AppState;
use super::error::ApiResult;
use crate::auth::Claims;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// `GET /api/v1/events` — `event: <type>\ndata: <json>\n\n` per mutation. A lagging client
/// silently loses the oldest events and is expected to reconcile by polling the tree.
pub(super) async fn stream(State(state): State<AppState>, _claims: Claims) -> ApiResult<Response> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let event = item.ok()?;
        SseEvent::default().event(event.kind.as_str()).json_data(&event).ok().map(Ok::<_, std::convert::Infallible>)
    });

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    // Tell buffering proxies to pass events through as they happen.
    response.headers_mut().insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    Ok(response)
}
