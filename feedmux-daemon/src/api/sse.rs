//! Server-Sent Events streams
//!
//! `GET /views/:id/events` carries one view's `ItemsAdded`, `ItemsChanged`
//! and `ItemsRemoved` batches. `GET /events` carries daemon-wide events.
//!
//! A view stream ends when the view closes. It also ends if the subscriber
//! lags behind the bus: a replica that missed batches cannot be repaired and
//! the client must resubscribe.

use super::peer_name;
use crate::error::{ApiError, ApiResult};
use crate::view::ViewState;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// GET /views/:id/events
pub async fn view_event_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::NotFound(format!("Unknown view: {}", id)))?;
    let view = state.core.view(id).await?;

    let mut rx = view.subscribe();
    let mut status = view.watch_status();
    let guard = peer_name(&headers).map(|peer| state.core.connect_peer(&peer));
    info!(view = %id, "SSE client subscribed");

    let stream = async_stream::stream! {
        // Held for the life of the stream
        let _guard = guard;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        let event_type = event.event_type();
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                debug!(view = %id, "SSE: {} ({})", event_type, event.len());
                                yield Ok(Event::default().event(event_type).data(json));
                            }
                            Err(e) => {
                                warn!(view = %id, "SSE: Failed to serialize {}: {}", event_type, e)
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            view = %id,
                            "SSE: Subscriber lagged by {} events, closing stream",
                            missed
                        );
                        break;
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = status.changed() => {
                    if changed.is_err() || status.borrow().state == ViewState::Closed {
                        debug!(view = %id, "SSE: View closed, ending stream");
                        break;
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("heartbeat")))
}

/// GET /events
pub async fn core_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.core.events().subscribe();
    let shutdown = state.core.shutdown_token().clone();
    info!("SSE client subscribed to core events");

    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().event(event_type).data(json)),
                        Err(e) => warn!("SSE: Failed to serialize {}: {}", event_type, e),
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("SSE: Core subscriber lagged by {} events", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("heartbeat"))
}
