//! Subscriber endpoints: the read side of the broadcast channels.
//!
//! Two transports over the same [`BroadcastHub`] channel: Server-Sent Events
//! (event name = event `type`, data = the JSON event) and a WebSocket that
//! sends one JSON text frame per event. Subscribers only ever see events
//! published after they attach.

use crate::state::AppState;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{
        Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{SinkExt, Stream};
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{error, info, instrument, warn};

/// `GET /channels/{channel}/events`
pub async fn channel_events(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.hub.subscribe(&channel);
    info!(%channel, "SSE subscriber attached.");

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) => match Event::default().event(event.kind()).json_data(event.as_ref()) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(e) => {
                error!(%channel, error = %e, "Failed to encode relay event for SSE.");
                None
            }
        },
        Err(lagged) => {
            warn!(
                %channel,
                error = %lagged,
                "SSE subscriber fell behind; events were dropped for it."
            );
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /channels/{channel}/ws`
pub async fn channel_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| forward_events(socket, state, channel))
}

#[instrument(name = "subscriber", skip_all, fields(%channel))]
async fn forward_events(socket: WebSocket, state: Arc<AppState>, channel: String) {
    let mut rx = state.hub.subscribe(&channel);
    let (mut sink, mut incoming) = futures_util::StreamExt::split(socket);
    info!("WebSocket subscriber attached.");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    let text = match serde_json::to_string(event.as_ref()) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(error = %e, "Failed to encode relay event.");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket subscriber fell behind; events were dropped for it.");
                }
                Err(RecvError::Closed) => break,
            },
            frame = incoming.next() => match frame {
                // Subscribers are read-only; anything but a close is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.close().await;
    info!("WebSocket subscriber detached.");
}
