//! WebSocket push endpoint.
//!
//! Clients open `/ws/{client_id}` with any stable non-empty token. Frames
//! flow server to client as JSON envelopes; the only client messages are
//! `{"type":"ping"}` (answered with a pong frame) and
//! `{"type":"subscribe","task_id":"…"}` (restricts the stream to one task).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;

use super::{DisconnectReason, Frame, PushSink};
use crate::AppState;

/// WebSocket routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{client_id}", get(ws_handler))
}

async fn ws_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if client_id.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
        .into_response()
}

/// Write half of one WebSocket, adapted onto the manager's sink seam.
struct WebSocketSink {
    tx: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl PushSink for WebSocketSink {
    async fn send(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let text = serde_json::to_string(frame)?;
        self.tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| anyhow::anyhow!("websocket write failed: {error}"))
    }

    async fn close(&mut self) {
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

/// Handle one WebSocket connection for its lifetime.
///
/// Outbound frames are delivered by the connection manager's drain task;
/// this function owns only the read half.
async fn handle_socket(socket: WebSocket, state: AppState, client_id: String) {
    let (tx, mut rx) = socket.split();
    state
        .connections
        .accept(&client_id, Box::new(WebSocketSink { tx }));

    loop {
        match rx.next().await {
            Some(Ok(Message::Text(text))) => {
                state.connections.touch(&client_id);
                handle_client_message(&state, &client_id, &text);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {
                state.connections.touch(&client_id);
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
        }
    }

    state
        .connections
        .disconnect(&client_id, DisconnectReason::Explicit);
}

/// Dispatch one inbound client message.
fn handle_client_message(state: &AppState, client_id: &str, text: &str) {
    let Ok(message) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::debug!(client_id = %client_id, "ignoring malformed client message");
        return;
    };

    match message["type"].as_str() {
        Some("ping") => {
            let _ = state.connections.send(client_id, Frame::pong());
        }
        Some("subscribe") => {
            let task_id = message["task_id"].as_str().map(String::from);
            state.connections.set_task_filter(client_id, task_id);
        }
        _ => {
            tracing::debug!(client_id = %client_id, "ignoring unknown client message type");
        }
    }
}
