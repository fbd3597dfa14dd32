//! WebSocket signaling endpoints
//!
//! Each connection gets one reader (this task) that feeds text frames to a
//! [`Session`] in arrival order, and one writer task that drains the
//! participant's outbound queue into the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use radio_sfu::{Endpoint, Session, SignalSender};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::http::AppState;

/// Signaling messages are small; SDP with many candidates stays well under this
const MAX_SIGNAL_SIZE: usize = 256 * 1024;

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Room topic; absent means the empty-string room
    #[serde(default)]
    pub topic: String,
}

pub async fn speaker_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade(ws, state, query.topic, Endpoint::Speaker)
}

pub async fn listener_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade(ws, state, query.topic, Endpoint::Listener)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    topic: String,
    endpoint: Endpoint,
) -> impl IntoResponse {
    ws.max_message_size(MAX_SIGNAL_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, topic, endpoint))
}

async fn handle_socket(socket: WebSocket, state: AppState, topic: String, endpoint: Endpoint) {
    let room = state.registry.get_or_create(topic.as_str());
    let capacity = state.registry.config().signal_queue_capacity;
    let (sender, mut outbound) = SignalSender::channel(capacity);

    let mut session = match Session::join(Arc::clone(&room), endpoint, sender).await {
        Ok(session) => session,
        Err(e) => {
            warn!(room_id = %room.id(), endpoint = %endpoint, error = %e, "Rejected WebSocket connection");
            return;
        }
    };
    let participant_id = session.participant_id().clone();
    info!(
        room_id = %room.id(),
        participant_id = %participant_id,
        endpoint = %endpoint,
        "WebSocket connection established"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();

    let writer_id = participant_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(signal) = outbound.recv().await {
            let text = match serde_json::to_string(&signal) {
                Ok(text) => text,
                Err(e) => {
                    warn!(participant_id = %writer_id, error = %e, "Failed to encode signal");
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                debug!(participant_id = %writer_id, error = %e, "WebSocket write failed");
                break;
            }
        }
    });

    while let Some(message) = ws_stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(participant_id = %participant_id, error = %e, "WebSocket read failed");
                break;
            }
        };

        if let Err(e) = session.handle_text(text.as_str()).await {
            if e.is_fatal() {
                warn!(participant_id = %participant_id, error = %e, "Closing session");
                break;
            }
            warn!(participant_id = %participant_id, error = %e, "Signal handling failed");
        }
    }

    session.leave().await;
    // ICE callbacks may still hold queue handles, so the writer is stopped explicitly
    writer.abort();

    info!(
        room_id = %room.id(),
        participant_id = %participant_id,
        "WebSocket connection closed"
    );
}
