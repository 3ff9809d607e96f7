//! services/api/src/web/ws_handler.rs
//!
//! Streams authentication state changes to a WebSocket client. The current
//! state is sent on connect; every later change follows as it happens.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use music_minds_core::domain::AuthState;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The handler for upgrading `/auth/events` requests to WebSocket connections.
pub async fn auth_events_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}

fn state_message(state: AuthState) -> ServerMessage {
    ServerMessage::AuthState(state.into())
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("Auth event stream connected");
    let (mut sender, mut receiver) = socket.split();
    let mut changes = app_state.auth.subscribe();

    let current = changes.borrow_and_update().clone();
    if send_message(&mut sender, &state_message(current)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("Auth service dropped, closing event stream");
                    break;
                }
                let state = changes.borrow_and_update().clone();
                if send_message(&mut sender, &state_message(state)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let reply = match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::GetStatus) => state_message(app_state.auth.state()),
                            Err(e) => {
                                warn!("Unrecognised client message: {}", e);
                                ServerMessage::Error {
                                    message: format!("Unrecognised message: {}", e),
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                };
                if send_message(&mut sender, &reply).await.is_err() {
                    break;
                }
            }
        }
    }
    info!("Auth event stream closed");
}
