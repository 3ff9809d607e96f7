//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol for the `/auth/events` stream.

use serde::{Deserialize, Serialize};

use crate::web::auth::AuthStatusResponse;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for the current state to be sent again.
    GetStatus,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The authentication state, sent on connect and after every change.
    AuthState(AuthStatusResponse),

    /// The client sent something the server does not understand.
    Error { message: String },
}
