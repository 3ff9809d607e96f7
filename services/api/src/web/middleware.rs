//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use music_minds_core::domain::AuthState;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::web::state::AppState;

/// Middleware that lets requests through only while a user is signed in.
///
/// A token refresh in progress is waited out (bounded by the HTTP timeout).
/// On success the signed-in `UserProfile` is inserted into request extensions
/// for handlers to use; otherwise the request gets 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let settled = tokio::time::timeout(state.config.http_timeout, state.auth.wait_until_settled())
        .await
        .map_err(|_| {
            warn!("Timed out waiting for token refresh");
            StatusCode::UNAUTHORIZED
        })?;

    match settled {
        AuthState::Authenticated { user } => {
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        other => {
            debug!("Rejecting request while {}", other.name());
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
