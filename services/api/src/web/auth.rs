//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for the Spotify authorization-code login,
//! status polling, retry and logout.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use music_minds_core::auth::{AuthFlowError, AuthorizationRequest, AuthorizationResponse, ProviderError};
use music_minds_core::domain::{AuthState, UserProfile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
    pub country: Option<String>,
    pub product: Option<String>,
}

impl From<UserProfile> for UserView {
    fn from(user: UserProfile) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            email: user.email,
            profile_image_url: user.profile_image_url,
            country: user.country,
            product: user.product,
        }
    }
}

/// The current authentication state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthStatusResponse {
    /// One of `unauthenticated`, `authenticating`, `authenticated`,
    /// `auth_error`, `token_expired`, `refreshing_token`.
    pub status: String,
    pub user: Option<UserView>,
    pub message: Option<String>,
    pub can_retry: Option<bool>,
}

impl From<AuthState> for AuthStatusResponse {
    fn from(state: AuthState) -> Self {
        let status = state.name().to_string();
        let (user, message, can_retry) = match state {
            AuthState::Authenticated { user } => (Some(user.into()), None, None),
            AuthState::AuthError { message, can_retry } => (None, Some(message), Some(can_retry)),
            AuthState::Unauthenticated
            | AuthState::Authenticating
            | AuthState::TokenExpired
            | AuthState::RefreshingToken => (None, None, None),
        };
        Self {
            status,
            user,
            message,
            can_retry,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Where to send the user to grant access.
    pub authorize_url: String,
    pub state: String,
}

impl From<AuthorizationRequest> for LoginResponse {
    fn from(request: AuthorizationRequest) -> Self {
        Self {
            authorize_url: request.url,
            state: request.state,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// OAuth error code, e.g. `access_denied`.
    pub error: Option<String>,
}

fn flow_error(e: AuthFlowError) -> (StatusCode, String) {
    let status = match &e {
        AuthFlowError::Failed { .. } | AuthFlowError::Cancelled => StatusCode::UNAUTHORIZED,
        AuthFlowError::StateMismatch => StatusCode::BAD_REQUEST,
        AuthFlowError::InvalidTransition { .. } => StatusCode::CONFLICT,
        AuthFlowError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /auth/login - Start a Spotify login
#[utoipa::path(
    get,
    path = "/auth/login",
    responses(
        (status = 200, description = "Authorization URL to open", body = LoginResponse),
        (status = 409, description = "Already signed in or refreshing")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let request = state.auth.begin_login().map_err(flow_error)?;
    Ok(Json(request.into()))
}

/// GET /auth/callback - The OAuth redirect target
#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses(
        (status = 200, description = "Signed in", body = AuthStatusResponse),
        (status = 400, description = "State did not match the pending login"),
        (status = 401, description = "Login failed or was refused"),
        (status = 409, description = "No login in progress")
    )
)]
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AuthStatusResponse>, (StatusCode, String)> {
    let response = match (params.error, params.code) {
        (Some(error), _) => {
            warn!("Authorization callback returned error '{}'", error);
            AuthorizationResponse::Denied(ProviderError::from_callback_error(&error))
        }
        (None, Some(code)) => AuthorizationResponse::Code {
            code,
            state: params.state,
        },
        (None, None) => AuthorizationResponse::Cancelled,
    };

    let user = state
        .auth
        .complete_login(response)
        .await
        .map_err(flow_error)?;
    info!("Login completed for {}", user.id);
    Ok(Json(state.auth.state().into()))
}

/// GET /auth/status - Current authentication state
#[utoipa::path(
    get,
    path = "/auth/status",
    responses((status = 200, description = "Current state", body = AuthStatusResponse))
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<AuthStatusResponse> {
    Json(state.auth.state().into())
}

/// POST /auth/retry - Start over after a failed login
#[utoipa::path(
    post,
    path = "/auth/retry",
    responses(
        (status = 200, description = "A fresh authorization URL", body = LoginResponse),
        (status = 409, description = "No failed login to retry")
    )
)]
pub async fn retry_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let request = state.auth.retry_login().map_err(flow_error)?;
    Ok(Json(request.into()))
}

/// POST /auth/logout - Forget all stored credentials
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.auth.logout().await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_mirrors_the_state() {
        let error: AuthStatusResponse = AuthState::AuthError {
            message: "Token exchange failed".to_string(),
            can_retry: true,
        }
        .into();
        assert_eq!(error.status, "auth_error");
        assert_eq!(error.can_retry, Some(true));
        assert!(error.user.is_none());

        let refreshing: AuthStatusResponse = AuthState::RefreshingToken.into();
        assert_eq!(refreshing.status, "refreshing_token");
        assert!(refreshing.message.is_none());
    }

    #[test]
    fn flow_errors_map_to_http_statuses() {
        assert_eq!(flow_error(AuthFlowError::StateMismatch).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            flow_error(AuthFlowError::InvalidTransition {
                from: "authenticated",
                action: "begin login"
            })
            .0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            flow_error(AuthFlowError::Failed {
                message: "x".to_string(),
                can_retry: true
            })
            .0,
            StatusCode::UNAUTHORIZED
        );
    }
}
