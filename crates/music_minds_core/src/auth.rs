//! crates/music_minds_core/src/auth.rs
//!
//! The credential lifecycle: startup evaluation of persisted tokens, the
//! authorization-code login flow, silent refresh and logout.
//!
//! All state changes go through a single `watch` channel. At most one
//! refresh runs at a time, and once `shutdown` is called no in-flight
//! exchange or refresh may write state or storage.
//!
//! Credential writes and the transition that follows them happen under the
//! `commit` lock. Logout takes the same lock, so a login or refresh either
//! lands completely before a logout or is discarded after it.

use crate::domain::{AuthState, AuthTokens, UserProfile};
use crate::ports::{IdentityProvider, TokenExchangeService};
use crate::token_store::TokenStore;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;
const LOGIN_STATE_LEN: usize = 32;

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFlowError {
    #[error("{message}")]
    Failed { message: String, can_retry: bool },

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Authorization state does not match the pending login")]
    StateMismatch,

    #[error("Login was cancelled")]
    Cancelled,

    #[error("Authentication service is shutting down")]
    ShuttingDown,
}

/// Failures reported by the identity provider's login UI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("The user did not authorize the application")]
    UserNotAuthorized,
    #[error("Could not reach the streaming service")]
    Disconnected,
    #[error("The application is not registered with the streaming service")]
    AppNotFound,
    #[error("Authorization failed: {0}")]
    Other(String),
}

impl ProviderError {
    /// Maps an OAuth `error` callback parameter.
    pub fn from_callback_error(code: &str) -> Self {
        match code {
            "access_denied" => ProviderError::UserNotAuthorized,
            "temporarily_unavailable" | "server_error" => ProviderError::Disconnected,
            "invalid_client" | "unauthorized_client" => ProviderError::AppNotFound,
            other => ProviderError::Other(other.to_string()),
        }
    }
}

//=========================================================================================
// Login Flow Types
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    /// Anti-forgery value the provider must echo back.
    pub state: String,
}

/// What the identity provider hands back after the login UI closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResponse {
    Code { code: String, state: Option<String> },
    Denied(ProviderError),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSettings {
    /// How long before expiry a refresh is started.
    pub refresh_buffer: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS),
        }
    }
}

//=========================================================================================
// Startup Evaluation
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    /// No tokens or no user profile.
    Missing,
    Valid { user: UserProfile },
    /// Expired or inside the refresh buffer, with a refresh token to use.
    NeedsRefresh {
        user: UserProfile,
        refresh_token: String,
        expired: bool,
    },
    ExpiredWithoutRefresh,
}

/// Decides what persisted credentials mean at `now`.
pub fn evaluate_credentials(
    tokens: Option<&AuthTokens>,
    user: Option<&UserProfile>,
    now: DateTime<Utc>,
    refresh_buffer: Duration,
) -> CredentialStatus {
    let (Some(tokens), Some(user)) = (tokens, user) else {
        return CredentialStatus::Missing;
    };

    let expired = tokens.is_expired(now);
    if !expired && !tokens.needs_refresh(now, refresh_buffer) {
        return CredentialStatus::Valid { user: user.clone() };
    }

    match (&tokens.refresh_token, expired) {
        (Some(refresh_token), _) => CredentialStatus::NeedsRefresh {
            user: user.clone(),
            refresh_token: refresh_token.clone(),
            expired,
        },
        // Still usable until it actually expires.
        (None, false) => CredentialStatus::Valid { user: user.clone() },
        (None, true) => CredentialStatus::ExpiredWithoutRefresh,
    }
}

//=========================================================================================
// Auth Service
//=========================================================================================

struct AuthInner {
    tokens: TokenStore,
    exchange: Arc<dyn TokenExchangeService>,
    identity: Arc<dyn IdentityProvider>,
    settings: AuthSettings,
    state_tx: watch::Sender<AuthState>,
    pending_login: Mutex<Option<String>>,
    refreshing: AtomicBool,
    /// Bumped on logout so late results from an earlier sign-in are dropped.
    epoch: AtomicU64,
    commit: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Owns the current `AuthState`. Clones share the same state.
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<AuthInner>,
}

/// Clears the refresh flag however the refresh task ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AuthService {
    pub fn new(
        tokens: TokenStore,
        exchange: Arc<dyn TokenExchangeService>,
        identity: Arc<dyn IdentityProvider>,
        settings: AuthSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            inner: Arc::new(AuthInner {
                tokens,
                exchange,
                identity,
                settings,
                state_tx,
                pending_login: Mutex::new(None),
                refreshing: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                commit: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // --- Observation ---

    pub fn state(&self) -> AuthState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        match self.state() {
            AuthState::Authenticated { user } => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), AuthState::Authenticated { .. })
    }

    /// Waits for any in-flight refresh to finish and returns the state it
    /// settled on. Returns immediately after shutdown.
    pub async fn wait_until_settled(&self) -> AuthState {
        let mut rx = self.subscribe();
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => self.state(),
            settled = rx.wait_for(AuthState::is_settled) => match settled {
                Ok(state) => state.clone(),
                Err(_) => self.state(),
            },
        }
    }

    // --- Startup ---

    /// Loads persisted credentials and moves to the state they imply.
    pub async fn check_authentication_status(&self) -> AuthState {
        let tokens = self.inner.tokens.load_tokens().await;
        let user = self.inner.tokens.load_user().await;

        match evaluate_credentials(
            tokens.as_ref(),
            user.as_ref(),
            Utc::now(),
            self.inner.settings.refresh_buffer,
        ) {
            CredentialStatus::Missing => {
                debug!("No stored authentication found");
                self.transition(AuthState::Unauthenticated);
            }
            CredentialStatus::Valid { user } => {
                info!("Restored session for user {}", user.id);
                self.transition(AuthState::Authenticated { user });
            }
            CredentialStatus::NeedsRefresh {
                refresh_token,
                expired,
                ..
            } => {
                debug!("Stored tokens need refresh (expired: {})", expired);
                self.spawn_refresh(refresh_token);
            }
            CredentialStatus::ExpiredWithoutRefresh => {
                info!("Stored tokens expired and cannot be refreshed");
                self.sign_out().await;
            }
        }

        self.state()
    }

    // --- Login ---

    /// Starts a login and returns where to send the user.
    pub fn begin_login(&self) -> Result<AuthorizationRequest, AuthFlowError> {
        let current = self.state();
        match current {
            AuthState::Unauthenticated
            | AuthState::Authenticating
            | AuthState::TokenExpired
            | AuthState::AuthError { .. } => {}
            other => {
                return Err(AuthFlowError::InvalidTransition {
                    from: other.name(),
                    action: "begin login",
                })
            }
        }

        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(LOGIN_STATE_LEN)
            .map(char::from)
            .collect();
        *self.lock_pending() = Some(state.clone());

        self.transition(AuthState::Authenticating);
        Ok(AuthorizationRequest {
            url: self.inner.identity.authorization_url(&state),
            state,
        })
    }

    /// Finishes a login started with [`AuthService::begin_login`].
    ///
    /// Every failure is also published as `AuthState::AuthError`.
    pub async fn complete_login(
        &self,
        response: AuthorizationResponse,
    ) -> Result<UserProfile, AuthFlowError> {
        let current = self.state();
        if !matches!(current, AuthState::Authenticating) {
            return Err(AuthFlowError::InvalidTransition {
                from: current.name(),
                action: "complete login",
            });
        }
        let expected_state = self.lock_pending().take();
        let epoch = self.inner.epoch.load(Ordering::Acquire);

        let code = match response {
            AuthorizationResponse::Code { code, state } => {
                if state != expected_state {
                    warn!("Authorization callback carried an unexpected state");
                    self.publish_error("Login request could not be verified".to_string());
                    return Err(AuthFlowError::StateMismatch);
                }
                code
            }
            AuthorizationResponse::Denied(reason) => {
                warn!("Identity provider refused login: {}", reason);
                return Err(self.fail_login(reason.to_string()));
            }
            AuthorizationResponse::Cancelled => {
                info!("User cancelled login");
                self.publish_error("Login was cancelled".to_string());
                return Err(AuthFlowError::Cancelled);
            }
        };

        let grant = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(AuthFlowError::ShuttingDown),
            grant = self.inner.exchange.exchange_code(&code) => grant,
        };
        let grant = grant.map_err(|e| {
            error!("Token exchange failed: {}", e);
            self.fail_login(format!("Token exchange failed: {}", e))
        })?;
        let tokens = AuthTokens::from_grant(grant, Utc::now(), None);

        let user = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(AuthFlowError::ShuttingDown),
            user = self.inner.identity.current_user(&tokens.access_token) => user,
        };
        let user = user.map_err(|e| {
            error!("Failed to load user profile: {}", e);
            self.fail_login(format!("Failed to load user profile: {}", e))
        })?;

        let _commit = self.inner.commit.lock().await;
        if self.inner.shutdown.is_cancelled() {
            return Err(AuthFlowError::ShuttingDown);
        }
        if self.inner.epoch.load(Ordering::Acquire) != epoch {
            debug!("Discarding login result after logout");
            return Err(AuthFlowError::Cancelled);
        }

        let persisted = match self.inner.tokens.save_tokens(&tokens).await {
            Ok(()) => self.inner.tokens.save_user(&user).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            error!("Failed to save authentication tokens: {}", e);
            if let Err(e) = self.inner.tokens.clear_all().await {
                error!("Failed to clear partial credentials: {}", e);
            }
            return Err(self.fail_login("Failed to save authentication tokens".to_string()));
        }

        info!("User {} signed in", user.id);
        self.transition(AuthState::Authenticated { user: user.clone() });
        Ok(user)
    }

    /// Resets a failed login and starts a fresh one.
    pub fn retry_login(&self) -> Result<AuthorizationRequest, AuthFlowError> {
        let current = self.state();
        if !matches!(current, AuthState::AuthError { .. }) {
            return Err(AuthFlowError::InvalidTransition {
                from: current.name(),
                action: "retry login",
            });
        }
        debug!("Retrying authentication");
        self.transition(AuthState::Unauthenticated);
        self.begin_login()
    }

    // --- Tokens ---

    /// The access token to call the streaming API with, if one is usable now.
    ///
    /// An expired token is never returned. When it can be refreshed a
    /// background refresh starts and the caller should watch the state for
    /// the outcome. A token inside the refresh buffer is still returned while
    /// the refresh runs.
    pub async fn valid_access_token(&self) -> Option<String> {
        let tokens = self.inner.tokens.load_tokens().await?;
        let now = Utc::now();

        if !tokens.is_expired(now) {
            if tokens.needs_refresh(now, self.inner.settings.refresh_buffer) {
                if let Some(refresh_token) = tokens.refresh_token.clone() {
                    self.spawn_refresh(refresh_token);
                }
            }
            return Some(tokens.access_token);
        }

        match tokens.refresh_token {
            Some(refresh_token) => {
                self.spawn_refresh(refresh_token);
            }
            None => {
                info!("Access token expired without a refresh token");
                self.sign_out().await;
            }
        }
        None
    }

    pub async fn logout(&self) {
        info!("Logging out user");
        let _commit = self.inner.commit.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.lock_pending().take();
        self.sign_out().await;
    }

    /// Stops all in-flight work. Results that arrive afterwards are dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    fn transition(&self, next: AuthState) {
        if self.inner.shutdown.is_cancelled() {
            debug!("Ignoring transition to {} after shutdown", next.name());
            return;
        }
        let to = next.name();
        let previous = self.inner.state_tx.send_replace(next);
        debug!(from = previous.name(), to, "Auth state changed");
    }

    fn publish_error(&self, message: String) {
        self.transition(AuthState::AuthError {
            message,
            can_retry: true,
        });
    }

    fn fail_login(&self, message: String) -> AuthFlowError {
        self.publish_error(message.clone());
        AuthFlowError::Failed {
            message,
            can_retry: true,
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.inner
            .pending_login
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn sign_out(&self) {
        if let Err(e) = self.inner.tokens.clear_all().await {
            error!("Failed to clear stored credentials: {}", e);
        }
        self.transition(AuthState::Unauthenticated);
    }

    /// Starts a refresh unless one is already running.
    fn spawn_refresh(&self, refresh_token: String) {
        if self.inner.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Token refresh already in flight");
            return;
        }
        self.transition(AuthState::RefreshingToken);

        let service = self.clone();
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        tokio::spawn(async move {
            let _guard = RefreshGuard(&service.inner.refreshing);
            service.run_refresh(refresh_token, epoch).await;
        });
    }

    async fn run_refresh(&self, refresh_token: String, epoch: u64) {
        let result = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => {
                debug!("Token refresh abandoned on shutdown");
                return;
            }
            result = self.inner.exchange.refresh(&refresh_token) => result,
        };

        let _commit = self.inner.commit.lock().await;
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        if self.inner.epoch.load(Ordering::Acquire) != epoch {
            debug!("Discarding refresh result after logout");
            return;
        }

        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                warn!("Token refresh failed, re-login required: {}", e);
                self.sign_out().await;
                return;
            }
        };

        let Some(user) = self.inner.tokens.load_user().await else {
            warn!("No stored user after token refresh");
            self.sign_out().await;
            return;
        };

        let tokens = AuthTokens::from_grant(grant, Utc::now(), Some(refresh_token));
        if let Err(e) = self.inner.tokens.save_tokens(&tokens).await {
            error!("Failed to save refreshed tokens: {}", e);
            self.sign_out().await;
            return;
        }

        debug!("Token refresh succeeded");
        self.transition(AuthState::Authenticated { user });
    }
}
