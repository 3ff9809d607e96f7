//! services/api/src/web/sessions.rs
//!
//! Flashcard session endpoints. Sessions are built from the user's library,
//! kept in the in-memory registry and driven one card at a time. Playback of
//! the current card is best-effort and never fails a request.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use music_minds_core::domain::{
    FlashcardSession, FlashcardSessionState, SessionConfig, UserProfile,
};
use music_minds_core::session::{Advance, FlashcardCard, SessionError, SessionProgress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::library::{port_error, SongView};
use crate::web::state::{AppState, RegistryError};

/// Points credited to a song for each correct answer.
pub const POINTS_PER_CORRECT_ANSWER: i64 = 10;

//=========================================================================================
// Request/Response Types
//=========================================================================================

/// Optional overrides for the session mix. Omitted fields keep their defaults.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct CreateSessionRequest {
    pub target_count: Option<usize>,
    pub learning_pct: Option<f64>,
    pub to_learn_pct: Option<f64>,
    pub learned_pct: Option<f64>,
    pub min_songs_required: Option<usize>,
}

impl CreateSessionRequest {
    fn to_config(&self) -> Result<SessionConfig, SessionError> {
        let defaults = SessionConfig::default();
        SessionConfig::new(
            self.target_count.unwrap_or(defaults.target_count()),
            self.learning_pct.unwrap_or(defaults.learning_pct()),
            self.to_learn_pct.unwrap_or(defaults.to_learn_pct()),
            self.learned_pct.unwrap_or(defaults.learned_pct()),
            self.min_songs_required
                .unwrap_or(defaults.min_songs_required()),
        )
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnswerRequest {
    pub correct: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotBody {
    pub snapshot: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CardView {
    /// 1-based position in the queue.
    pub position: usize,
    pub total: usize,
    pub track_uri: String,
    /// Present only after the answer has been revealed.
    pub revealed: Option<SongView>,
}

impl From<FlashcardCard> for CardView {
    fn from(card: FlashcardCard) -> Self {
        Self {
            position: card.position,
            total: card.total,
            track_uri: card.track_uri,
            revealed: card.revealed.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressView {
    pub current_song_number: usize,
    pub total_songs: usize,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub skipped_count: u32,
    pub completion_percentage: f32,
    /// Correct answers over answered cards, 0 to 1.
    pub accuracy: f32,
}

impl From<SessionProgress> for ProgressView {
    fn from(progress: SessionProgress) -> Self {
        Self {
            current_song_number: progress.current_song_number,
            total_songs: progress.total_songs,
            correct_count: progress.correct_count,
            incorrect_count: progress.incorrect_count,
            skipped_count: progress.skipped_count,
            completion_percentage: progress.completion_percentage(),
            accuracy: progress.accuracy(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    /// `not_started`, `in_progress`, `paused`, `completed` or `cancelled`.
    pub state: String,
    pub card: Option<CardView>,
    pub progress: ProgressView,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&FlashcardSession> for SessionView {
    fn from(session: &FlashcardSession) -> Self {
        Self {
            id: session.id,
            state: session.state.as_str().to_string(),
            card: session.card().map(Into::into),
            progress: session.progress().into(),
            started_at: session.started_at,
            completed_at: session.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionResponse {
    pub session: SessionView,
    pub learning_count: usize,
    pub to_learn_count: usize,
    pub learned_count: usize,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn session_error(e: RegistryError) -> (StatusCode, String) {
    match e {
        RegistryError::NotFound(id) => (StatusCode::NOT_FOUND, format!("Session {} not found", id)),
        RegistryError::Conflict(id) => (
            StatusCode::CONFLICT,
            format!("Session {} is already in use", id),
        ),
        RegistryError::Session(e) => match e {
            SessionError::InsufficientLibrary {
                available,
                required,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!(
                    "Your library has {} songs. Add at least {} more to start a session.",
                    available,
                    required.saturating_sub(available)
                ),
            ),
            SessionError::InvalidTransition { .. } | SessionError::EmptyQueue => {
                (StatusCode::CONFLICT, e.to_string())
            }
            SessionError::InvalidConfig(_) | SessionError::InvalidSnapshot(_) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            SessionError::Storage(e) => port_error(e),
        },
    }
}

fn session_failed(e: SessionError) -> (StatusCode, String) {
    session_error(e.into())
}

/// Asks the player to start the current card's track.
async fn play_current(state: &AppState, session: &FlashcardSession) {
    let Some(card) = session.card() else {
        return;
    };
    let Some(token) = state.auth.valid_access_token().await else {
        debug!("No access token, skipping playback for session {}", session.id);
        return;
    };
    if let Err(e) = state.playback.play(&token, &card.track_uri).await {
        warn!("Playback of {} failed: {}", card.track_uri, e);
    }
}

async fn resume_playback(state: &AppState, session: &FlashcardSession) {
    let Some(token) = state.auth.valid_access_token().await else {
        debug!("No access token, skipping resume for session {}", session.id);
        return;
    };
    if let Err(e) = state.playback.resume(&token).await {
        warn!("Resuming playback failed: {}", e);
    }
}

async fn pause_playback(state: &AppState) {
    let Some(token) = state.auth.valid_access_token().await else {
        return;
    };
    if let Err(e) = state.playback.pause(&token).await {
        warn!("Pausing playback failed: {}", e);
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /sessions - Build a new flashcard session from the library
#[utoipa::path(
    post,
    path = "/sessions",
    request_body(content = CreateSessionRequest, description = "Mix overrides; an empty body keeps the defaults"),
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid configuration"),
        (status = 422, description = "Not enough songs in the library")
    )
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSessionResponse>), (StatusCode, String)> {
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)))?
    };
    let config = request.to_config().map_err(session_failed)?;

    let created = state
        .session_builder()
        .create_session(&user.id, config)
        .await
        .map_err(session_failed)?;

    let response = CreateSessionResponse {
        session: SessionView::from(&created.session),
        learning_count: created.learning_count,
        to_learn_count: created.to_learn_count,
        learned_count: created.learned_count,
    };
    state.sessions.insert(created.session).await;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /sessions/{id} - Current card and progress
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let session = state.sessions.get(&user.id, id).await.map_err(session_error)?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/start - Start or resume a session
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session in progress", body = SessionView),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session cannot be started")
    )
)]
pub async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let (resuming, session) = state
        .sessions
        .update(&user.id, id, |s| {
            let resuming = s.state == FlashcardSessionState::Paused;
            s.start(Utc::now()).map(|()| resuming)
        })
        .await
        .map_err(session_error)?;
    if resuming {
        resume_playback(&state, &session).await;
    } else {
        play_current(&state, &session).await;
    }
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/pause - Pause a running session
#[utoipa::path(
    post,
    path = "/sessions/{id}/pause",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session paused", body = SessionView),
        (status = 409, description = "Session is not in progress")
    )
)]
pub async fn pause_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let ((), session) = state
        .sessions
        .update(&user.id, id, |s| s.pause())
        .await
        .map_err(session_error)?;
    pause_playback(&state).await;
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/replay - Play the current card again from the start
#[utoipa::path(
    post,
    path = "/sessions/{id}/replay",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Track restarted", body = SessionView),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session is not in progress")
    )
)]
pub async fn replay_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let session = state.sessions.get(&user.id, id).await.map_err(session_error)?;
    session.replay_current().map_err(session_failed)?;
    if let Some(token) = state.auth.valid_access_token().await {
        if let Err(e) = state.playback.seek(&token, 0).await {
            warn!("Restarting playback failed: {}", e);
        }
    }
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/reveal - Reveal the current card's song
#[utoipa::path(
    post,
    path = "/sessions/{id}/reveal",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Card revealed", body = SessionView),
        (status = 409, description = "Session is not in progress")
    )
)]
pub async fn reveal_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let ((), session) = state
        .sessions
        .update(&user.id, id, |s| s.reveal_answer().map(|_| ()))
        .await
        .map_err(session_error)?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/answer - Record whether the user knew the song
#[utoipa::path(
    post,
    path = "/sessions/{id}/answer",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = SessionView),
        (status = 404, description = "Unknown session, or the song left the library"),
        (status = 409, description = "Already answered or not in progress")
    )
)]
pub async fn answer_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let correct = payload.correct;
    let points = if correct { POINTS_PER_CORRECT_ANSWER } else { 0 };
    let library = &state.library;
    let user_id = user.id.as_str();

    let session = state
        .sessions
        .record_answer(user_id, id, correct, move |song_id| async move {
            library
                .record_answer(user_id, song_id, correct, points)
                .await
                .inspect_err(|e| error!("Failed to save answer for song {}: {}", song_id, e))
        })
        .await
        .map_err(session_error)?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/next - Move to the next card
#[utoipa::path(
    post,
    path = "/sessions/{id}/next",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Next card, or the completed session", body = SessionView),
        (status = 409, description = "Session is not in progress")
    )
)]
pub async fn next_card_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let (advance, session) = state
        .sessions
        .update(&user.id, id, |s| s.advance(Utc::now()))
        .await
        .map_err(session_error)?;

    match advance {
        Advance::Next { .. } => play_current(&state, &session).await,
        Advance::Completed => {
            let progress = session.progress();
            info!(
                "Session {} completed: {} correct, {} incorrect, {} skipped",
                session.id, progress.correct_count, progress.incorrect_count, progress.skipped_count
            );
            pause_playback(&state).await;
        }
    }
    Ok(Json(SessionView::from(&session)))
}

/// POST /sessions/{id}/cancel - Abandon a session
#[utoipa::path(
    post,
    path = "/sessions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session cancelled and discarded", body = SessionView),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session already finished")
    )
)]
pub async fn cancel_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let ((), session) = state
        .sessions
        .update(&user.id, id, |s| s.cancel(Utc::now()))
        .await
        .map_err(session_error)?;
    state.sessions.remove(&user.id, id).await;
    pause_playback(&state).await;
    info!("Session {} cancelled", id);
    Ok(Json(SessionView::from(&session)))
}

/// GET /sessions/{id}/snapshot - Serialize a session for later restore
#[utoipa::path(
    get,
    path = "/sessions/{id}/snapshot",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session snapshot", body = SnapshotBody),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn snapshot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> Result<Json<SnapshotBody>, (StatusCode, String)> {
    let session = state.sessions.get(&user.id, id).await.map_err(session_error)?;
    let snapshot = session.snapshot().map_err(session_failed)?;
    Ok(Json(SnapshotBody { snapshot }))
}

/// POST /sessions/restore - Bring a snapshotted session back
#[utoipa::path(
    post,
    path = "/sessions/restore",
    request_body = SnapshotBody,
    responses(
        (status = 201, description = "Session restored", body = SessionView),
        (status = 400, description = "Malformed snapshot"),
        (status = 403, description = "Snapshot belongs to another user"),
        (status = 409, description = "Session id already in use")
    )
)]
pub async fn restore_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Json(payload): Json<SnapshotBody>,
) -> Result<(StatusCode, Json<SessionView>), (StatusCode, String)> {
    let session = FlashcardSession::restore(&payload.snapshot).map_err(session_failed)?;
    if session.user_id != user.id {
        warn!("User {} tried to restore a session of another user", user.id);
        return Err((
            StatusCode::FORBIDDEN,
            "Snapshot belongs to another user".to_string(),
        ));
    }

    let view = SessionView::from(&session);
    state
        .sessions
        .restore(session)
        .await
        .map_err(session_error)?;
    info!("Restored session {} for {}", view.id, user.id);
    Ok((StatusCode::CREATED, Json(view)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_uses_the_default_mix() {
        let config = CreateSessionRequest::default().to_config().unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn partial_overrides_are_validated() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{ "target_count": 20 }"#).unwrap();
        assert_eq!(request.to_config().unwrap().target_count(), 20);

        let request: CreateSessionRequest =
            serde_json::from_str(r#"{ "learning_pct": 0.9 }"#).unwrap();
        assert!(matches!(
            request.to_config(),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn insufficient_library_is_unprocessable_with_guidance() {
        let (status, message) = session_failed(SessionError::InsufficientLibrary {
            available: 1,
            required: 3,
        });
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(message.contains("Add at least 2 more"));
    }

    #[test]
    fn transition_errors_are_conflicts() {
        let (status, _) = session_failed(SessionError::InvalidTransition {
            from: "paused",
            action: "reveal",
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            session_error(RegistryError::NotFound(Uuid::new_v4())).0,
            StatusCode::NOT_FOUND
        );
    }
}
