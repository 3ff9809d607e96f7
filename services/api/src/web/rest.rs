//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification and the health check.

use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::web::{auth, library, sessions};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::login_handler,
        auth::callback_handler,
        auth::status_handler,
        auth::retry_handler,
        auth::logout_handler,
        library::list_library_handler,
        library::add_song_handler,
        library::remove_song_handler,
        library::update_status_handler,
        library::search_library_handler,
        library::statistics_handler,
        library::catalog_search_handler,
        sessions::create_session_handler,
        sessions::get_session_handler,
        sessions::start_session_handler,
        sessions::pause_session_handler,
        sessions::replay_handler,
        sessions::reveal_handler,
        sessions::answer_handler,
        sessions::next_card_handler,
        sessions::cancel_session_handler,
        sessions::snapshot_handler,
        sessions::restore_session_handler,
    ),
    components(
        schemas(
            HealthResponse,
            auth::UserView,
            auth::AuthStatusResponse,
            auth::LoginResponse,
            library::SongView,
            library::LibraryEntryView,
            library::StatisticsView,
            library::AddSongRequest,
            library::AddSongResponse,
            library::UpdateStatusRequest,
            library::CatalogTrackView,
            sessions::CreateSessionRequest,
            sessions::CreateSessionResponse,
            sessions::SessionView,
            sessions::CardView,
            sessions::ProgressView,
            sessions::AnswerRequest,
            sessions::SnapshotBody,
        )
    ),
    tags(
        (name = "Music Minds API", description = "Song library, flashcard sessions and Spotify sign-in.")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health - Liveness check
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
