//! services/api/src/web/library.rs
//!
//! Handlers for the signed-in user's song library and the streaming catalog.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use music_minds_core::domain::{LearningStatus, LibraryEntry, Song, UserProfile, UserStatistics};
use music_minds_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::web::state::AppState;

const DEFAULT_CATALOG_LIMIT: u32 = 20;
const MAX_CATALOG_LIMIT: u32 = 50;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SongView {
    pub id: Uuid,
    pub spotify_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub release_year: i32,
    pub duration_ms: i64,
    pub genre: Option<String>,
    pub preview_url: Option<String>,
    pub image_url: Option<String>,
    pub trivia: Option<String>,
    pub date_added: DateTime<Utc>,
}

impl From<Song> for SongView {
    fn from(song: Song) -> Self {
        Self {
            id: song.id,
            spotify_id: song.spotify_id,
            title: song.title,
            artist: song.artist,
            album: song.album,
            release_year: song.release_year,
            duration_ms: song.duration_ms,
            genre: song.genre,
            preview_url: song.preview_url,
            image_url: song.image_url,
            trivia: song.trivia,
            date_added: song.date_added,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LibraryEntryView {
    pub song: SongView,
    /// `TO_LEARN`, `LEARNING` or `LEARNED`.
    pub learning_status: String,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub points_earned: i64,
    pub status_changed_at: DateTime<Utc>,
    pub is_favorite: bool,
}

impl From<LibraryEntry> for LibraryEntryView {
    fn from(entry: LibraryEntry) -> Self {
        let item = entry.item;
        Self {
            song: entry.song.into(),
            learning_status: item.learning_status.to_string(),
            correct_count: item.correct_count,
            incorrect_count: item.incorrect_count,
            last_attempt_at: item.last_attempt_at,
            points_earned: item.points_earned,
            status_changed_at: item.status_changed_at,
            is_favorite: item.is_favorite,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatisticsView {
    pub total_songs: u32,
    pub to_learn_songs: u32,
    pub learning_songs: u32,
    pub learned_songs: u32,
    pub total_points: i64,
}

impl From<UserStatistics> for StatisticsView {
    fn from(stats: UserStatistics) -> Self {
        Self {
            total_songs: stats.total_songs,
            to_learn_songs: stats.to_learn_songs,
            learning_songs: stats.learning_songs,
            learned_songs: stats.learned_songs,
            total_points: stats.total_points,
        }
    }
}

/// A track to add to the library, usually taken from a catalog search result.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddSongRequest {
    pub spotify_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub release_year: i32,
    pub duration_ms: i64,
    pub genre: Option<String>,
    pub preview_url: Option<String>,
    pub image_url: Option<String>,
    pub trivia: Option<String>,
}

impl AddSongRequest {
    fn into_song(self, now: DateTime<Utc>) -> Song {
        Song {
            id: Uuid::new_v4(),
            spotify_id: self.spotify_id,
            title: self.title,
            artist: self.artist,
            album: self.album,
            release_year: self.release_year,
            duration_ms: self.duration_ms,
            genre: self.genre,
            preview_url: self.preview_url,
            image_url: self.image_url,
            trivia: self.trivia,
            date_added: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddSongResponse {
    /// False when the song was already in the library.
    pub added: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// `TO_LEARN`, `LEARNING` or `LEARNED`.
    pub status: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LibraryQuery {
    /// Restrict to one learning status.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CatalogQuery {
    pub q: String,
    /// 1 to 50, default 20.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CatalogTrackView {
    pub song: SongView,
    pub in_library: bool,
}

/// Maps a port failure onto an HTTP status.
pub(crate) fn port_error(e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        PortError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            "Spotify rejected the credentials".to_string(),
        ),
        PortError::Transport(msg) => {
            error!("Upstream failure: {}", msg);
            (
                StatusCode::BAD_GATEWAY,
                "Could not reach Spotify".to_string(),
            )
        }
        PortError::Unexpected(msg) => {
            error!("Unexpected failure: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

fn parse_status(raw: &str) -> Result<LearningStatus, (StatusCode, String)> {
    raw.parse().map_err(|e: String| (StatusCode::BAD_REQUEST, e))
}

//=========================================================================================
// Library Handlers
//=========================================================================================

/// GET /library - List library entries, newest status change first
#[utoipa::path(
    get,
    path = "/library",
    params(LibraryQuery),
    responses(
        (status = 200, description = "Library entries", body = [LibraryEntryView]),
        (status = 400, description = "Unknown status"),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_library_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Query(query): Query<LibraryQuery>,
) -> Result<Json<Vec<LibraryEntryView>>, (StatusCode, String)> {
    let statuses = match query.status.as_deref() {
        Some(raw) => vec![parse_status(raw)?],
        None => LearningStatus::ALL.to_vec(),
    };

    let mut entries = Vec::new();
    for status in statuses {
        entries.extend(
            state
                .library
                .entries_by_status(&user.id, status)
                .await
                .map_err(port_error)?,
        );
    }
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// POST /library - Add a song to the library as `TO_LEARN`
#[utoipa::path(
    post,
    path = "/library",
    request_body = AddSongRequest,
    responses(
        (status = 201, description = "Song added", body = AddSongResponse),
        (status = 200, description = "Song was already in the library", body = AddSongResponse),
        (status = 400, description = "Missing track id or title")
    )
)]
pub async fn add_song_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Json(payload): Json<AddSongRequest>,
) -> Result<(StatusCode, Json<AddSongResponse>), (StatusCode, String)> {
    if payload.spotify_id.trim().is_empty() || payload.title.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "spotify_id and title are required".to_string(),
        ));
    }

    let song = payload.into_song(Utc::now());
    let added = state
        .library
        .add_song(&user.id, &song)
        .await
        .map_err(port_error)?;
    if added {
        info!("Added '{}' to the library of {}", song.title, user.id);
        Ok((StatusCode::CREATED, Json(AddSongResponse { added })))
    } else {
        Ok((StatusCode::OK, Json(AddSongResponse { added })))
    }
}

/// DELETE /library/{song_id} - Remove a song from the library
#[utoipa::path(
    delete,
    path = "/library/{song_id}",
    params(("song_id" = Uuid, Path, description = "Library song id")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Not in the library")
    )
)]
pub async fn remove_song_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(song_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .library
        .remove_song(&user.id, song_id)
        .await
        .map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /library/{song_id}/status - Move a song to another learning status
#[utoipa::path(
    put,
    path = "/library/{song_id}/status",
    params(("song_id" = Uuid, Path, description = "Library song id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 204, description = "Status changed"),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Not in the library")
    )
)]
pub async fn update_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Path(song_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let status = parse_status(&payload.status)?;
    state
        .library
        .update_status(&user.id, song_id, status)
        .await
        .map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /library/search - Case-insensitive search over title and artist
#[utoipa::path(
    get,
    path = "/library/search",
    params(SearchQuery),
    responses((status = 200, description = "Matching songs", body = [SongView]))
)]
pub async fn search_library_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SongView>>, (StatusCode, String)> {
    let songs = state
        .library
        .search(&user.id, query.q.trim())
        .await
        .map_err(port_error)?;
    Ok(Json(songs.into_iter().map(Into::into).collect()))
}

/// GET /library/statistics - Per-status counts and total points
#[utoipa::path(
    get,
    path = "/library/statistics",
    responses((status = 200, description = "Library statistics", body = StatisticsView))
)]
pub async fn statistics_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<StatisticsView>, (StatusCode, String)> {
    let stats = state
        .library
        .statistics(&user.id)
        .await
        .map_err(port_error)?;
    Ok(Json(stats.into()))
}

//=========================================================================================
// Catalog Handlers
//=========================================================================================

/// GET /catalog/search - Search Spotify tracks, flagging those already in the library
#[utoipa::path(
    get,
    path = "/catalog/search",
    params(CatalogQuery),
    responses(
        (status = 200, description = "Matching tracks", body = [CatalogTrackView]),
        (status = 401, description = "No usable Spotify token"),
        (status = 502, description = "Spotify unreachable")
    )
)]
pub async fn catalog_search_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserProfile>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<CatalogTrackView>>, (StatusCode, String)> {
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let token = state.auth.valid_access_token().await.ok_or((
        StatusCode::UNAUTHORIZED,
        "No valid Spotify access token".to_string(),
    ))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CATALOG_LIMIT)
        .clamp(1, MAX_CATALOG_LIMIT);
    let songs = state
        .catalog
        .search_tracks(&token, q, limit, query.offset.unwrap_or(0))
        .await
        .map_err(port_error)?;

    let mut results = Vec::with_capacity(songs.len());
    for song in songs {
        let in_library = state
            .library
            .is_in_library(&user.id, &song.spotify_id)
            .await
            .map_err(port_error)?;
        results.push(CatalogTrackView {
            song: song.into(),
            in_library,
        });
    }
    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(parse_status("learning").unwrap(), LearningStatus::Learning);
        assert_eq!(parse_status("TO_LEARN").unwrap(), LearningStatus::ToLearn);
        assert_eq!(parse_status("mastered").unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn port_errors_map_to_http_statuses() {
        assert_eq!(
            port_error(PortError::NotFound("x".to_string())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(port_error(PortError::Unauthorized).0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            port_error(PortError::Transport("down".to_string())).0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn added_songs_get_a_fresh_id_and_timestamp() {
        let now = Utc::now();
        let song = AddSongRequest {
            spotify_id: "sp1".to_string(),
            title: "Harvest Moon".to_string(),
            artist: "Neil Young".to_string(),
            album: "Harvest Moon".to_string(),
            release_year: 1992,
            duration_ms: 303000,
            genre: None,
            preview_url: None,
            image_url: None,
            trivia: None,
        }
        .into_song(now);
        assert_eq!(song.date_added, now);
        assert_eq!(song.track_uri(), "spotify:track:sp1");
    }
}
