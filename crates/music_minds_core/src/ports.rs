//! crates/music_minds_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    CategoryAvailability, LearningStatus, LibraryEntry, Song, TokenGrant, UserProfile,
    UserStatistics,
};
use async_trait::async_trait;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The user's song library and learning records.
#[async_trait]
pub trait LibraryService: Send + Sync {
    // --- Session planning ---
    async fn category_counts(&self, user_id: &str) -> PortResult<CategoryAvailability>;

    /// A uniform random sample without replacement of at most `limit` entries.
    async fn random_entries_by_status(
        &self,
        user_id: &str,
        status: LearningStatus,
        limit: usize,
    ) -> PortResult<Vec<LibraryEntry>>;

    // --- Library management ---
    async fn entries_by_status(
        &self,
        user_id: &str,
        status: LearningStatus,
    ) -> PortResult<Vec<LibraryEntry>>;

    /// Returns `false` when the song is already in the user's library.
    async fn add_song(&self, user_id: &str, song: &Song) -> PortResult<bool>;

    async fn is_in_library(&self, user_id: &str, spotify_id: &str) -> PortResult<bool>;

    async fn remove_song(&self, user_id: &str, song_id: Uuid) -> PortResult<()>;

    async fn update_status(
        &self,
        user_id: &str,
        song_id: Uuid,
        status: LearningStatus,
    ) -> PortResult<()>;

    // --- Quiz results ---
    async fn record_answer(
        &self,
        user_id: &str,
        song_id: Uuid,
        correct: bool,
        points: i64,
    ) -> PortResult<()>;

    async fn search(&self, user_id: &str, query: &str) -> PortResult<Vec<Song>>;

    async fn statistics(&self, user_id: &str) -> PortResult<UserStatistics>;
}

/// The OAuth token endpoint.
#[async_trait]
pub trait TokenExchangeService: Send + Sync {
    /// Trades an authorization code for an access + refresh token pair.
    async fn exchange_code(&self, code: &str) -> PortResult<TokenGrant>;

    async fn refresh(&self, refresh_token: &str) -> PortResult<TokenGrant>;
}

/// An encrypted key-value store for credentials.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get_string(&self, key: &str) -> PortResult<Option<String>>;
    async fn set_string(&self, key: &str, value: &str) -> PortResult<()>;
    async fn get_i64(&self, key: &str) -> PortResult<Option<i64>>;
    async fn set_i64(&self, key: &str, value: i64) -> PortResult<()>;
    async fn remove(&self, key: &str) -> PortResult<()>;
    async fn clear(&self) -> PortResult<()>;
}

/// The streaming service's identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The URL the user is sent to in order to grant access.
    fn authorization_url(&self, state: &str) -> String;

    async fn current_user(&self, access_token: &str) -> PortResult<UserProfile>;
}

#[async_trait]
pub trait TrackCatalog: Send + Sync {
    async fn search_tracks(
        &self,
        access_token: &str,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> PortResult<Vec<Song>>;
}

/// Remote playback control keyed by an opaque track URI.
#[async_trait]
pub trait PlaybackService: Send + Sync {
    async fn play(&self, access_token: &str, track_uri: &str) -> PortResult<()>;
    async fn pause(&self, access_token: &str) -> PortResult<()>;
    async fn resume(&self, access_token: &str) -> PortResult<()>;
    async fn seek(&self, access_token: &str, position_ms: u64) -> PortResult<()>;
}
