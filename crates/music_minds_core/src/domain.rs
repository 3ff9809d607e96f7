//! crates/music_minds_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format
//! beyond the serde derives needed to save and restore a session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Library
//=========================================================================================

/// The coarse learning bucket a library item sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningStatus {
    ToLearn,
    Learning,
    Learned,
}

impl LearningStatus {
    pub const ALL: [LearningStatus; 3] = [
        LearningStatus::ToLearn,
        LearningStatus::Learning,
        LearningStatus::Learned,
    ];

    /// The stored representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStatus::ToLearn => "TO_LEARN",
            LearningStatus::Learning => "LEARNING",
            LearningStatus::Learned => "LEARNED",
        }
    }
}

impl fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TO_LEARN" => Ok(LearningStatus::ToLearn),
            "LEARNING" => Ok(LearningStatus::Learning),
            "LEARNED" => Ok(LearningStatus::Learned),
            other => Err(format!("unknown learning status '{}'", other)),
        }
    }
}

/// A track known to the application, independent of any user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
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

impl Song {
    /// The opaque playback URI for this track.
    pub fn track_uri(&self) -> String {
        format!("spotify:track:{}", self.spotify_id)
    }
}

/// A user's learning record for one song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub song_id: Uuid,
    pub learning_status: LearningStatus,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub points_earned: i64,
    pub status_changed_at: DateTime<Utc>,
    pub is_favorite: bool,
}

/// A song together with the user's learning record for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub song: Song,
    pub item: LibraryItem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserStatistics {
    pub total_songs: u32,
    pub to_learn_songs: u32,
    pub learning_songs: u32,
    pub learned_songs: u32,
    pub total_points: i64,
}

//=========================================================================================
// Sessions
//=========================================================================================

/// Tuning for how a practice session is drawn from the library.
///
/// Construct through [`SessionConfig::new`] (or `Default`) so the
/// percentage and size invariants hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub(crate) target_count: usize,
    pub(crate) learning_pct: f64,
    pub(crate) to_learn_pct: f64,
    pub(crate) learned_pct: f64,
    pub(crate) min_songs_required: usize,
}

impl SessionConfig {
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn learning_pct(&self) -> f64 {
        self.learning_pct
    }

    pub fn to_learn_pct(&self) -> f64 {
        self.to_learn_pct
    }

    pub fn learned_pct(&self) -> f64 {
        self.learned_pct
    }

    pub fn min_songs_required(&self) -> usize {
        self.min_songs_required
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_count: 10,
            learning_pct: 0.7,
            to_learn_pct: 0.2,
            learned_pct: 0.1,
            min_songs_required: 3,
        }
    }
}

/// How many songs each category can currently supply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAvailability {
    pub learning_available: usize,
    pub to_learn_available: usize,
    pub learned_available: usize,
}

impl CategoryAvailability {
    pub fn total(&self) -> usize {
        self.learning_available + self.to_learn_available + self.learned_available
    }

    pub fn for_status(&self, status: LearningStatus) -> usize {
        match status {
            LearningStatus::ToLearn => self.to_learn_available,
            LearningStatus::Learning => self.learning_available,
            LearningStatus::Learned => self.learned_available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashcardSessionState {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl FlashcardSessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashcardSessionState::NotStarted => "not_started",
            FlashcardSessionState::InProgress => "in_progress",
            FlashcardSessionState::Paused => "paused",
            FlashcardSessionState::Completed => "completed",
            FlashcardSessionState::Cancelled => "cancelled",
        }
    }
}

/// One bounded run of flashcard quizzing over a sampled song queue.
///
/// Transitions live in `crate::session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardSession {
    pub id: Uuid,
    pub user_id: String,
    pub song_queue: Vec<LibraryEntry>,
    pub current_index: usize,
    pub state: FlashcardSessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: SessionConfig,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub skipped: u32,
    pub answer_revealed: bool,
    pub answer_recorded: bool,
}

//=========================================================================================
// Authentication
//=========================================================================================

/// The identity the streaming service reports for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
    pub country: Option<String>,
    pub product: Option<String>,
}

/// A parsed token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub scopes: Vec<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    pub refresh_token: Option<String>,
}

/// The persisted credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl AuthTokens {
    /// Builds the credential set from a grant issued at `issued_at`.
    ///
    /// Token endpoints may omit the refresh token on refresh; in that case the
    /// previous one stays valid and is carried over.
    pub fn from_grant(
        grant: TokenGrant,
        issued_at: DateTime<Utc>,
        previous_refresh: Option<String>,
    ) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh),
            expires_at: issued_at + Duration::seconds(grant.expires_in),
            scopes: grant.scopes,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now >= self.expires_at - buffer
    }
}

/// Credential lifecycle state. Exactly one value is current at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated { user: UserProfile },
    AuthError { message: String, can_retry: bool },
    TokenExpired,
    RefreshingToken,
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated { .. } => "authenticated",
            AuthState::AuthError { .. } => "auth_error",
            AuthState::TokenExpired => "token_expired",
            AuthState::RefreshingToken => "refreshing_token",
        }
    }

    /// False only while a background refresh owns the state.
    pub fn is_settled(&self) -> bool {
        !matches!(self, AuthState::RefreshingToken)
    }
}
