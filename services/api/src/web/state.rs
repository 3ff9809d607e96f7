//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of live
//! flashcard sessions.

use crate::config::Config;
use music_minds_core::auth::AuthService;
use music_minds_core::domain::FlashcardSession;
use music_minds_core::ports::{LibraryService, PlaybackService, PortResult, TrackCatalog};
use music_minds_core::session::SessionError;
use music_minds_core::session_builder::SessionBuilder;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub library: Arc<dyn LibraryService>,
    pub catalog: Arc<dyn TrackCatalog>,
    pub playback: Arc<dyn PlaybackService>,
    pub auth: AuthService,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn session_builder(&self) -> SessionBuilder {
        SessionBuilder::new(self.library.clone())
    }
}

//=========================================================================================
// SessionRegistry (Live Flashcard Sessions)
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    NotFound(Uuid),
    #[error("Session {0} belongs to another user")]
    Conflict(Uuid),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// In-memory flashcard sessions keyed by id. A session is only visible to
/// the user who owns it, and each user has at most one.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, FlashcardSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session in place of any session its owner already has.
    pub async fn insert(&self, session: FlashcardSession) {
        let mut sessions = self.sessions.lock().await;
        Self::replace_owned(&mut sessions, session);
    }

    /// Puts a restored session back, refusing to replace another user's session.
    pub async fn restore(&self, session: FlashcardSession) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(&session.id)
            .is_some_and(|s| s.user_id != session.user_id)
        {
            return Err(RegistryError::Conflict(session.id));
        }
        Self::replace_owned(&mut sessions, session);
        Ok(())
    }

    fn replace_owned(sessions: &mut HashMap<Uuid, FlashcardSession>, session: FlashcardSession) {
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != session.user_id);
        if sessions.len() < before {
            debug!("Replaced the previous session of {}", session.user_id);
        }
        sessions.insert(session.id, session);
    }

    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<FlashcardSession, RegistryError> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .filter(|s| s.user_id == user_id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Applies `f` to the session and returns its result with the updated session.
    pub async fn update<T>(
        &self,
        user_id: &str,
        id: Uuid,
        f: impl FnOnce(&mut FlashcardSession) -> Result<T, SessionError>,
    ) -> Result<(T, FlashcardSession), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .filter(|s| s.user_id == user_id)
            .ok_or(RegistryError::NotFound(id))?;
        let value = f(session)?;
        Ok((value, session.clone()))
    }

    /// Records an answer on the current card once `persist` has stored it.
    ///
    /// `persist` gets the id of the song being answered. The registry stays
    /// locked until it returns, so a card is credited at most once and a
    /// failed write leaves the session untouched.
    pub async fn record_answer<F, Fut>(
        &self,
        user_id: &str,
        id: Uuid,
        correct: bool,
        persist: F,
    ) -> Result<FlashcardSession, RegistryError>
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = PortResult<()>>,
    {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .filter(|s| s.user_id == user_id)
            .ok_or(RegistryError::NotFound(id))?;
        let song_id = session.answerable_entry()?.song.id;
        persist(song_id).await.map_err(SessionError::Storage)?;
        session.record_answer(correct)?;
        Ok(session.clone())
    }

    pub async fn remove(&self, user_id: &str, id: Uuid) -> Option<FlashcardSession> {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(&id).is_some_and(|s| s.user_id == user_id) {
            sessions.remove(&id)
        } else {
            None
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
