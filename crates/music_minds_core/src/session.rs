//! crates/music_minds_core/src/session.rs
//!
//! Flashcard session lifecycle: configuration validation, state transitions,
//! the metadata-hiding card view and whole-value save/restore.

use crate::domain::{
    FlashcardSession, FlashcardSessionState, LibraryEntry, SessionConfig, Song,
};
use crate::ports::PortError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

const PERCENTAGE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The library holds fewer songs than a session needs.
    #[error("Need at least {required} songs in library, found {available}")]
    InsufficientLibrary { available: usize, required: usize },

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot {action} a session that is {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Session has no songs to play")]
    EmptyQueue,

    #[error("Invalid session snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Library storage error: {0}")]
    Storage(#[from] PortError),
}

impl SessionConfig {
    pub fn new(
        target_count: usize,
        learning_pct: f64,
        to_learn_pct: f64,
        learned_pct: f64,
        min_songs_required: usize,
    ) -> Result<Self, SessionError> {
        for (name, pct) in [
            ("learning", learning_pct),
            ("to_learn", to_learn_pct),
            ("learned", learned_pct),
        ] {
            if !(0.0..=1.0).contains(&pct) {
                return Err(SessionError::InvalidConfig(format!(
                    "{} percentage {} is outside 0..=1",
                    name, pct
                )));
            }
        }

        let sum = learning_pct + to_learn_pct + learned_pct;
        if (sum - 1.0).abs() > PERCENTAGE_TOLERANCE {
            return Err(SessionError::InvalidConfig(format!(
                "percentages must sum to 1.0, got {}",
                sum
            )));
        }

        if target_count < min_songs_required {
            return Err(SessionError::InvalidConfig(format!(
                "target count {} is below the minimum of {}",
                target_count, min_songs_required
            )));
        }

        Ok(Self {
            target_count,
            learning_pct,
            to_learn_pct,
            learned_pct,
            min_songs_required,
        })
    }
}

/// What the player sees for the current card. Metadata stays hidden until revealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlashcardCard {
    /// 1-based position in the queue.
    pub position: usize,
    pub total: usize,
    pub track_uri: String,
    pub revealed: Option<Song>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionProgress {
    pub current_song_number: usize,
    pub total_songs: usize,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub skipped_count: u32,
}

impl SessionProgress {
    pub fn completion_percentage(&self) -> f32 {
        if self.total_songs == 0 {
            return 0.0;
        }
        self.current_song_number as f32 / self.total_songs as f32 * 100.0
    }

    pub fn accuracy(&self) -> f32 {
        let answered = self.correct_count + self.incorrect_count;
        if answered == 0 {
            return 0.0;
        }
        self.correct_count as f32 / answered as f32
    }
}

/// The result of moving past the current card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next { index: usize },
    Completed,
}

impl FlashcardSession {
    pub fn new(user_id: impl Into<String>, song_queue: Vec<LibraryEntry>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            song_queue,
            current_index: 0,
            state: FlashcardSessionState::NotStarted,
            started_at: None,
            completed_at: None,
            config,
            correct_answers: 0,
            incorrect_answers: 0,
            skipped: 0,
            answer_revealed: false,
            answer_recorded: false,
        }
    }

    pub fn total_songs(&self) -> usize {
        self.song_queue.len()
    }

    pub fn current_entry(&self) -> Option<&LibraryEntry> {
        self.song_queue.get(self.current_index)
    }

    pub fn songs_remaining(&self) -> usize {
        self.total_songs().saturating_sub(self.current_index)
    }

    pub fn is_completed(&self) -> bool {
        self.state == FlashcardSessionState::Completed || self.current_index >= self.total_songs()
    }

    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            current_song_number: self.current_index,
            total_songs: self.total_songs(),
            correct_count: self.correct_answers,
            incorrect_count: self.incorrect_answers,
            skipped_count: self.skipped,
        }
    }

    pub fn card(&self) -> Option<FlashcardCard> {
        let entry = self.current_entry()?;
        Some(FlashcardCard {
            position: self.current_index + 1,
            total: self.total_songs(),
            track_uri: entry.song.track_uri(),
            revealed: self.answer_revealed.then(|| entry.song.clone()),
        })
    }

    /// Starts a fresh session or resumes a paused one.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        match self.state {
            FlashcardSessionState::NotStarted | FlashcardSessionState::Paused => {}
            _ => return Err(self.invalid("start")),
        }
        if self.song_queue.is_empty() {
            return Err(SessionError::EmptyQueue);
        }
        self.state = FlashcardSessionState::InProgress;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.require_in_progress("pause")?;
        self.state = FlashcardSessionState::Paused;
        Ok(())
    }

    /// The card whose track should be played again from the top.
    pub fn replay_current(&self) -> Result<&LibraryEntry, SessionError> {
        self.require_in_progress("replay")?;
        self.current_entry().ok_or(SessionError::EmptyQueue)
    }

    pub fn reveal_answer(&mut self) -> Result<&Song, SessionError> {
        self.require_in_progress("reveal")?;
        self.answer_revealed = true;
        self.current_entry()
            .map(|entry| &entry.song)
            .ok_or(SessionError::EmptyQueue)
    }

    /// The card an answer would be credited to right now.
    pub fn answerable_entry(&self) -> Result<&LibraryEntry, SessionError> {
        self.require_in_progress("answer")?;
        if self.answer_recorded {
            return Err(SessionError::InvalidTransition {
                from: "already answered",
                action: "answer",
            });
        }
        self.current_entry().ok_or(SessionError::EmptyQueue)
    }

    /// Self-reported answer for the current card. One answer per card.
    pub fn record_answer(&mut self, correct: bool) -> Result<&LibraryEntry, SessionError> {
        self.answerable_entry()?;
        if correct {
            self.correct_answers += 1;
        } else {
            self.incorrect_answers += 1;
        }
        self.answer_recorded = true;
        self.current_entry().ok_or(SessionError::EmptyQueue)
    }

    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Advance, SessionError> {
        self.require_in_progress("advance")?;
        if !self.answer_recorded {
            self.skipped += 1;
        }
        self.answer_revealed = false;
        self.answer_recorded = false;

        let next_index = self.current_index + 1;
        if next_index >= self.total_songs() {
            self.current_index = self.total_songs();
            self.state = FlashcardSessionState::Completed;
            self.completed_at = Some(now);
            return Ok(Advance::Completed);
        }
        self.current_index = next_index;
        Ok(Advance::Next { index: next_index })
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        match self.state {
            FlashcardSessionState::NotStarted
            | FlashcardSessionState::InProgress
            | FlashcardSessionState::Paused => {
                self.state = FlashcardSessionState::Cancelled;
                self.completed_at = Some(now);
                Ok(())
            }
            FlashcardSessionState::Completed | FlashcardSessionState::Cancelled => {
                Err(self.invalid("cancel"))
            }
        }
    }

    pub fn snapshot(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::InvalidSnapshot(e.to_string()))
    }

    pub fn restore(snapshot: &str) -> Result<Self, SessionError> {
        let session: FlashcardSession = serde_json::from_str(snapshot)
            .map_err(|e| SessionError::InvalidSnapshot(e.to_string()))?;
        if session.current_index > session.song_queue.len() {
            return Err(SessionError::InvalidSnapshot(format!(
                "index {} is past a queue of {}",
                session.current_index,
                session.song_queue.len()
            )));
        }
        let c = &session.config;
        SessionConfig::new(
            c.target_count,
            c.learning_pct,
            c.to_learn_pct,
            c.learned_pct,
            c.min_songs_required,
        )
        .map_err(|e| SessionError::InvalidSnapshot(e.to_string()))?;
        Ok(session)
    }

    fn require_in_progress(&self, action: &'static str) -> Result<(), SessionError> {
        if self.state == FlashcardSessionState::InProgress {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state.as_str(),
            action,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{LearningStatus, LibraryItem};

    pub(crate) fn entry(spotify_id: &str, status: LearningStatus) -> LibraryEntry {
        let id = Uuid::new_v4();
        LibraryEntry {
            song: Song {
                id,
                spotify_id: spotify_id.to_string(),
                title: format!("Title {}", spotify_id),
                artist: "Artist".to_string(),
                album: "Album".to_string(),
                release_year: 1999,
                duration_ms: 180_000,
                genre: None,
                preview_url: None,
                image_url: None,
                trivia: None,
                date_added: Utc::now(),
            },
            item: LibraryItem {
                song_id: id,
                learning_status: status,
                correct_count: 0,
                incorrect_count: 0,
                last_attempt_at: None,
                points_earned: 0,
                status_changed_at: Utc::now(),
                is_favorite: false,
            },
        }
    }

    fn session_of(n: usize) -> FlashcardSession {
        let queue = (0..n)
            .map(|i| entry(&format!("t{}", i), LearningStatus::Learning))
            .collect();
        FlashcardSession::new("user-1", queue, SessionConfig::default())
    }

    #[test]
    fn config_rejects_percentages_that_do_not_sum_to_one() {
        let err = SessionConfig::new(10, 0.5, 0.2, 0.1, 3).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn config_rejects_target_below_minimum() {
        assert!(SessionConfig::new(2, 0.7, 0.2, 0.1, 3).is_err());
        assert!(SessionConfig::new(3, 0.7, 0.2, 0.1, 3).is_ok());
    }

    #[test]
    fn start_requires_songs() {
        let mut session = session_of(0);
        assert!(matches!(session.start(Utc::now()), Err(SessionError::EmptyQueue)));
    }

    #[test]
    fn walk_through_session_until_completed() {
        let mut session = session_of(2);
        let t0 = Utc::now();
        session.start(t0).unwrap();
        assert_eq!(session.state, FlashcardSessionState::InProgress);
        assert_eq!(session.started_at, Some(t0));

        session.record_answer(true).unwrap();
        assert_eq!(session.advance(Utc::now()).unwrap(), Advance::Next { index: 1 });

        // second card left unanswered
        assert_eq!(session.advance(Utc::now()).unwrap(), Advance::Completed);
        assert_eq!(session.state, FlashcardSessionState::Completed);
        assert_eq!(session.current_index, 2);
        assert!(session.completed_at.is_some());
        assert!(session.is_completed());
        assert_eq!(session.songs_remaining(), 0);

        let progress = session.progress();
        assert_eq!(progress.correct_count, 1);
        assert_eq!(progress.skipped_count, 1);
        assert_eq!(progress.completion_percentage(), 100.0);
        assert_eq!(progress.accuracy(), 1.0);
    }

    #[test]
    fn card_hides_metadata_until_revealed() {
        let mut session = session_of(3);
        session.start(Utc::now()).unwrap();

        let card = session.card().unwrap();
        assert_eq!(card.position, 1);
        assert_eq!(card.total, 3);
        assert_eq!(card.track_uri, "spotify:track:t0");
        assert!(card.revealed.is_none());

        let title = session.reveal_answer().unwrap().title.clone();
        assert_eq!(session.card().unwrap().revealed.unwrap().title, title);

        session.advance(Utc::now()).unwrap();
        assert!(session.card().unwrap().revealed.is_none());
    }

    #[test]
    fn answer_is_accepted_once_per_card() {
        let mut session = session_of(2);
        session.start(Utc::now()).unwrap();
        session.record_answer(false).unwrap();
        assert!(matches!(
            session.record_answer(true),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert_eq!(session.incorrect_answers, 1);
    }

    #[test]
    fn pause_and_resume() {
        let mut session = session_of(2);
        assert!(session.pause().is_err());
        let started = Utc::now();
        session.start(started).unwrap();
        session.pause().unwrap();
        assert!(session.advance(Utc::now()).is_err());
        session.start(Utc::now()).unwrap();
        assert_eq!(session.started_at, Some(started));
    }

    #[test]
    fn only_a_running_session_can_replay_or_take_answers() {
        let mut session = session_of(2);
        assert!(session.replay_current().is_err());
        assert!(session.answerable_entry().is_err());

        session.start(Utc::now()).unwrap();
        let current = session.current_entry().map(|e| e.song.id);
        assert_eq!(session.replay_current().ok().map(|e| e.song.id), current);
        assert_eq!(session.answerable_entry().ok().map(|e| e.song.id), current);

        session.record_answer(false).unwrap();
        assert!(session.replay_current().is_ok());
        assert!(matches!(
            session.answerable_entry(),
            Err(SessionError::InvalidTransition { from: "already answered", .. })
        ));
    }

    #[test]
    fn cancel_is_terminal() {
        let mut session = session_of(2);
        session.start(Utc::now()).unwrap();
        session.cancel(Utc::now()).unwrap();
        assert_eq!(session.state, FlashcardSessionState::Cancelled);
        assert!(session.start(Utc::now()).is_err());
        assert!(session.cancel(Utc::now()).is_err());
    }

    #[test]
    fn snapshot_restores_the_whole_value() {
        let mut session = session_of(3);
        session.start(Utc::now()).unwrap();
        session.advance(Utc::now()).unwrap();

        let restored = FlashcardSession::restore(&session.snapshot().unwrap()).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn restore_rejects_index_past_queue() {
        let mut session = session_of(1);
        session.current_index = 5;
        let json = serde_json::to_string(&session).unwrap();
        assert!(matches!(
            FlashcardSession::restore(&json),
            Err(SessionError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn restore_rejects_an_invalid_mix() {
        let session = session_of(2);
        let mut value = serde_json::to_value(&session).unwrap();
        value["config"]["learning_pct"] = serde_json::json!(0.9);

        let err = FlashcardSession::restore(&value.to_string()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidSnapshot(_)));
        assert!(err.to_string().contains("sum to 1.0"));

        value["config"]["learning_pct"] = serde_json::json!(0.7);
        value["config"]["target_count"] = serde_json::json!(1);
        assert!(matches!(
            FlashcardSession::restore(&value.to_string()),
            Err(SessionError::InvalidSnapshot(_))
        ));
    }
}
