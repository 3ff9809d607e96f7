//! crates/music_minds_core/src/session_builder.rs
//!
//! Draws a practice session's song queue from a user's library.
//!
//! Each learning category gets a share of the target count (truncated, so the
//! shares can add up to less than the target). Unmet demand for `Learning`
//! songs is backfilled from `ToLearn`. The picked songs are shuffled together so
//! queue position never gives a song's category away.

use crate::domain::{
    CategoryAvailability, FlashcardSession, LearningStatus, LibraryEntry, SessionConfig,
};
use crate::ports::LibraryService;
use crate::session::SessionError;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-category draw sizes after clamping to availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPlan {
    pub learning: usize,
    pub to_learn: usize,
    pub learned: usize,
    /// Learning demand the library could not meet, moved onto `to_learn`.
    pub learning_backfill: usize,
}

impl CategoryPlan {
    pub fn total(&self) -> usize {
        self.learning + self.to_learn + self.learned
    }

    fn for_status(&self, status: LearningStatus) -> usize {
        match status {
            LearningStatus::Learning => self.learning,
            LearningStatus::ToLearn => self.to_learn,
            LearningStatus::Learned => self.learned,
        }
    }
}

/// The shuffled queue plus the realized per-category counts.
#[derive(Debug, Clone)]
pub struct SongSelection {
    pub queue: Vec<LibraryEntry>,
    pub learning_count: usize,
    pub to_learn_count: usize,
    pub learned_count: usize,
    pub availability: CategoryAvailability,
}

/// A fresh session and how its queue was drawn.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session: FlashcardSession,
    pub learning_count: usize,
    pub to_learn_count: usize,
    pub learned_count: usize,
    pub availability: CategoryAvailability,
}

fn ideal_share(target_count: usize, pct: f64) -> usize {
    (target_count as f64 * pct).floor() as usize
}

/// Computes how many songs to draw from each category.
pub fn plan_targets(config: &SessionConfig, availability: &CategoryAvailability) -> CategoryPlan {
    let ideal_learning = ideal_share(config.target_count(), config.learning_pct());
    let ideal_to_learn = ideal_share(config.target_count(), config.to_learn_pct());
    let ideal_learned = ideal_share(config.target_count(), config.learned_pct());

    let learning = ideal_learning.min(availability.learning_available);
    let learning_backfill = ideal_learning - learning;
    let to_learn = (ideal_to_learn + learning_backfill).min(availability.to_learn_available);
    let learned = ideal_learned.min(availability.learned_available);

    CategoryPlan {
        learning,
        to_learn,
        learned,
        learning_backfill,
    }
}

pub struct SessionBuilder {
    library: Arc<dyn LibraryService>,
}

impl SessionBuilder {
    pub fn new(library: Arc<dyn LibraryService>) -> Self {
        Self { library }
    }

    pub async fn select_songs(
        &self,
        user_id: &str,
        config: &SessionConfig,
    ) -> Result<SongSelection, SessionError> {
        let availability = self.library.category_counts(user_id).await?;
        debug!(?availability, "Category availability for {}", user_id);

        if availability.total() < config.min_songs_required() {
            warn!(
                "Insufficient songs for {}: {} < {}",
                user_id,
                availability.total(),
                config.min_songs_required()
            );
            return Err(SessionError::InsufficientLibrary {
                available: availability.total(),
                required: config.min_songs_required(),
            });
        }

        let plan = plan_targets(config, &availability);
        debug!(?plan, "Planned category draws");

        let mut queue = Vec::with_capacity(plan.total());
        let mut realized = [0usize; 3];
        for (slot, status) in [
            LearningStatus::Learning,
            LearningStatus::ToLearn,
            LearningStatus::Learned,
        ]
        .into_iter()
        .enumerate()
        {
            let wanted = plan.for_status(status);
            if wanted == 0 {
                continue;
            }
            let mut drawn = self
                .library
                .random_entries_by_status(user_id, status, wanted)
                .await?;
            drawn.truncate(wanted);
            realized[slot] = drawn.len();
            queue.extend(drawn);
        }

        queue.shuffle(&mut rand::thread_rng());

        let [learning_count, to_learn_count, learned_count] = realized;
        info!(
            "Selected {} songs for {} (learning {}, to learn {} incl. {} backfill, learned {})",
            queue.len(),
            user_id,
            learning_count,
            to_learn_count,
            plan.learning_backfill,
            learned_count
        );

        Ok(SongSelection {
            queue,
            learning_count,
            to_learn_count,
            learned_count,
            availability,
        })
    }

    /// Draws a queue and wraps it in a session that has not started yet.
    pub async fn create_session(
        &self,
        user_id: &str,
        config: SessionConfig,
    ) -> Result<NewSession, SessionError> {
        let selection = self.select_songs(user_id, &config).await?;
        let session = FlashcardSession::new(user_id, selection.queue, config);
        info!(
            "Created flashcard session {} with {} songs for {}",
            session.id,
            session.total_songs(),
            user_id
        );
        Ok(NewSession {
            session,
            learning_count: selection.learning_count,
            to_learn_count: selection.to_learn_count,
            learned_count: selection.learned_count,
            availability: selection.availability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Song, UserStatistics};
    use crate::ports::{PortError, PortResult};
    use crate::session::tests::entry;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use uuid::Uuid;

    /// Library fake holding `n` entries per status, returned in insertion order.
    struct FakeLibrary {
        entries: HashMap<LearningStatus, Vec<LibraryEntry>>,
    }

    impl FakeLibrary {
        fn with_counts(learning: usize, to_learn: usize, learned: usize) -> Self {
            let mut entries = HashMap::new();
            for (status, n) in [
                (LearningStatus::Learning, learning),
                (LearningStatus::ToLearn, to_learn),
                (LearningStatus::Learned, learned),
            ] {
                let list = (0..n)
                    .map(|i| entry(&format!("{}-{}", status, i), status))
                    .collect();
                entries.insert(status, list);
            }
            Self { entries }
        }

        fn count(&self, status: LearningStatus) -> usize {
            self.entries.get(&status).map_or(0, Vec::len)
        }
    }

    #[async_trait]
    impl LibraryService for FakeLibrary {
        async fn category_counts(&self, _user_id: &str) -> PortResult<CategoryAvailability> {
            Ok(CategoryAvailability {
                learning_available: self.count(LearningStatus::Learning),
                to_learn_available: self.count(LearningStatus::ToLearn),
                learned_available: self.count(LearningStatus::Learned),
            })
        }

        async fn random_entries_by_status(
            &self,
            _user_id: &str,
            status: LearningStatus,
            limit: usize,
        ) -> PortResult<Vec<LibraryEntry>> {
            Ok(self.entries[&status].iter().take(limit).cloned().collect())
        }

        async fn entries_by_status(
            &self,
            _user_id: &str,
            status: LearningStatus,
        ) -> PortResult<Vec<LibraryEntry>> {
            Ok(self.entries[&status].clone())
        }

        async fn add_song(&self, _user_id: &str, _song: &Song) -> PortResult<bool> {
            Err(PortError::Unexpected("read-only fake".into()))
        }

        async fn is_in_library(&self, _user_id: &str, _spotify_id: &str) -> PortResult<bool> {
            Ok(false)
        }

        async fn remove_song(&self, _user_id: &str, _song_id: Uuid) -> PortResult<()> {
            Ok(())
        }

        async fn update_status(
            &self,
            _user_id: &str,
            _song_id: Uuid,
            _status: LearningStatus,
        ) -> PortResult<()> {
            Ok(())
        }

        async fn record_answer(
            &self,
            _user_id: &str,
            _song_id: Uuid,
            _correct: bool,
            _points: i64,
        ) -> PortResult<()> {
            Ok(())
        }

        async fn search(&self, _user_id: &str, _query: &str) -> PortResult<Vec<Song>> {
            Ok(Vec::new())
        }

        async fn statistics(&self, _user_id: &str) -> PortResult<UserStatistics> {
            Ok(UserStatistics::default())
        }
    }

    fn builder(learning: usize, to_learn: usize, learned: usize) -> SessionBuilder {
        SessionBuilder::new(Arc::new(FakeLibrary::with_counts(learning, to_learn, learned)))
    }

    fn count_status(queue: &[LibraryEntry], status: LearningStatus) -> usize {
        queue
            .iter()
            .filter(|e| e.item.learning_status == status)
            .count()
    }

    #[test]
    fn plan_backfills_learning_shortfall_into_to_learn() {
        let availability = CategoryAvailability {
            learning_available: 3,
            to_learn_available: 10,
            learned_available: 10,
        };
        let plan = plan_targets(&SessionConfig::default(), &availability);
        assert_eq!(
            plan,
            CategoryPlan {
                learning: 3,
                to_learn: 6,
                learned: 1,
                learning_backfill: 4,
            }
        );
    }

    #[test]
    fn plan_clamps_backfill_to_to_learn_availability() {
        let availability = CategoryAvailability {
            learning_available: 1,
            to_learn_available: 4,
            learned_available: 0,
        };
        let plan = plan_targets(&SessionConfig::default(), &availability);
        assert_eq!(plan.learning, 1);
        assert_eq!(plan.learning_backfill, 6);
        assert_eq!(plan.to_learn, 4);
        assert_eq!(plan.learned, 0);
    }

    #[test]
    fn plan_truncation_can_underfill_target() {
        // 7 * 0.7 = 4.9, 7 * 0.2 = 1.4, 7 * 0.1 = 0.7
        let config = SessionConfig::new(7, 0.7, 0.2, 0.1, 3).unwrap();
        let availability = CategoryAvailability {
            learning_available: 20,
            to_learn_available: 20,
            learned_available: 20,
        };
        let plan = plan_targets(&config, &availability);
        assert_eq!((plan.learning, plan.to_learn, plan.learned), (4, 1, 0));
        assert_eq!(plan.total(), 5);
    }

    #[test]
    fn plan_never_exceeds_availability_or_target() {
        let config = SessionConfig::default();
        for learning in 0..12 {
            for to_learn in 0..12 {
                for learned in 0..4 {
                    let availability = CategoryAvailability {
                        learning_available: learning,
                        to_learn_available: to_learn,
                        learned_available: learned,
                    };
                    let plan = plan_targets(&config, &availability);
                    assert!(plan.learning <= learning);
                    assert!(plan.to_learn <= to_learn);
                    assert!(plan.learned <= learned);
                    assert!(plan.total() <= config.target_count());
                }
            }
        }
    }

    #[tokio::test]
    async fn builds_the_documented_scenario() {
        let selection = builder(3, 10, 10)
            .select_songs("user-1", &SessionConfig::default())
            .await
            .unwrap();

        assert_eq!(selection.learning_count, 3);
        assert_eq!(selection.to_learn_count, 6);
        assert_eq!(selection.learned_count, 1);
        assert_eq!(selection.queue.len(), 10);
        assert_eq!(count_status(&selection.queue, LearningStatus::Learning), 3);
        assert_eq!(count_status(&selection.queue, LearningStatus::ToLearn), 6);
        assert_eq!(count_status(&selection.queue, LearningStatus::Learned), 1);
        assert_eq!(selection.availability.total(), 23);
    }

    #[tokio::test]
    async fn insufficient_library_fails_before_sampling() {
        let err = builder(0, 0, 2)
            .select_songs("user-1", &SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InsufficientLibrary {
                available: 2,
                required: 3
            }
        ));
    }

    #[tokio::test]
    async fn empty_categories_contribute_nothing() {
        let selection = builder(0, 5, 0)
            .select_songs("user-1", &SessionConfig::default())
            .await
            .unwrap();
        // learning demand of 7 is backfilled but only 5 to-learn songs exist
        assert_eq!(selection.learning_count, 0);
        assert_eq!(selection.to_learn_count, 5);
        assert_eq!(selection.learned_count, 0);
        assert_eq!(selection.queue.len(), 5);
    }

    #[tokio::test]
    async fn repeated_builds_keep_counts_but_shuffle_order() {
        let builder = builder(10, 10, 10);
        let mut orderings = HashSet::new();
        for _ in 0..20 {
            let selection = builder
                .select_songs("user-1", &SessionConfig::default())
                .await
                .unwrap();
            assert_eq!(
                (
                    selection.learning_count,
                    selection.to_learn_count,
                    selection.learned_count
                ),
                (5, 4, 1)
            );
            let order: Vec<String> = selection
                .queue
                .iter()
                .map(|e| e.song.spotify_id.clone())
                .collect();
            orderings.insert(order);
        }
        assert!(orderings.len() > 1);
    }

    #[tokio::test]
    async fn create_session_starts_not_started() {
        let created = builder(5, 5, 5)
            .create_session("user-1", SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(
            (created.learning_count, created.to_learn_count, created.learned_count),
            (5, 4, 1)
        );
        assert_eq!(created.availability.total(), 15);
        let session = created.session;
        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.total_songs(), 10);
        assert_eq!(session.current_index, 0);
        assert_eq!(
            session.state,
            crate::domain::FlashcardSessionState::NotStarted
        );
    }
}
