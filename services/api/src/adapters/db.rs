//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `LibraryService` port from the `core` crate. It handles all interactions
//! with the SQLite database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use music_minds_core::domain::{
    CategoryAvailability, LearningStatus, LibraryEntry, LibraryItem, Song, UserStatistics,
};
use music_minds_core::ports::{LibraryService, PortError, PortResult};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const ENTRY_SELECT: &str = "SELECT s.id, s.spotify_id, s.title, s.artist, s.album, \
     s.release_year, s.duration_ms, s.genre, s.preview_url, s.image_url, s.trivia, \
     s.date_added, us.learning_status, us.correct_count, us.incorrect_count, \
     us.last_attempt_at, us.points_earned, us.status_changed_at, us.is_favorite \
     FROM user_songs us JOIN songs s ON s.id = us.song_id";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `LibraryService` port.
#[derive(Clone)]
pub struct SqliteLibraryAdapter {
    pool: SqlitePool,
}

impl SqliteLibraryAdapter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn db_error(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Escapes LIKE wildcards so user input matches literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct EntryRecord {
    id: String,
    spotify_id: String,
    title: String,
    artist: String,
    album: String,
    release_year: i64,
    duration_ms: i64,
    genre: Option<String>,
    preview_url: Option<String>,
    image_url: Option<String>,
    trivia: Option<String>,
    date_added: DateTime<Utc>,
    learning_status: String,
    correct_count: i64,
    incorrect_count: i64,
    last_attempt_at: Option<DateTime<Utc>>,
    points_earned: i64,
    status_changed_at: DateTime<Utc>,
    is_favorite: bool,
}

impl EntryRecord {
    fn to_domain(self) -> PortResult<LibraryEntry> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| PortError::Unexpected(format!("Corrupt song id '{}': {}", self.id, e)))?;
        let learning_status = self
            .learning_status
            .parse::<LearningStatus>()
            .map_err(PortError::Unexpected)?;

        Ok(LibraryEntry {
            song: Song {
                id,
                spotify_id: self.spotify_id,
                title: self.title,
                artist: self.artist,
                album: self.album,
                release_year: self.release_year as i32,
                duration_ms: self.duration_ms,
                genre: self.genre,
                preview_url: self.preview_url,
                image_url: self.image_url,
                trivia: self.trivia,
                date_added: self.date_added,
            },
            item: LibraryItem {
                song_id: id,
                learning_status,
                correct_count: self.correct_count.max(0) as u32,
                incorrect_count: self.incorrect_count.max(0) as u32,
                last_attempt_at: self.last_attempt_at,
                points_earned: self.points_earned,
                status_changed_at: self.status_changed_at,
                is_favorite: self.is_favorite,
            },
        })
    }
}

fn to_entries(records: Vec<EntryRecord>) -> PortResult<Vec<LibraryEntry>> {
    records.into_iter().map(EntryRecord::to_domain).collect()
}

//=========================================================================================
// `LibraryService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LibraryService for SqliteLibraryAdapter {
    async fn category_counts(&self, user_id: &str) -> PortResult<CategoryAvailability> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT learning_status, COUNT(*) FROM user_songs WHERE user_id = ? GROUP BY learning_status",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut availability = CategoryAvailability::default();
        for (status, count) in rows {
            let count = count.max(0) as usize;
            match status.parse::<LearningStatus>().map_err(PortError::Unexpected)? {
                LearningStatus::Learning => availability.learning_available = count,
                LearningStatus::ToLearn => availability.to_learn_available = count,
                LearningStatus::Learned => availability.learned_available = count,
            }
        }
        Ok(availability)
    }

    async fn random_entries_by_status(
        &self,
        user_id: &str,
        status: LearningStatus,
        limit: usize,
    ) -> PortResult<Vec<LibraryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE us.user_id = ? AND us.learning_status = ? ORDER BY RANDOM() LIMIT ?",
            ENTRY_SELECT
        );
        let records: Vec<EntryRecord> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        to_entries(records)
    }

    async fn entries_by_status(
        &self,
        user_id: &str,
        status: LearningStatus,
    ) -> PortResult<Vec<LibraryEntry>> {
        let sql = format!(
            "{} WHERE us.user_id = ? AND us.learning_status = ? ORDER BY us.status_changed_at DESC",
            ENTRY_SELECT
        );
        let records: Vec<EntryRecord> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        to_entries(records)
    }

    async fn add_song(&self, user_id: &str, song: &Song) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            "INSERT INTO songs (id, spotify_id, title, artist, album, release_year, duration_ms, \
             genre, preview_url, image_url, trivia, date_added, title_folded, artist_folded) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT (spotify_id) DO NOTHING",
        )
        .bind(song.id.to_string())
        .bind(&song.spotify_id)
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.album)
        .bind(song.release_year)
        .bind(song.duration_ms)
        .bind(&song.genre)
        .bind(&song.preview_url)
        .bind(&song.image_url)
        .bind(&song.trivia)
        .bind(song.date_added)
        .bind(song.title.to_lowercase())
        .bind(song.artist.to_lowercase())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let song_id: String = sqlx::query_scalar("SELECT id FROM songs WHERE spotify_id = ?")
            .bind(&song.spotify_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        let inserted = sqlx::query(
            "INSERT INTO user_songs (user_id, song_id, learning_status, status_changed_at) \
             VALUES (?, ?, ?, ?) ON CONFLICT (user_id, song_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&song_id)
        .bind(LearningStatus::ToLearn.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .rows_affected()
            == 1;

        tx.commit().await.map_err(db_error)?;
        debug!(
            "Song {} {} library of {}",
            song.spotify_id,
            if inserted { "added to" } else { "already in" },
            user_id
        );
        Ok(inserted)
    }

    async fn is_in_library(&self, user_id: &str, spotify_id: &str) -> PortResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_songs us JOIN songs s ON s.id = us.song_id \
             WHERE us.user_id = ? AND s.spotify_id = ?",
        )
        .bind(user_id)
        .bind(spotify_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(count > 0)
    }

    async fn remove_song(&self, user_id: &str, song_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM user_songs WHERE user_id = ? AND song_id = ?")
            .bind(user_id)
            .bind(song_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Song {} not in library", song_id)));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        user_id: &str,
        song_id: Uuid,
        status: LearningStatus,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE user_songs SET learning_status = ?, status_changed_at = ? \
             WHERE user_id = ? AND song_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(user_id)
        .bind(song_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Song {} not in library", song_id)));
        }
        Ok(())
    }

    async fn record_answer(
        &self,
        user_id: &str,
        song_id: Uuid,
        correct: bool,
        points: i64,
    ) -> PortResult<()> {
        let (correct_delta, incorrect_delta) = if correct { (1, 0) } else { (0, 1) };
        let result = sqlx::query(
            "UPDATE user_songs SET correct_count = correct_count + ?, \
             incorrect_count = incorrect_count + ?, points_earned = points_earned + ?, \
             last_attempt_at = ? WHERE user_id = ? AND song_id = ?",
        )
        .bind(correct_delta)
        .bind(incorrect_delta)
        .bind(points)
        .bind(Utc::now())
        .bind(user_id)
        .bind(song_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Song {} not in library", song_id)));
        }
        Ok(())
    }

    async fn search(&self, user_id: &str, query: &str) -> PortResult<Vec<Song>> {
        let sql = format!(
            "{} WHERE us.user_id = ? AND (s.title_folded LIKE ? ESCAPE '\\' \
             OR s.artist_folded LIKE ? ESCAPE '\\') ORDER BY s.title",
            ENTRY_SELECT
        );
        let pattern = like_pattern(query.trim());
        let records: Vec<EntryRecord> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(to_entries(records)?.into_iter().map(|e| e.song).collect())
    }

    async fn statistics(&self, user_id: &str) -> PortResult<UserStatistics> {
        let (total, to_learn, learning, learned, points): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                "SELECT COUNT(*), \
                 COALESCE(SUM(CASE WHEN learning_status = 'TO_LEARN' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(CASE WHEN learning_status = 'LEARNING' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(CASE WHEN learning_status = 'LEARNED' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(points_earned), 0) \
                 FROM user_songs WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(UserStatistics {
            total_songs: total.max(0) as u32,
            to_learn_songs: to_learn.max(0) as u32,
            learning_songs: learning.max(0) as u32,
            learned_songs: learned.max(0) as u32,
            total_points: points,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashSet;

    pub(crate) async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn song(spotify_id: &str, title: &str, artist: &str) -> Song {
        Song {
            id: Uuid::new_v4(),
            spotify_id: spotify_id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Album".to_string(),
            release_year: 1999,
            duration_ms: 180_000,
            genre: None,
            preview_url: None,
            image_url: Some("https://img.test/300".to_string()),
            trivia: None,
            date_added: Utc::now(),
        }
    }

    async fn adapter() -> SqliteLibraryAdapter {
        SqliteLibraryAdapter::new(memory_pool().await)
    }

    #[tokio::test]
    async fn add_song_is_idempotent_per_user() {
        let db = adapter().await;
        let track = song("sp1", "Harvest Moon", "Neil Young");

        assert!(db.add_song("alice", &track).await.unwrap());
        assert!(!db.add_song("alice", &track).await.unwrap());
        assert!(db.add_song("bob", &song("sp1", "Harvest Moon", "Neil Young")).await.unwrap());

        assert!(db.is_in_library("alice", "sp1").await.unwrap());
        assert!(!db.is_in_library("alice", "sp2").await.unwrap());

        let counts = db.category_counts("alice").await.unwrap();
        assert_eq!(counts.to_learn_available, 1);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn shared_song_rows_keep_the_first_id() {
        let db = adapter().await;
        let first = song("sp1", "Harvest Moon", "Neil Young");
        db.add_song("alice", &first).await.unwrap();
        db.add_song("bob", &song("sp1", "Harvest Moon", "Neil Young"))
            .await
            .unwrap();

        let bobs = db
            .entries_by_status("bob", LearningStatus::ToLearn)
            .await
            .unwrap();
        assert_eq!(bobs[0].song.id, first.id);
        assert_eq!(bobs[0].item.song_id, first.id);
    }

    #[tokio::test]
    async fn random_sampling_respects_status_and_limit() {
        let db = adapter().await;
        for i in 0..6 {
            let track = song(&format!("sp{}", i), &format!("Song {}", i), "Artist");
            db.add_song("alice", &track).await.unwrap();
            if i < 4 {
                db.update_status("alice", track.id, LearningStatus::Learning)
                    .await
                    .unwrap();
            }
        }

        let picked = db
            .random_entries_by_status("alice", LearningStatus::Learning, 3)
            .await
            .unwrap();
        assert_eq!(picked.len(), 3);
        assert!(picked
            .iter()
            .all(|e| e.item.learning_status == LearningStatus::Learning));
        let unique: HashSet<_> = picked.iter().map(|e| e.song.id).collect();
        assert_eq!(unique.len(), 3);

        let capped = db
            .random_entries_by_status("alice", LearningStatus::ToLearn, 10)
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);

        let counts = db.category_counts("alice").await.unwrap();
        assert_eq!(
            (counts.learning_available, counts.to_learn_available, counts.learned_available),
            (4, 2, 0)
        );
    }

    #[tokio::test]
    async fn answers_update_counters_and_statistics() {
        let db = adapter().await;
        let track = song("sp1", "Song", "Artist");
        db.add_song("alice", &track).await.unwrap();

        db.record_answer("alice", track.id, true, 10).await.unwrap();
        db.record_answer("alice", track.id, false, 0).await.unwrap();
        db.update_status("alice", track.id, LearningStatus::Learned)
            .await
            .unwrap();

        let entry = &db
            .entries_by_status("alice", LearningStatus::Learned)
            .await
            .unwrap()[0];
        assert_eq!(entry.item.correct_count, 1);
        assert_eq!(entry.item.incorrect_count, 1);
        assert_eq!(entry.item.points_earned, 10);
        assert!(entry.item.last_attempt_at.is_some());

        let stats = db.statistics("alice").await.unwrap();
        assert_eq!(stats.total_songs, 1);
        assert_eq!(stats.learned_songs, 1);
        assert_eq!(stats.total_points, 10);

        assert_eq!(db.statistics("nobody").await.unwrap(), UserStatistics::default());
    }

    #[tokio::test]
    async fn search_matches_title_or_artist_case_insensitively() {
        let db = adapter().await;
        db.add_song("alice", &song("sp1", "Harvest Moon", "Neil Young"))
            .await
            .unwrap();
        db.add_song("alice", &song("sp2", "Heart of Gold", "Neil Young"))
            .await
            .unwrap();
        db.add_song("alice", &song("sp3", "100% Pure", "Someone"))
            .await
            .unwrap();
        db.add_song("bob", &song("sp4", "Moonlight", "Other")).await.unwrap();

        assert_eq!(db.search("alice", "NEIL").await.unwrap().len(), 2);
        let moon = db.search("alice", "moon").await.unwrap();
        assert_eq!(moon.len(), 1);
        assert_eq!(moon[0].spotify_id, "sp1");
        assert_eq!(db.search("alice", "%").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_folds_non_ascii_case() {
        let db = adapter().await;
        db.add_song("alice", &song("sp1", "Schrei nach Liebe", "Die Ärzte"))
            .await
            .unwrap();
        db.add_song("alice", &song("sp2", "ÉTÉ INDIEN", "Joe Dassin"))
            .await
            .unwrap();

        let found = db.search("alice", "ärzte").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].artist, "Die Ärzte");
        assert_eq!(db.search("alice", "DIE ÄRZTE").await.unwrap().len(), 1);
        assert_eq!(db.search("alice", "été").await.unwrap()[0].spotify_id, "sp2");
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let db = adapter().await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            db.remove_song("alice", missing).await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            db.update_status("alice", missing, LearningStatus::Learned).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn removing_a_song_only_affects_that_user() {
        let db = adapter().await;
        let track = song("sp1", "Song", "Artist");
        db.add_song("alice", &track).await.unwrap();
        db.add_song("bob", &track).await.unwrap();

        db.remove_song("alice", track.id).await.unwrap();
        assert!(!db.is_in_library("alice", "sp1").await.unwrap());
        assert!(db.is_in_library("bob", "sp1").await.unwrap());
    }
}
