//! services/api/src/adapters/secure_store.rs
//!
//! An encrypted key-value `SecureStore` over the `secure_store` table.
//!
//! Every value is sealed with AES-256-GCM under a key derived from the
//! configured secret, with a fresh random nonce per write. A value that no
//! longer decrypts (for example after the secret changed) reads as absent.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use music_minds_core::ports::{PortError, PortResult, SecureStore};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::warn;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SqliteSecureStore {
    pool: SqlitePool,
    cipher: Aes256Gcm,
}

impl SqliteSecureStore {
    pub fn new(pool: SqlitePool, secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self {
            pool,
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice())),
        }
    }

    fn seal(&self, plaintext: &str) -> PortResult<(String, String)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| PortError::Unexpected("Failed to encrypt value".to_string()))?;
        Ok((STANDARD.encode(ciphertext), STANDARD.encode(nonce)))
    }

    fn open(&self, key: &str, value: &str, nonce: &str) -> Option<String> {
        let nonce = STANDARD.decode(nonce).ok().filter(|n| n.len() == NONCE_LEN);
        let ciphertext = STANDARD.decode(value).ok();
        let (Some(nonce), Some(ciphertext)) = (nonce, ciphertext) else {
            warn!("Stored value for '{}' is malformed", key);
            return None;
        };

        match self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        {
            Ok(plaintext) => String::from_utf8(plaintext).ok(),
            Err(_) => {
                warn!("Stored value for '{}' could not be decrypted", key);
                None
            }
        }
    }

    async fn read(&self, key: &str) -> PortResult<Option<String>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, nonce FROM secure_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(row.and_then(|(value, nonce)| self.open(key, &value, &nonce)))
    }

    async fn write(&self, key: &str, plaintext: &str) -> PortResult<()> {
        let (value, nonce) = self.seal(plaintext)?;
        sqlx::query(
            "INSERT INTO secure_store (key, value, nonce, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, nonce = excluded.nonce, \
             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(nonce)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for SqliteSecureStore {
    async fn get_string(&self, key: &str) -> PortResult<Option<String>> {
        self.read(key).await
    }

    async fn set_string(&self, key: &str, value: &str) -> PortResult<()> {
        self.write(key, value).await
    }

    async fn get_i64(&self, key: &str) -> PortResult<Option<i64>> {
        Ok(self.read(key).await?.and_then(|v| v.parse().ok()))
    }

    async fn set_i64(&self, key: &str, value: i64) -> PortResult<()> {
        self.write(key, &value.to_string()).await
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM secure_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> PortResult<()> {
        sqlx::query("DELETE FROM secure_store")
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::db::tests::memory_pool;

    #[tokio::test]
    async fn values_round_trip_and_are_not_stored_in_clear() {
        let pool = memory_pool().await;
        let store = SqliteSecureStore::new(pool.clone(), "secret");

        store.set_string("access_token", "BQC-live-token").await.unwrap();
        store.set_i64("expires_at", 1_700_000_000_000).await.unwrap();

        assert_eq!(
            store.get_string("access_token").await.unwrap().as_deref(),
            Some("BQC-live-token")
        );
        assert_eq!(
            store.get_i64("expires_at").await.unwrap(),
            Some(1_700_000_000_000)
        );

        let raw: String = sqlx::query_scalar("SELECT value FROM secure_store WHERE key = 'access_token'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!raw.contains("BQC-live-token"));
    }

    #[tokio::test]
    async fn overwrites_use_fresh_nonces() {
        let pool = memory_pool().await;
        let store = SqliteSecureStore::new(pool.clone(), "secret");

        store.set_string("k", "same").await.unwrap();
        let first: String = sqlx::query_scalar("SELECT nonce FROM secure_store WHERE key = 'k'")
            .fetch_one(&pool)
            .await
            .unwrap();
        store.set_string("k", "same").await.unwrap();
        let second: String = sqlx::query_scalar("SELECT nonce FROM secure_store WHERE key = 'k'")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.get_string("k").await.unwrap().as_deref(), Some("same"));
    }

    #[tokio::test]
    async fn wrong_secret_reads_as_absent() {
        let pool = memory_pool().await;
        SqliteSecureStore::new(pool.clone(), "secret")
            .set_string("refresh_token", "r")
            .await
            .unwrap();

        let other = SqliteSecureStore::new(pool, "rotated");
        assert_eq!(other.get_string("refresh_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = SqliteSecureStore::new(memory_pool().await, "secret");
        store.set_string("a", "1").await.unwrap();
        store.set_string("b", "2").await.unwrap();

        store.remove("a").await.unwrap();
        assert_eq!(store.get_string("a").await.unwrap(), None);
        assert!(store.get_string("b").await.unwrap().is_some());

        store.clear().await.unwrap();
        assert_eq!(store.get_string("b").await.unwrap(), None);
    }
}
