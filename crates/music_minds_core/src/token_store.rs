//! crates/music_minds_core/src/token_store.rs
//!
//! Typed access to the credentials kept in a [`SecureStore`].
//!
//! Reads never fail: a storage or decryption problem is logged and reported
//! as "nothing stored", which sends the user back through login.

use crate::domain::{AuthTokens, UserProfile};
use crate::ports::{PortResult, SecureStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_EXPIRES_AT: &str = "expires_at";
pub const KEY_SCOPES: &str = "scopes";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_USER_DISPLAY_NAME: &str = "user_display_name";
pub const KEY_USER_EMAIL: &str = "user_email";

#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn SecureStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    pub async fn save_tokens(&self, tokens: &AuthTokens) -> PortResult<()> {
        debug!("Saving authentication tokens");
        self.store
            .set_string(KEY_ACCESS_TOKEN, &tokens.access_token)
            .await?;
        match &tokens.refresh_token {
            Some(refresh) => self.store.set_string(KEY_REFRESH_TOKEN, refresh).await?,
            None => self.store.remove(KEY_REFRESH_TOKEN).await?,
        }
        self.store
            .set_i64(KEY_EXPIRES_AT, tokens.expires_at.timestamp_millis())
            .await?;
        self.store
            .set_string(KEY_SCOPES, &tokens.scopes.join(" "))
            .await?;
        Ok(())
    }

    pub async fn load_tokens(&self) -> Option<AuthTokens> {
        match self.read_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to read stored tokens: {}", e);
                None
            }
        }
    }

    async fn read_tokens(&self) -> PortResult<Option<AuthTokens>> {
        let Some(access_token) = self.store.get_string(KEY_ACCESS_TOKEN).await? else {
            debug!("No access token in storage");
            return Ok(None);
        };
        let expires_at = match self.store.get_i64(KEY_EXPIRES_AT).await? {
            Some(ms) if ms > 0 => ms,
            _ => {
                warn!("Stored access token has no expiry, ignoring it");
                return Ok(None);
            }
        };
        let Some(expires_at) = millis_to_datetime(expires_at) else {
            warn!("Stored expiry {} is out of range", expires_at);
            return Ok(None);
        };
        let refresh_token = self.store.get_string(KEY_REFRESH_TOKEN).await?;
        let scopes = self
            .store
            .get_string(KEY_SCOPES)
            .await?
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Some(AuthTokens {
            access_token,
            refresh_token,
            expires_at,
            scopes,
        }))
    }

    /// Replaces only the access token and its expiry.
    pub async fn update_access_token(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.store.set_string(KEY_ACCESS_TOKEN, access_token).await?;
        self.store
            .set_i64(KEY_EXPIRES_AT, expires_at.timestamp_millis())
            .await
    }

    pub async fn save_user(&self, user: &UserProfile) -> PortResult<()> {
        self.store.set_string(KEY_USER_ID, &user.id).await?;
        match &user.display_name {
            Some(name) => self.store.set_string(KEY_USER_DISPLAY_NAME, name).await?,
            None => self.store.remove(KEY_USER_DISPLAY_NAME).await?,
        }
        match &user.email {
            Some(email) => self.store.set_string(KEY_USER_EMAIL, email).await?,
            None => self.store.remove(KEY_USER_EMAIL).await?,
        }
        Ok(())
    }

    pub async fn load_user(&self) -> Option<UserProfile> {
        match self.read_user().await {
            Ok(user) => user,
            Err(e) => {
                error!("Failed to read stored user: {}", e);
                None
            }
        }
    }

    async fn read_user(&self) -> PortResult<Option<UserProfile>> {
        let Some(id) = self.store.get_string(KEY_USER_ID).await? else {
            debug!("No user profile in storage");
            return Ok(None);
        };
        Ok(Some(UserProfile {
            id,
            display_name: self.store.get_string(KEY_USER_DISPLAY_NAME).await?,
            email: self.store.get_string(KEY_USER_EMAIL).await?,
            profile_image_url: None,
            country: None,
            product: None,
        }))
    }

    pub async fn has_stored_tokens(&self) -> bool {
        matches!(self.store.get_string(KEY_ACCESS_TOKEN).await, Ok(Some(_)))
    }

    pub async fn clear_all(&self) -> PortResult<()> {
        debug!("Clearing all authentication data");
        self.store.clear().await
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

//=========================================================================================
// In-Process Store
//=========================================================================================

/// A `SecureStore` that lives only as long as the process.
#[derive(Default)]
pub struct MemorySecureStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
        let mut guard = self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn get_string(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.with_values(|v| v.get(key).cloned()))
    }

    async fn set_string(&self, key: &str, value: &str) -> PortResult<()> {
        self.with_values(|v| v.insert(key.to_string(), value.to_string()));
        Ok(())
    }

    async fn get_i64(&self, key: &str) -> PortResult<Option<i64>> {
        Ok(self.with_values(|v| v.get(key).and_then(|s| s.parse().ok())))
    }

    async fn set_i64(&self, key: &str, value: i64) -> PortResult<()> {
        self.with_values(|v| v.insert(key.to_string(), value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        self.with_values(|v| v.remove(key));
        Ok(())
    }

    async fn clear(&self) -> PortResult<()> {
        self.with_values(|v| v.clear());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use chrono::Duration;

    struct BrokenStore;

    #[async_trait]
    impl SecureStore for BrokenStore {
        async fn get_string(&self, _key: &str) -> PortResult<Option<String>> {
            Err(PortError::Unexpected("keystore unavailable".into()))
        }
        async fn set_string(&self, _key: &str, _value: &str) -> PortResult<()> {
            Err(PortError::Unexpected("keystore unavailable".into()))
        }
        async fn get_i64(&self, _key: &str) -> PortResult<Option<i64>> {
            Err(PortError::Unexpected("keystore unavailable".into()))
        }
        async fn set_i64(&self, _key: &str, _value: i64) -> PortResult<()> {
            Err(PortError::Unexpected("keystore unavailable".into()))
        }
        async fn remove(&self, _key: &str) -> PortResult<()> {
            Err(PortError::Unexpected("keystore unavailable".into()))
        }
        async fn clear(&self) -> PortResult<()> {
            Err(PortError::Unexpected("keystore unavailable".into()))
        }
    }

    fn tokens(refresh: Option<&str>) -> AuthTokens {
        AuthTokens {
            access_token: "access-1".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Utc.timestamp_millis_opt(1_900_000_000_000).unwrap(),
            scopes: vec!["streaming".to_string(), "user-read-email".to_string()],
        }
    }

    #[tokio::test]
    async fn tokens_survive_a_save_load_cycle() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        assert!(store.load_tokens().await.is_none());

        store.save_tokens(&tokens(Some("refresh-1"))).await.unwrap();
        assert!(store.has_stored_tokens().await);
        assert_eq!(store.load_tokens().await, Some(tokens(Some("refresh-1"))));
    }

    #[tokio::test]
    async fn saving_without_refresh_token_drops_the_old_one() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        store.save_tokens(&tokens(Some("refresh-1"))).await.unwrap();
        store.save_tokens(&tokens(None)).await.unwrap();
        assert_eq!(store.load_tokens().await.unwrap().refresh_token, None);
    }

    #[tokio::test]
    async fn update_access_token_keeps_refresh_token() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        store.save_tokens(&tokens(Some("refresh-1"))).await.unwrap();

        let new_expiry = Utc::now() + Duration::hours(1);
        store.update_access_token("access-2", new_expiry).await.unwrap();

        let loaded = store.load_tokens().await.unwrap();
        assert_eq!(loaded.access_token, "access-2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(loaded.expires_at.timestamp_millis(), new_expiry.timestamp_millis());
    }

    #[tokio::test]
    async fn access_token_without_expiry_reads_as_missing() {
        let memory = Arc::new(MemorySecureStore::new());
        memory.set_string(KEY_ACCESS_TOKEN, "orphan").await.unwrap();
        let store = TokenStore::new(memory);
        assert!(store.load_tokens().await.is_none());
    }

    #[tokio::test]
    async fn user_profile_round_trip_and_clear() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        let user = UserProfile {
            id: "spotify-user".to_string(),
            display_name: Some("Listener".to_string()),
            email: None,
            profile_image_url: None,
            country: None,
            product: None,
        };
        store.save_user(&user).await.unwrap();
        assert_eq!(store.load_user().await, Some(user));

        store.clear_all().await.unwrap();
        assert!(store.load_user().await.is_none());
        assert!(!store.has_stored_tokens().await);
    }

    #[tokio::test]
    async fn storage_failures_read_as_no_data() {
        let store = TokenStore::new(Arc::new(BrokenStore));
        assert!(store.load_tokens().await.is_none());
        assert!(store.load_user().await.is_none());
        assert!(!store.has_stored_tokens().await);
        assert!(store.save_tokens(&tokens(None)).await.is_err());
    }
}
