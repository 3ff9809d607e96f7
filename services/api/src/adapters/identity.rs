//! services/api/src/adapters/identity.rs
//!
//! The `IdentityProvider` implementation: builds the Spotify authorize URL and
//! reads the signed-in user's profile.

use async_trait::async_trait;
use music_minds_core::domain::UserProfile;
use music_minds_core::ports::{IdentityProvider, PortError, PortResult};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::config::SpotifyConfig;

#[derive(Debug, Deserialize)]
struct ImageObject {
    url: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
    display_name: Option<String>,
    email: Option<String>,
    #[serde(default)]
    images: Vec<ImageObject>,
    country: Option<String>,
    product: Option<String>,
}

impl MeResponse {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            id: self.id,
            display_name: self.display_name,
            email: self.email,
            profile_image_url: self.images.into_iter().next().map(|i| i.url),
            country: self.country,
            product: self.product,
        }
    }
}

#[derive(Clone)]
pub struct SpotifyIdentityAdapter {
    http: Client,
    authorize_url: Url,
    me_url: String,
}

impl SpotifyIdentityAdapter {
    pub fn new(http: Client, spotify: &SpotifyConfig) -> PortResult<Self> {
        let mut authorize_url = Url::parse(&format!("{}/authorize", spotify.accounts_url))
            .map_err(|e| PortError::Unexpected(format!("Invalid accounts URL: {}", e)))?;
        authorize_url
            .query_pairs_mut()
            .append_pair("client_id", &spotify.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &spotify.redirect_uri)
            .append_pair("scope", &spotify.scopes.join(" "))
            .append_pair("show_dialog", "true");

        Ok(Self {
            http,
            authorize_url,
            me_url: format!("{}/me", spotify.api_url),
        })
    }
}

#[async_trait]
impl IdentityProvider for SpotifyIdentityAdapter {
    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut().append_pair("state", state);
        url.to_string()
    }

    async fn current_user(&self, access_token: &str) -> PortResult<UserProfile> {
        let response = self
            .http
            .get(&self.me_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PortError::Unauthorized),
            status if !status.is_success() => Err(PortError::Transport(format!(
                "Profile endpoint returned {}",
                status
            ))),
            _ => response
                .json::<MeResponse>()
                .await
                .map(MeResponse::to_domain)
                .map_err(|e| PortError::Unexpected(format!("Malformed profile: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::serve;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::{routing::get, Json, Router};
    use serde_json::{json, Value};

    fn spotify(accounts_url: &str, api_url: &str) -> SpotifyConfig {
        SpotifyConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://127.0.0.1:3000/auth/callback".to_string(),
            scopes: vec!["streaming".to_string(), "user-read-email".to_string()],
            accounts_url: accounts_url.to_string(),
            api_url: api_url.to_string(),
        }
    }

    async fn me(headers: HeaderMap) -> Result<Json<Value>, HttpStatus> {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer good") => Ok(Json(json!({
                "id": "listener",
                "display_name": "Listener",
                "email": "listener@example.com",
                "images": [{ "url": "https://img.test/me.jpg", "height": 64, "width": 64 }],
                "country": "SE",
                "product": "premium"
            }))),
            _ => Err(HttpStatus::UNAUTHORIZED),
        }
    }

    #[test]
    fn authorization_url_carries_client_scope_and_state() {
        let adapter =
            SpotifyIdentityAdapter::new(Client::new(), &spotify("https://accounts.test", "x"))
                .unwrap();
        let url = Url::parse(&adapter.authorization_url("abc123")).unwrap();

        assert_eq!(url.path(), "/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:3000/auth/callback");
        assert_eq!(pairs["scope"], "streaming user-read-email");
        assert_eq!(pairs["state"], "abc123");
    }

    #[test]
    fn invalid_accounts_url_is_rejected() {
        assert!(SpotifyIdentityAdapter::new(Client::new(), &spotify("not a url", "x")).is_err());
    }

    #[tokio::test]
    async fn reads_the_current_user() {
        let base = serve(Router::new().route("/me", get(me))).await;
        let adapter =
            SpotifyIdentityAdapter::new(Client::new(), &spotify("https://accounts.test", &base))
                .unwrap();

        let user = adapter.current_user("good").await.unwrap();
        assert_eq!(user.id, "listener");
        assert_eq!(user.email.as_deref(), Some("listener@example.com"));
        assert_eq!(user.profile_image_url.as_deref(), Some("https://img.test/me.jpg"));

        assert_eq!(
            adapter.current_user("stale").await,
            Err(PortError::Unauthorized)
        );
    }
}
