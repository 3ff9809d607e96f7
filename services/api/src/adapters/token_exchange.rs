//! services/api/src/adapters/token_exchange.rs
//!
//! The `TokenExchangeService` implementation for the Spotify accounts service.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use music_minds_core::domain::TokenGrant;
use music_minds_core::ports::{PortError, PortResult, TokenExchangeService};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

/// A token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    scope: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn to_domain(self) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            token_type: self.token_type,
            scopes: self.scope.split_whitespace().map(str::to_string).collect(),
            expires_in: self.expires_in,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Clone)]
pub struct SpotifyTokenClient {
    http: Client,
    token_url: String,
    authorization: String,
    redirect_uri: String,
}

impl SpotifyTokenClient {
    pub fn new(
        http: Client,
        accounts_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/api/token", accounts_url),
            authorization: basic_auth(client_id, client_secret),
            redirect_uri: redirect_uri.to_string(),
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> PortResult<TokenGrant> {
        let response = self
            .http
            .post(&self.token_url)
            .header(AUTHORIZATION, &self.authorization)
            .form(form)
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!("Token endpoint rejected the request ({}): {}", status, body);
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PortError::Transport(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed token response: {}", e)))?;
        debug!("Received {} token", body.token_type);
        Ok(body.to_domain())
    }
}

fn basic_auth(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", client_id, client_secret))
    )
}

#[async_trait]
impl TokenExchangeService for SpotifyTokenClient {
    async fn exchange_code(&self, code: &str) -> PortResult<TokenGrant> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> PortResult<TokenGrant> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::serve;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::{routing::post, Form, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn token_endpoint(
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> Result<Json<Value>, HttpStatus> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != basic_auth("client", "secret") {
            return Err(HttpStatus::UNAUTHORIZED);
        }

        match form.get("grant_type").map(String::as_str) {
            Some("authorization_code")
                if form.get("code").map(String::as_str) == Some("good-code")
                    && form.get("redirect_uri").map(String::as_str)
                        == Some("http://127.0.0.1/cb") =>
            {
                Ok(Json(json!({
                    "access_token": "access-1",
                    "token_type": "Bearer",
                    "scope": "streaming user-read-email",
                    "expires_in": 3600,
                    "refresh_token": "refresh-1"
                })))
            }
            Some("refresh_token") if form.contains_key("refresh_token") => Ok(Json(json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "scope": "streaming",
                "expires_in": 3600
            }))),
            _ => Err(HttpStatus::BAD_REQUEST),
        }
    }

    async fn client(secret: &str) -> SpotifyTokenClient {
        let base = serve(Router::new().route("/api/token", post(token_endpoint))).await;
        SpotifyTokenClient::new(Client::new(), &base, "client", secret, "http://127.0.0.1/cb")
    }

    #[test]
    fn basic_auth_encodes_client_credentials() {
        assert_eq!(basic_auth("id", "secret"), "Basic aWQ6c2VjcmV0");
    }

    #[tokio::test]
    async fn exchanges_an_authorization_code() {
        let grant = client("secret").await.exchange_code("good-code").await.unwrap();
        assert_eq!(grant.access_token, "access-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(grant.scopes, vec!["streaming", "user-read-email"]);
        assert_eq!(grant.expires_in, 3600);
    }

    #[tokio::test]
    async fn refresh_may_omit_the_refresh_token() {
        let grant = client("secret").await.refresh("refresh-1").await.unwrap();
        assert_eq!(grant.access_token, "access-2");
        assert_eq!(grant.refresh_token, None);
    }

    #[tokio::test]
    async fn rejected_requests_are_unauthorized() {
        assert_eq!(
            client("secret").await.exchange_code("bad-code").await,
            Err(PortError::Unauthorized)
        );
        assert_eq!(
            client("wrong").await.refresh("refresh-1").await,
            Err(PortError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let client = SpotifyTokenClient::new(
            Client::new(),
            "http://127.0.0.1:9",
            "client",
            "secret",
            "http://127.0.0.1/cb",
        );
        assert!(matches!(
            client.refresh("r").await,
            Err(PortError::Transport(_))
        ));
    }
}
