//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

const DEFAULT_SCOPES: &str =
    "user-read-private user-read-email streaming app-remote-control user-modify-playback-state";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for talking to the Spotify accounts and web APIs.
#[derive(Clone, Debug)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub accounts_url: String,
    pub api_url: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub spotify: SpotifyConfig,
    pub token_store_secret: String,
    pub token_refresh_buffer: chrono::Duration,
    pub http_timeout: Duration,
    pub cors_origin: HeaderValue,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
        };

        // --- Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = var_or("DATABASE_URL", "sqlite://music_minds.db");

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Spotify ---
        let scopes: Vec<String> = var_or("SPOTIFY_SCOPES", DEFAULT_SCOPES)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if scopes.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SPOTIFY_SCOPES".to_string(),
                "at least one scope is required".to_string(),
            ));
        }

        let spotify = SpotifyConfig {
            client_id: required("SPOTIFY_CLIENT_ID")?,
            client_secret: required("SPOTIFY_CLIENT_SECRET")?,
            redirect_uri: var_or("SPOTIFY_REDIRECT_URI", "http://127.0.0.1:3000/auth/callback"),
            scopes,
            accounts_url: trim_url(var_or("SPOTIFY_ACCOUNTS_URL", "https://accounts.spotify.com")),
            api_url: trim_url(var_or("SPOTIFY_API_URL", "https://api.spotify.com/v1")),
        };

        // --- Credentials ---
        let token_store_secret = required("TOKEN_STORE_SECRET")?;
        let buffer_secs = parse_number("TOKEN_REFRESH_BUFFER_SECS", &var_or("TOKEN_REFRESH_BUFFER_SECS", "300"))?;
        let timeout_secs = parse_number("HTTP_TIMEOUT_SECS", &var_or("HTTP_TIMEOUT_SECS", "30"))?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "HTTP_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let cors_origin_str = var_or("CORS_ORIGIN", "http://localhost:3000");
        let cors_origin = cors_origin_str.parse::<HeaderValue>().map_err(|e| {
            ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
        })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            spotify,
            token_store_secret,
            token_refresh_buffer: chrono::Duration::seconds(buffer_secs as i64),
            http_timeout: Duration::from_secs(timeout_secs),
            cors_origin,
        })
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| {
        ConfigError::InvalidValue(
            key.to_string(),
            format!("'{}' is not a non-negative whole number", value),
        )
    })
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SPOTIFY_CLIENT_ID", "client"),
        ("SPOTIFY_CLIENT_SECRET", "secret"),
        ("TOKEN_STORE_SECRET", "store-secret"),
    ];

    #[test]
    fn defaults_fill_optional_values() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.database_url, "sqlite://music_minds.db");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.token_refresh_buffer, chrono::Duration::minutes(5));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.spotify.api_url, "https://api.spotify.com/v1");
        assert!(config.spotify.scopes.contains(&"streaming".to_string()));
    }

    #[test]
    fn missing_client_id_is_reported() {
        let err = load(&REQUIRED[1..]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "SPOTIFY_CLIENT_ID"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("TOKEN_REFRESH_BUFFER_SECS", "five minutes"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue(ref key, _)) if key == "TOKEN_REFRESH_BUFFER_SECS"
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("HTTP_TIMEOUT_SECS", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SPOTIFY_ACCOUNTS_URL", "http://127.0.0.1:9000/"));
        let config = load(&vars).unwrap();
        assert_eq!(config.spotify.accounts_url, "http://127.0.0.1:9000");
    }
}
