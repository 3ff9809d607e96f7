//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        SpotifyIdentityAdapter, SpotifyTokenClient, SpotifyWebAdapter, SqliteLibraryAdapter,
        SqliteSecureStore,
    },
    build_router,
    config::Config,
    error::ApiError,
    web::state::{AppState, SessionRegistry},
};
use music_minds_core::auth::{AuthService, AuthSettings};
use music_minds_core::token_store::TokenStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Opening database {}...", config.database_url);
    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;
    let library = Arc::new(SqliteLibraryAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    library.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;
    let spotify = &config.spotify;
    let exchange = Arc::new(SpotifyTokenClient::new(
        http.clone(),
        &spotify.accounts_url,
        &spotify.client_id,
        &spotify.client_secret,
        &spotify.redirect_uri,
    ));
    let identity = Arc::new(SpotifyIdentityAdapter::new(http.clone(), spotify)?);
    let web_api = Arc::new(SpotifyWebAdapter::new(http, &spotify.api_url));
    let secure_store = Arc::new(SqliteSecureStore::new(
        db_pool,
        &config.token_store_secret,
    ));

    // --- 4. Restore Authentication ---
    let auth = AuthService::new(
        TokenStore::new(secure_store),
        exchange,
        identity,
        AuthSettings {
            refresh_buffer: config.token_refresh_buffer,
        },
    );
    let initial = auth.check_authentication_status().await;
    info!("Initial authentication state: {}", initial.name());

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        library,
        catalog: web_api.clone(),
        playback: web_api,
        auth: auth.clone(),
        sessions: SessionRegistry::new(),
    });

    let app = build_router(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            auth.shutdown();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
