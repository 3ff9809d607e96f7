pub mod adapters;
pub mod config;
pub mod error;
pub mod web;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use web::{auth, library, rest, sessions, state::AppState};

/// Builds the complete HTTP application: public auth routes, the
/// authenticated library and session routes, and the Swagger UI.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(app_state.config.cors_origin.clone())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/auth/login", get(auth::login_handler))
        .route("/auth/callback", get(auth::callback_handler))
        .route("/auth/status", get(auth::status_handler))
        .route("/auth/retry", post(auth::retry_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/events", get(web::auth_events_handler));

    // Protected routes (signed-in user required)
    let protected_routes = Router::new()
        .route(
            "/library",
            get(library::list_library_handler).post(library::add_song_handler),
        )
        .route("/library/search", get(library::search_library_handler))
        .route("/library/statistics", get(library::statistics_handler))
        .route(
            "/library/{song_id}",
            axum::routing::delete(library::remove_song_handler),
        )
        .route(
            "/library/{song_id}/status",
            put(library::update_status_handler),
        )
        .route("/catalog/search", get(library::catalog_search_handler))
        .route("/sessions", post(sessions::create_session_handler))
        .route("/sessions/restore", post(sessions::restore_session_handler))
        .route("/sessions/{id}", get(sessions::get_session_handler))
        .route("/sessions/{id}/start", post(sessions::start_session_handler))
        .route("/sessions/{id}/pause", post(sessions::pause_session_handler))
        .route("/sessions/{id}/replay", post(sessions::replay_handler))
        .route("/sessions/{id}/reveal", post(sessions::reveal_handler))
        .route("/sessions/{id}/answer", post(sessions::answer_handler))
        .route("/sessions/{id}/next", post(sessions::next_card_handler))
        .route("/sessions/{id}/cancel", post(sessions::cancel_session_handler))
        .route("/sessions/{id}/snapshot", get(sessions::snapshot_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            web::require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", rest::ApiDoc::openapi()))
}
