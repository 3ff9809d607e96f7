pub mod auth;
pub mod library;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod sessions;
pub mod state;
pub mod ws_handler;

pub use middleware::require_auth;
pub use ws_handler::auth_events_handler;
