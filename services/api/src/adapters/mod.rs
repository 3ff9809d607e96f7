pub mod db;
pub mod identity;
pub mod secure_store;
pub mod spotify_web;
pub mod token_exchange;

pub use db::SqliteLibraryAdapter;
pub use identity::SpotifyIdentityAdapter;
pub use secure_store::SqliteSecureStore;
pub use spotify_web::SpotifyWebAdapter;
pub use token_exchange::SpotifyTokenClient;
