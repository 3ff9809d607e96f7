pub mod auth;
pub mod domain;
pub mod ports;
pub mod session;
pub mod session_builder;
pub mod token_store;

pub use auth::{
    evaluate_credentials, AuthFlowError, AuthService, AuthSettings, AuthorizationRequest,
    AuthorizationResponse, CredentialStatus, ProviderError,
};
pub use domain::{
    AuthState, AuthTokens, CategoryAvailability, FlashcardSession, FlashcardSessionState,
    LearningStatus, LibraryEntry, LibraryItem, SessionConfig, Song, TokenGrant, UserProfile,
    UserStatistics,
};
pub use ports::{
    IdentityProvider, LibraryService, PlaybackService, PortError, PortResult, SecureStore,
    TokenExchangeService, TrackCatalog,
};
pub use session::{Advance, FlashcardCard, SessionError, SessionProgress};
pub use session_builder::{
    plan_targets, CategoryPlan, NewSession, SessionBuilder, SongSelection,
};
pub use token_store::{MemorySecureStore, TokenStore};
