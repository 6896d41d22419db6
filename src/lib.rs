//! Wallet Reputation - Link wallet identities to verified social accounts
//!
//! A wallet address (`publicKey`) registers once and can then prove ownership
//! of Twitter, Discord and GitHub accounts through OAuth. Each verification
//! updates the user's category ratings and overall reputation score.
//!
//! # How it works
//!
//! 1. The web app registers the connected wallet (`POST /api/user/register`)
//! 2. The user starts a verification (`GET /api/auth/{platform}?publicKey=...`)
//! 3. The provider redirects back to `/api/auth/{platform}/callback`
//! 4. The callback verifies the account, rescores the user and redirects to
//!    the `/verify` page with the outcome
//! 5. Inviting the bot through the Discord flow records a guild for the user
//!
//! # Scoring
//!
//! - Twitter feeds the social rating, Discord community, GitHub dev
//! - Ratings grow logarithmically with the account's audience, capped at 100
//! - Each verified platform adds a flat bonus to the reputation score

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod oauth;
pub mod pg_store;
pub mod scoring;
pub mod server;
pub mod sqlite_store;
pub mod store;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use models::{Guild, OAuthState, Platform, Ratings, User};
pub use oauth::{
    CallbackRequest, Endpoints, OAuthVerifier, ProviderEndpoints, VerificationOutcome, Verifier,
};
pub use pg_store::PgStore;
pub use sqlite_store::SqliteStore;
pub use store::{open_store, Store};
