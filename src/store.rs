//! Storage seam
//!
//! Handlers only see the [`Store`] trait. Two backends implement it:
//! [`PgStore`](crate::pg_store::PgStore) for deployments and
//! [`SqliteStore`](crate::sqlite_store::SqliteStore) for local runs and tests.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{Guild, OAuthState, Platform, Ratings, User};
use crate::pg_store::PgStore;
use crate::sqlite_store::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Create the user if absent. An existing user is returned untouched.
    async fn upsert_user(&self, public_key: &str) -> Result<User>;

    async fn get_user(&self, public_key: &str) -> Result<Option<User>>;

    /// Mark `platform` verified for the user, store the linked username and
    /// replace the rating fields. Returns the updated user, or `None` if the
    /// user does not exist.
    async fn record_verification(
        &self,
        public_key: &str,
        platform: Platform,
        username: &str,
        ratings: &Ratings,
    ) -> Result<Option<User>>;

    /// All guilds, newest invitation first
    async fn list_guilds(&self) -> Result<Vec<Guild>>;

    async fn get_user_guilds(&self, public_key: &str) -> Result<Vec<Guild>>;

    /// Record that the bot joined `guild_id` for the user. Re-inviting
    /// refreshes the invitation timestamp.
    async fn add_guild(&self, public_key: &str, guild_id: &str) -> Result<Guild>;

    async fn save_oauth_state(&self, state: &OAuthState) -> Result<()>;

    /// Remove and return a pending state. A state can only be taken once.
    async fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>>;

    /// Delete pending states created before `older_than`
    async fn purge_oauth_states(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// Open the backend named by a database URL.
///
/// `postgres://` and `postgresql://` URLs use PostgreSQL, `sqlite://<path>`
/// opens a file and `sqlite::memory:` an in-memory database.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn Store>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let store = PgStore::new(database_url).await?;
        return Ok(Arc::new(store));
    }

    if database_url == "sqlite::memory:" {
        info!("Using in-memory SQLite store");
        return Ok(Arc::new(SqliteStore::in_memory()?));
    }

    if let Some(path) = database_url.strip_prefix("sqlite://") {
        let store = SqliteStore::new(path)?;
        info!("Using SQLite store at {}", path);
        return Ok(Arc::new(store));
    }

    anyhow::bail!(
        "Unsupported database URL (expected postgres://, sqlite:// or sqlite::memory:)"
    )
}
