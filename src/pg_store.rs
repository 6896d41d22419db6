//! PostgreSQL Storage
//!
//! Persistent storage for users, guilds and pending OAuth states.
//! Connects with the DATABASE_URL from configuration.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use crate::auth::short_key;
use crate::models::{Guild, OAuthState, Platform, Ratings, User};
use crate::store::Store;

/// Database pool configuration
const DB_POOL_MAX_SIZE: usize = 16;
const DB_QUERY_TIMEOUT_SECS: u64 = 30;

const USER_COLUMNS: &str = "public_key, twitter_username, twitter_verified, \
     discord_username, discord_verified, github_username, github_verified, \
     dev_rating, community_rating, social_rating, defi_rating, overall_rating, \
     reputation_score, created_at, updated_at";

fn user_from_row(row: &Row) -> Result<User, tokio_postgres::Error> {
    Ok(User {
        public_key: row.try_get("public_key")?,
        twitter_username: row.try_get("twitter_username")?,
        twitter_verified: row.try_get("twitter_verified")?,
        discord_username: row.try_get("discord_username")?,
        discord_verified: row.try_get("discord_verified")?,
        github_username: row.try_get("github_username")?,
        github_verified: row.try_get("github_verified")?,
        dev_rating: row.try_get("dev_rating")?,
        community_rating: row.try_get("community_rating")?,
        social_rating: row.try_get("social_rating")?,
        defi_rating: row.try_get("defi_rating")?,
        overall_rating: row.try_get("overall_rating")?,
        reputation_score: row.try_get("reputation_score")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn guild_from_row(row: &Row) -> Result<Guild, tokio_postgres::Error> {
    Ok(Guild {
        guild_id: row.try_get("guild_id")?,
        invited_at: row.try_get("invited_at")?,
        user_public_key: row.try_get("user_public_key")?,
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create storage from a database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        use deadpool_postgres::{ManagerConfig, PoolConfig, RecyclingMethod};
        use std::time::Duration;

        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        config.options = Some(format!("-c statement_timeout={}s", DB_QUERY_TIMEOUT_SECS));

        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        config.pool = Some(PoolConfig {
            max_size: DB_POOL_MAX_SIZE,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(DB_QUERY_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create PostgreSQL pool")?;

        // Test connection
        let _client = pool
            .get()
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            DB_POOL_MAX_SIZE, DB_QUERY_TIMEOUT_SECS
        );

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run embedded migrations
    async fn run_migrations(&self) -> Result<()> {
        let client = self.pool.get().await?;

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_migrations')",
                &[],
            )
            .await?
            .get(0);

        let has_schema = if exists {
            client
                .query_one(
                    "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = 1)",
                    &[],
                )
                .await?
                .get(0)
        } else {
            false
        };

        if !has_schema {
            let migration_sql = include_str!("../migrations/001_schema.sql");
            client
                .batch_execute(migration_sql)
                .await
                .context("Failed to apply migration 001_schema")?;
            info!("Applied migration 001_schema");
        } else {
            debug!("Schema up to date");
        }

        Ok(())
    }

    async fn query_user(&self, public_key: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM users WHERE public_key = $1", USER_COLUMNS);
        let row = client.query_opt(sql.as_str(), &[&public_key]).await?;
        match row {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    // ========================================================================
    // USERS
    // ========================================================================

    async fn upsert_user(&self, public_key: &str) -> Result<User> {
        let client = self.pool.get().await?;

        // Empty update: an existing user is left as is
        let inserted = client
            .execute(
                "INSERT INTO users (public_key) VALUES ($1) ON CONFLICT (public_key) DO NOTHING",
                &[&public_key],
            )
            .await?;
        drop(client);

        if inserted > 0 {
            info!("Registered new user {}", short_key(public_key));
        }

        self.query_user(public_key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user {} missing after upsert", public_key))
    }

    async fn get_user(&self, public_key: &str) -> Result<Option<User>> {
        self.query_user(public_key).await
    }

    async fn record_verification(
        &self,
        public_key: &str,
        platform: Platform,
        username: &str,
        ratings: &Ratings,
    ) -> Result<Option<User>> {
        let client = self.pool.get().await?;

        let sql = format!(
            "UPDATE users SET {} = $2, {} = TRUE,
                dev_rating = $3, community_rating = $4, social_rating = $5,
                defi_rating = $6, overall_rating = $7, reputation_score = $8,
                updated_at = NOW()
             WHERE public_key = $1
             RETURNING {}",
            platform.username_column(),
            platform.verified_column(),
            USER_COLUMNS,
        );

        let row = client
            .query_opt(
                sql.as_str(),
                &[
                    &public_key,
                    &username,
                    &ratings.dev,
                    &ratings.community,
                    &ratings.social,
                    &ratings.defi,
                    &ratings.overall,
                    &ratings.reputation_score,
                ],
            )
            .await?;

        match row {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // GUILDS
    // ========================================================================

    async fn list_guilds(&self) -> Result<Vec<Guild>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                "SELECT guild_id, invited_at, user_public_key FROM guilds ORDER BY invited_at DESC",
                &[],
            )
            .await?;

        rows.iter()
            .map(|r| guild_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn get_user_guilds(&self, public_key: &str) -> Result<Vec<Guild>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                "SELECT guild_id, invited_at, user_public_key FROM guilds
                 WHERE user_public_key = $1 ORDER BY invited_at DESC",
                &[&public_key],
            )
            .await?;

        rows.iter()
            .map(|r| guild_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn add_guild(&self, public_key: &str, guild_id: &str) -> Result<Guild> {
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                "INSERT INTO guilds (guild_id, user_public_key) VALUES ($1, $2)
                 ON CONFLICT (guild_id, user_public_key) DO UPDATE SET invited_at = NOW()
                 RETURNING guild_id, invited_at, user_public_key",
                &[&guild_id, &public_key],
            )
            .await
            .context("Failed to record guild")?;

        info!("Recorded guild {} for {}", guild_id, short_key(public_key));
        Ok(guild_from_row(&row)?)
    }

    // ========================================================================
    // OAUTH STATES
    // ========================================================================

    async fn save_oauth_state(&self, state: &OAuthState) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                "INSERT INTO oauth_states (state, platform, public_key, code_verifier, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &state.state,
                    &state.platform.as_str(),
                    &state.public_key,
                    &state.code_verifier,
                    &state.created_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "DELETE FROM oauth_states WHERE state = $1
                 RETURNING state, platform, public_key, code_verifier, created_at",
                &[&state],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let platform: String = row.try_get("platform")?;
        Ok(Some(OAuthState {
            state: row.try_get("state")?,
            platform: platform.parse()?,
            public_key: row.try_get("public_key")?,
            code_verifier: row.try_get("code_verifier")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn purge_oauth_states(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;

        let deleted = client
            .execute(
                "DELETE FROM oauth_states WHERE created_at < $1",
                &[&older_than],
            )
            .await?;

        Ok(deleted)
    }
}
