//! Embedded SQLite storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{Guild, OAuthState, Platform, Ratings, User};
use crate::store::Store;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    public_key TEXT PRIMARY KEY,
    twitter_username TEXT,
    twitter_verified INTEGER NOT NULL DEFAULT 0,
    discord_username TEXT,
    discord_verified INTEGER NOT NULL DEFAULT 0,
    github_username TEXT,
    github_verified INTEGER NOT NULL DEFAULT 0,
    dev_rating REAL,
    community_rating REAL,
    social_rating REAL,
    defi_rating REAL,
    overall_rating REAL,
    reputation_score REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS guilds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_id TEXT NOT NULL,
    user_public_key TEXT NOT NULL REFERENCES users(public_key),
    invited_at TEXT NOT NULL,
    UNIQUE(guild_id, user_public_key)
);

CREATE INDEX IF NOT EXISTS idx_guilds_user ON guilds(user_public_key);

CREATE TABLE IF NOT EXISTS oauth_states (
    state TEXT PRIMARY KEY,
    platform TEXT NOT NULL,
    public_key TEXT NOT NULL,
    code_verifier TEXT,
    created_at TEXT NOT NULL
);
"#;

const USER_COLUMNS: &str = "public_key, twitter_username, twitter_verified, \
     discord_username, discord_verified, github_username, github_verified, \
     dev_rating, community_rating, social_rating, defi_rating, overall_rating, \
     reputation_score, created_at, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to apply SQLite schema")?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    fn query_user(conn: &Connection, public_key: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE public_key = ?1", USER_COLUMNS);
        let user = conn
            .query_row(&sql, params![public_key], user_from_row)
            .optional()?;
        Ok(user)
    }
}

/// Fixed-width UTC timestamps keep text ordering equal to time ordering
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        public_key: row.get(0)?,
        twitter_username: row.get(1)?,
        twitter_verified: row.get(2)?,
        discord_username: row.get(3)?,
        discord_verified: row.get(4)?,
        github_username: row.get(5)?,
        github_verified: row.get(6)?,
        dev_rating: row.get(7)?,
        community_rating: row.get(8)?,
        social_rating: row.get(9)?,
        defi_rating: row.get(10)?,
        overall_rating: row.get(11)?,
        reputation_score: row.get(12)?,
        created_at: parse_timestamp(13, row.get(13)?)?,
        updated_at: parse_timestamp(14, row.get(14)?)?,
    })
}

fn guild_from_row(row: &Row<'_>) -> rusqlite::Result<Guild> {
    Ok(Guild {
        guild_id: row.get(0)?,
        invited_at: parse_timestamp(1, row.get(1)?)?,
        user_public_key: row.get(2)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_user(&self, public_key: &str) -> Result<User> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO users (public_key, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(public_key) DO NOTHING",
            params![public_key, now],
        )?;
        Self::query_user(&conn, public_key)?
            .ok_or_else(|| anyhow!("user {} missing after upsert", public_key))
    }

    async fn get_user(&self, public_key: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        Self::query_user(&conn, public_key)
    }

    async fn record_verification(
        &self,
        public_key: &str,
        platform: Platform,
        username: &str,
        ratings: &Ratings,
    ) -> Result<Option<User>> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE users SET {} = ?2, {} = 1,
                dev_rating = ?3, community_rating = ?4, social_rating = ?5,
                defi_rating = ?6, overall_rating = ?7, reputation_score = ?8,
                updated_at = ?9
             WHERE public_key = ?1",
            platform.username_column(),
            platform.verified_column(),
        );
        let updated = conn.execute(
            &sql,
            params![
                public_key,
                username,
                ratings.dev,
                ratings.community,
                ratings.social,
                ratings.defi,
                ratings.overall,
                ratings.reputation_score,
                timestamp(Utc::now()),
            ],
        )?;

        if updated == 0 {
            return Ok(None);
        }
        Self::query_user(&conn, public_key)
    }

    async fn list_guilds(&self) -> Result<Vec<Guild>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT guild_id, invited_at, user_public_key FROM guilds ORDER BY invited_at DESC",
        )?;
        let guilds = stmt
            .query_map([], guild_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(guilds)
    }

    async fn get_user_guilds(&self, public_key: &str) -> Result<Vec<Guild>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT guild_id, invited_at, user_public_key FROM guilds
             WHERE user_public_key = ?1 ORDER BY invited_at DESC",
        )?;
        let guilds = stmt
            .query_map(params![public_key], guild_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(guilds)
    }

    async fn add_guild(&self, public_key: &str, guild_id: &str) -> Result<Guild> {
        let conn = self.conn()?;
        let guild = conn.query_row(
            "INSERT INTO guilds (guild_id, user_public_key, invited_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, user_public_key) DO UPDATE SET invited_at = excluded.invited_at
             RETURNING guild_id, invited_at, user_public_key",
            params![guild_id, public_key, timestamp(Utc::now())],
            guild_from_row,
        )?;
        Ok(guild)
    }

    async fn save_oauth_state(&self, state: &OAuthState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO oauth_states (state, platform, public_key, code_verifier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state.state,
                state.platform.as_str(),
                state.public_key,
                state.code_verifier,
                timestamp(state.created_at),
            ],
        )?;
        Ok(())
    }

    async fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "DELETE FROM oauth_states WHERE state = ?1
                 RETURNING state, platform, public_key, code_verifier, created_at",
                params![state],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        parse_timestamp(4, row.get(4)?)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((state, platform, public_key, code_verifier, created_at)) => Ok(Some(OAuthState {
                state,
                platform: platform.parse()?,
                public_key,
                code_verifier,
                created_at,
            })),
            None => Ok(None),
        }
    }

    async fn purge_oauth_states(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM oauth_states WHERE created_at < ?1",
            params![timestamp(older_than)],
        )?;
        Ok(deleted as u64)
    }
}
