//! Domain records shared by the stores, the verifier and the HTTP layer

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PLATFORMS
// ============================================================================

/// Social platform a wallet can be linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Discord,
    GitHub,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitter, Platform::Discord, Platform::GitHub];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Discord => "discord",
            Platform::GitHub => "github",
        }
    }

    /// Column holding the linked username
    pub(crate) fn username_column(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter_username",
            Platform::Discord => "discord_username",
            Platform::GitHub => "github_username",
        }
    }

    /// Column holding the verification flag
    pub(crate) fn verified_column(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter_verified",
            Platform::Discord => "discord_verified",
            Platform::GitHub => "github_verified",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "discord" => Ok(Platform::Discord),
            "github" => Ok(Platform::GitHub),
            other => anyhow::bail!("unknown platform: {}", other),
        }
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// A wallet identity and everything linked to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub public_key: String,
    pub twitter_username: Option<String>,
    pub twitter_verified: bool,
    pub discord_username: Option<String>,
    pub discord_verified: bool,
    pub github_username: Option<String>,
    pub github_verified: bool,
    pub dev_rating: Option<f64>,
    pub community_rating: Option<f64>,
    pub social_rating: Option<f64>,
    pub defi_rating: Option<f64>,
    pub overall_rating: Option<f64>,
    pub reputation_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn ratings(&self) -> Ratings {
        Ratings {
            dev: self.dev_rating,
            community: self.community_rating,
            social: self.social_rating,
            defi: self.defi_rating,
            overall: self.overall_rating,
            reputation_score: self.reputation_score,
        }
    }

    pub fn is_verified(&self, platform: Platform) -> bool {
        match platform {
            Platform::Twitter => self.twitter_verified,
            Platform::Discord => self.discord_verified,
            Platform::GitHub => self.github_verified,
        }
    }

    pub fn verified_count(&self) -> u32 {
        Platform::ALL.iter().filter(|p| self.is_verified(**p)).count() as u32
    }
}

/// Rating fields of a user. Every field is independently nullable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    pub dev: Option<f64>,
    pub community: Option<f64>,
    pub social: Option<f64>,
    pub defi: Option<f64>,
    pub overall: Option<f64>,
    #[serde(rename = "score")]
    pub reputation_score: Option<f64>,
}

/// A Discord server the bot joined on behalf of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guild {
    pub guild_id: String,
    pub invited_at: DateTime<Utc>,
    pub user_public_key: String,
}

/// Pending authorization request, consumed by the OAuth callback
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthState {
    pub state: String,
    pub platform: Platform,
    pub public_key: String,
    /// PKCE verifier, only used by providers that require it
    pub code_verifier: Option<String>,
    pub created_at: DateTime<Utc>,
}
