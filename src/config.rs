//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - Database URL
//! - Front-end location of the verification page
//! - OAuth client credentials per platform

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::Platform;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub app: AppConfig,
    pub oauth: OAuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration (DATABASE_URL env var takes precedence)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Origin hosting the `/verify` page
    #[serde(default)]
    pub frontend_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Lifetime of a pending authorization request
    pub state_ttl_secs: i64,
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub discord_bot_permissions: String,
    pub twitter: ProviderConfig,
    pub discord: ProviderConfig,
    pub github: ProviderConfig,
}

/// OAuth client registration for one platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl Config {
    /// Load from a config file, or the embedded defaults if it does not exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    /// Database URL (env var takes precedence)
    pub fn database_url(&self) -> String {
        non_empty_env("DATABASE_URL").unwrap_or_else(|| self.database.url.clone())
    }

    /// Front-end origin without trailing slash (env var takes precedence)
    pub fn frontend_url(&self) -> String {
        non_empty_env("FRONTEND_URL")
            .unwrap_or_else(|| self.app.frontend_url.clone())
            .trim_end_matches('/')
            .to_string()
    }
}

impl OAuthConfig {
    fn provider(&self, platform: Platform) -> &ProviderConfig {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::Discord => &self.discord,
            Platform::GitHub => &self.github,
        }
    }

    /// Client credentials with overrides from `env` applied, or `None` if
    /// the platform has no client ID or secret
    pub fn credentials_with(
        &self,
        platform: Platform,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<ProviderConfig> {
        let prefix = platform.as_str().to_uppercase();
        let base = self.provider(platform);
        let pick = |suffix: &str, fallback: &str| {
            env(&format!("{}_{}", prefix, suffix)).unwrap_or_else(|| fallback.to_string())
        };

        let resolved = ProviderConfig {
            client_id: pick("CLIENT_ID", &base.client_id),
            client_secret: pick("CLIENT_SECRET", &base.client_secret),
            redirect_uri: pick("REDIRECT_URI", &base.redirect_uri),
            scope: base.scope.clone(),
        };

        if resolved.client_id.is_empty() || resolved.client_secret.is_empty() {
            None
        } else {
            Some(resolved)
        }
    }
}

/// Environment variable, treating an empty value as unset
pub fn non_empty_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        let provider = |platform: &str, scope: &str| ProviderConfig {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: format!("http://localhost:3000/api/auth/{}/callback", platform),
            scope: scope.to_string(),
        };

        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite://reputation.db".to_string(),
            },
            app: AppConfig::default(),
            oauth: OAuthConfig {
                state_ttl_secs: 600,
                http_timeout_secs: 15,
                discord_bot_permissions: "3072".to_string(),
                twitter: provider("twitter", "tweet.read users.read"),
                discord: provider("discord", "identify bot"),
                github: provider("github", "read:user"),
            },
        })
    }
}
