//! Platform verification over OAuth 2.0
//!
//! Authorization-code flow for Twitter (with PKCE), Discord and GitHub.
//! A verification consumes the pending state created by the start endpoint,
//! exchanges the code for an access token, resolves the platform username and
//! updates the user's ratings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::auth::{self, short_key};
use crate::config::{non_empty_env, OAuthConfig, ProviderConfig};
use crate::models::{OAuthState, Platform};
use crate::scoring;
use crate::store::Store;

const TWITTER_AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const TWITTER_USER_URL: &str = "https://api.twitter.com/2/users/me?user.fields=public_metrics";

const DISCORD_AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
const DISCORD_TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
const DISCORD_USER_URL: &str = "https://discord.com/api/users/@me";

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";

const USER_AGENT: &str = concat!("wallet-reputation/", env!("CARGO_PKG_VERSION"));

// Error codes surfaced to the verification page
pub const ERROR_INVALID_STATE: &str = "invalid_state";
pub const ERROR_NOT_CONFIGURED: &str = "not_configured";
pub const ERROR_USER_NOT_FOUND: &str = "user_not_found";
pub const ERROR_PROFILE_FETCH_FAILED: &str = "profile_fetch_failed";

/// Parameters received on the provider callback
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub code: String,
    pub state: String,
    /// Echoed by Discord when the bot was added to a server. Only used to
    /// cross-check the guild reported by the token endpoint.
    pub guild_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Verified { username: String, score: f64 },
    /// Expected failure; `error` is the code to surface, if any
    Rejected { error: Option<String> },
}

impl VerificationOutcome {
    fn rejected(code: &str) -> Self {
        VerificationOutcome::Rejected {
            error: Some(code.to_string()),
        }
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Begin an authorization for `public_key`. Returns the provider URL to
    /// redirect to, or `None` if the platform is not configured.
    async fn authorization_url(&self, platform: Platform, public_key: &str)
        -> Result<Option<String>>;

    /// Complete a callback. `Err` is reserved for unexpected failures.
    async fn verify(
        &self,
        platform: Platform,
        request: &CallbackRequest,
    ) -> Result<VerificationOutcome>;
}

/// Provider URLs for one platform
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub user_url: String,
}

impl ProviderEndpoints {
    fn new(authorize_url: &str, token_url: &str, user_url: &str) -> Self {
        Self {
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            user_url: user_url.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub twitter: ProviderEndpoints,
    pub discord: ProviderEndpoints,
    pub github: ProviderEndpoints,
}

impl Endpoints {
    pub fn for_platform(&self, platform: Platform) -> &ProviderEndpoints {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::Discord => &self.discord,
            Platform::GitHub => &self.github,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            twitter: ProviderEndpoints::new(
                TWITTER_AUTHORIZE_URL,
                TWITTER_TOKEN_URL,
                TWITTER_USER_URL,
            ),
            discord: ProviderEndpoints::new(
                DISCORD_AUTHORIZE_URL,
                DISCORD_TOKEN_URL,
                DISCORD_USER_URL,
            ),
            github: ProviderEndpoints::new(GITHUB_AUTHORIZE_URL, GITHUB_TOKEN_URL, GITHUB_USER_URL),
        }
    }
}

/// Account details resolved from a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub username: String,
    /// Follower count, when the provider reports one
    pub audience: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Success {
        access_token: String,
        /// Present on Discord when the `bot` scope was granted
        #[serde(default)]
        guild: Option<TokenGuild>,
    },
    Failure {
        error: String,
        #[serde(rename = "error_description")]
        _error_description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenGuild {
    id: String,
}

/// Successful code exchange
#[derive(Debug)]
struct AccessToken {
    token: String,
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwitterUserEnvelope {
    data: TwitterUser,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    username: String,
    #[serde(default)]
    public_metrics: Option<TwitterMetrics>,
}

#[derive(Debug, Deserialize)]
struct TwitterMetrics {
    followers_count: u64,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
    #[serde(default)]
    followers: u64,
}

pub struct OAuthVerifier {
    store: Arc<dyn Store>,
    config: OAuthConfig,
    /// Resolved client credentials of the configured platforms
    credentials: HashMap<Platform, ProviderConfig>,
    endpoints: Endpoints,
    client: reqwest::Client,
}

impl OAuthVerifier {
    /// Verifier against the public provider endpoints, with credentials
    /// taken from the config and the process environment
    pub fn new(store: Arc<dyn Store>, config: OAuthConfig) -> Result<Self> {
        Self::with_endpoints(store, config, Endpoints::default(), non_empty_env)
    }

    pub fn with_endpoints(
        store: Arc<dyn Store>,
        config: OAuthConfig,
        endpoints: Endpoints,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let mut credentials = HashMap::new();
        for platform in Platform::ALL {
            match config.credentials_with(platform, &env) {
                Some(creds) => {
                    credentials.insert(platform, creds);
                }
                None => warn!("{} OAuth is not configured", platform),
            }
        }

        Ok(Self {
            store,
            config,
            credentials,
            endpoints,
            client,
        })
    }

    /// Provider authorization URL for a pending state
    fn build_authorization_url(
        &self,
        platform: Platform,
        creds: &ProviderConfig,
        state: &OAuthState,
    ) -> String {
        let mut params: Vec<(&str, String)> = vec![
            ("response_type", "code".to_string()),
            ("client_id", creds.client_id.clone()),
            ("redirect_uri", creds.redirect_uri.clone()),
            ("scope", creds.scope.clone()),
            ("state", state.state.clone()),
        ];

        match platform {
            Platform::Twitter => {
                if let Some(verifier) = &state.code_verifier {
                    params.push(("code_challenge", auth::code_challenge(verifier)));
                    params.push(("code_challenge_method", "S256".to_string()));
                }
            }
            Platform::Discord => {
                if !self.config.discord_bot_permissions.is_empty() {
                    params.push(("permissions", self.config.discord_bot_permissions.clone()));
                }
            }
            Platform::GitHub => {}
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "{}?{}",
            self.endpoints.for_platform(platform).authorize_url,
            query
        )
    }

    /// Exchange an authorization code for an access token.
    /// `Ok(Err(code))` carries a provider-reported error code.
    async fn exchange_code(
        &self,
        platform: Platform,
        creds: &ProviderConfig,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<std::result::Result<AccessToken, String>> {
        debug!("Exchanging {} authorization code", platform);
        let token_url = self.endpoints.for_platform(platform).token_url.as_str();

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", creds.redirect_uri.as_str()),
            ("client_id", creds.client_id.as_str()),
        ];

        let request = match platform {
            Platform::Twitter => {
                if let Some(verifier) = code_verifier {
                    form.push(("code_verifier", verifier));
                }
                self.client
                    .post(token_url)
                    .basic_auth(&creds.client_id, Some(&creds.client_secret))
            }
            Platform::Discord => {
                form.push(("client_secret", creds.client_secret.as_str()));
                self.client.post(token_url)
            }
            Platform::GitHub => {
                form.push(("client_secret", creds.client_secret.as_str()));
                self.client.post(token_url)
            }
        };

        let response = request
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to reach {} token endpoint", platform))?;

        let status = response.status();
        let text = response.text().await?;

        match serde_json::from_str::<TokenResponse>(&text) {
            Ok(TokenResponse::Success {
                access_token,
                guild,
            }) => Ok(Ok(AccessToken {
                token: access_token,
                guild_id: guild.map(|g| g.id),
            })),
            Ok(TokenResponse::Failure { error, .. }) => {
                warn!("{} token exchange rejected: {}", platform, error);
                Ok(Err(error))
            }
            Err(_) => anyhow::bail!(
                "{} token endpoint returned {}: {}",
                platform,
                status,
                text
            ),
        }
    }

    /// Resolve the account behind an access token
    async fn fetch_identity(&self, platform: Platform, access_token: &str) -> Result<Identity> {
        let response = self
            .client
            .get(&self.endpoints.for_platform(platform).user_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to fetch {} user", platform))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} user fetch failed ({}): {}", platform, status, text);
        }

        let identity = match platform {
            Platform::Twitter => {
                let envelope: TwitterUserEnvelope = response
                    .json()
                    .await
                    .context("Failed to parse Twitter user")?;
                Identity {
                    username: envelope.data.username,
                    audience: envelope
                        .data
                        .public_metrics
                        .map(|m| m.followers_count)
                        .unwrap_or(0),
                }
            }
            Platform::Discord => {
                let user: DiscordUser = response
                    .json()
                    .await
                    .context("Failed to parse Discord user")?;
                Identity {
                    username: user.username,
                    audience: 0,
                }
            }
            Platform::GitHub => {
                let user: GitHubUser = response
                    .json()
                    .await
                    .context("Failed to parse GitHub user")?;
                Identity {
                    username: user.login,
                    audience: user.followers,
                }
            }
        };

        info!("{} user verified: {}", platform, identity.username);
        Ok(identity)
    }

    /// Record the guild granted with a Discord bot authorization. The
    /// verification is already stored, so failures are only logged.
    async fn record_guild(
        &self,
        public_key: &str,
        token: &AccessToken,
        request: &CallbackRequest,
    ) {
        let claimed = request.guild_id.as_deref().filter(|g| !g.is_empty());

        let Some(guild_id) = token.guild_id.as_deref() else {
            if let Some(claimed) = claimed {
                warn!(
                    "Ignoring guild {} from {}: token carries no bot authorization",
                    claimed,
                    short_key(public_key)
                );
            }
            return;
        };

        if let Some(claimed) = claimed.filter(|c| *c != guild_id) {
            warn!(
                "Callback guild {} differs from authorized guild {}",
                claimed, guild_id
            );
        }

        match self.store.add_guild(public_key, guild_id).await {
            Ok(_) => info!(
                "Bot invited to guild {} by {}",
                guild_id,
                short_key(public_key)
            ),
            Err(e) => error!(
                "Failed to record guild {} for {}: {:#}",
                guild_id,
                short_key(public_key),
                e
            ),
        }
    }
}

#[async_trait]
impl Verifier for OAuthVerifier {
    async fn authorization_url(
        &self,
        platform: Platform,
        public_key: &str,
    ) -> Result<Option<String>> {
        let Some(creds) = self.credentials.get(&platform) else {
            return Ok(None);
        };

        let state = OAuthState {
            state: auth::generate_state(),
            platform,
            public_key: public_key.to_string(),
            code_verifier: (platform == Platform::Twitter).then(auth::generate_code_verifier),
            created_at: Utc::now(),
        };
        self.store.save_oauth_state(&state).await?;

        debug!(
            "Started {} authorization for {}",
            platform,
            short_key(public_key)
        );
        Ok(Some(self.build_authorization_url(platform, creds, &state)))
    }

    async fn verify(
        &self,
        platform: Platform,
        request: &CallbackRequest,
    ) -> Result<VerificationOutcome> {
        let Some(creds) = self.credentials.get(&platform) else {
            return Ok(VerificationOutcome::rejected(ERROR_NOT_CONFIGURED));
        };

        let Some(pending) = self.store.take_oauth_state(&request.state).await? else {
            warn!("Unknown {} OAuth state", platform);
            return Ok(VerificationOutcome::rejected(ERROR_INVALID_STATE));
        };

        if pending.platform != platform
            || !auth::is_state_fresh(pending.created_at, self.config.state_ttl_secs)
        {
            warn!("Stale or mismatched {} OAuth state", platform);
            return Ok(VerificationOutcome::rejected(ERROR_INVALID_STATE));
        }

        let Some(user) = self.store.get_user(&pending.public_key).await? else {
            return Ok(VerificationOutcome::rejected(ERROR_USER_NOT_FOUND));
        };

        let access_token = match self
            .exchange_code(
                platform,
                creds,
                &request.code,
                pending.code_verifier.as_deref(),
            )
            .await?
        {
            Ok(token) => token,
            Err(code) => {
                return Ok(VerificationOutcome::Rejected { error: Some(code) });
            }
        };

        let identity = match self.fetch_identity(platform, &access_token.token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("{:#}", e);
                return Ok(VerificationOutcome::rejected(ERROR_PROFILE_FETCH_FAILED));
            }
        };

        let ratings = scoring::rescore(&user, platform, identity.audience);
        let Some(updated) = self
            .store
            .record_verification(&user.public_key, platform, &identity.username, &ratings)
            .await?
        else {
            return Ok(VerificationOutcome::rejected(ERROR_USER_NOT_FOUND));
        };

        if platform == Platform::Discord {
            self.record_guild(&updated.public_key, &access_token, request).await;
        }

        Ok(VerificationOutcome::Verified {
            username: identity.username,
            score: updated.reputation_score.unwrap_or(0.0),
        })
    }
}
