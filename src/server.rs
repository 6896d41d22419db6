//! Wallet Reputation Server
//!
//! HTTP endpoints for registration, profile and reputation lookups, guild
//! listings and the OAuth verification flow.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{normalize_public_key, short_key};
use crate::error::{ApiError, ApiResult};
use crate::models::{Guild, Platform, Ratings, User};
use crate::oauth::{CallbackRequest, VerificationOutcome, Verifier};
use crate::store::Store;

const MISSING_PUBLIC_KEY: &str = "publicKey is required";
const USER_NOT_FOUND: &str = "User not found";
const INVALID_JSON_BODY: &str = "Invalid JSON body";

// Error codes for the verification page
const ERROR_MISSING_PARAMETERS: &str = "missing_parameters";
const ERROR_VERIFICATION_FAILED: &str = "verification_failed";
const ERROR_SERVER: &str = "server_error";

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn Verifier>,
    /// Origin of the `/verify` page, without trailing slash
    pub frontend_url: String,
    pub started_at: Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/user/register", post(register_handler))
        .route("/api/user/profile", get(profile_handler))
        .route("/api/user/bot-status", get(bot_status_handler))
        .route("/api/get-reputation", get(reputation_handler))
        .route("/api/guilds/list", get(guilds_list_handler))
        .route("/api/auth/:platform", get(auth_start_handler))
        .route("/api/auth/:platform/callback", get(auth_callback_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PublicKeyQuery {
    #[serde(rename = "publicKey")]
    pub public_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
    uptime_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub public_key: String,
    pub twitter_username: Option<String>,
    pub twitter_verified: bool,
    pub discord_username: Option<String>,
    pub discord_verified: bool,
    pub github_username: Option<String>,
    pub github_verified: bool,
    pub reputation_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            public_key: user.public_key,
            twitter_username: user.twitter_username,
            twitter_verified: user.twitter_verified,
            discord_username: user.discord_username,
            discord_verified: user.discord_verified,
            github_username: user.github_username,
            github_verified: user.github_verified,
            reputation_score: user.reputation_score,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationResponse {
    pub public_key: String,
    pub reputation: Ratings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildListResponse {
    pub total_guilds: usize,
    pub guilds: Vec<Guild>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSummary {
    pub guild_id: String,
    pub invited_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatusResponse {
    pub has_bot_invited: bool,
    pub guild_count: usize,
    pub guilds: Vec<GuildSummary>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(rename = "publicKey")]
    pub public_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
}

// ============================================================================
// USER ENDPOINTS
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

type KeyQuery = Result<Query<PublicKeyQuery>, QueryRejection>;

/// Public key from the query string. An unparseable query counts as missing.
fn required_key(query: &KeyQuery) -> ApiResult<&str> {
    let key = match query {
        Ok(Query(q)) => q.public_key.as_deref(),
        Err(_) => None,
    };
    normalize_public_key(key).ok_or_else(|| ApiError::bad_request(MISSING_PUBLIC_KEY))
}

async fn find_user(state: &AppState, public_key: &str) -> ApiResult<User> {
    state
        .store
        .get_user(public_key)
        .await?
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<RegisterResponse>> {
    let Json(request) = body.map_err(|e| {
        warn!("Rejected register body: {}", e.body_text());
        ApiError::bad_request(INVALID_JSON_BODY)
    })?;
    let public_key = normalize_public_key(request.public_key.as_deref())
        .ok_or_else(|| ApiError::bad_request(MISSING_PUBLIC_KEY))?;

    let user = state
        .store
        .upsert_user(public_key)
        .await
        .map_err(|cause| ApiError::Detailed {
            context: "Failed to register user",
            cause,
        })?;

    info!("Register request for {}", short_key(public_key));
    Ok(Json(RegisterResponse { user }))
}

async fn profile_handler(
    State(state): State<Arc<AppState>>,
    query: KeyQuery,
) -> ApiResult<Json<ProfileResponse>> {
    let public_key = required_key(&query)?;
    let user = find_user(&state, public_key).await?;
    Ok(Json(user.into()))
}

async fn reputation_handler(
    State(state): State<Arc<AppState>>,
    query: KeyQuery,
) -> ApiResult<Json<ReputationResponse>> {
    let public_key = required_key(&query)?;
    let user = find_user(&state, public_key).await?;
    Ok(Json(ReputationResponse {
        reputation: user.ratings(),
        public_key: user.public_key,
    }))
}

async fn guilds_list_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<GuildListResponse>> {
    let guilds = state.store.list_guilds().await?;
    Ok(Json(GuildListResponse {
        total_guilds: guilds.len(),
        guilds,
    }))
}

async fn bot_status_handler(
    State(state): State<Arc<AppState>>,
    query: KeyQuery,
) -> ApiResult<Json<BotStatusResponse>> {
    let public_key = required_key(&query)?;
    let user = find_user(&state, public_key).await?;
    let guilds: Vec<GuildSummary> = state
        .store
        .get_user_guilds(&user.public_key)
        .await?
        .into_iter()
        .map(|g| GuildSummary {
            guild_id: g.guild_id,
            invited_at: g.invited_at,
        })
        .collect();

    Ok(Json(BotStatusResponse {
        has_bot_invited: !guilds.is_empty(),
        guild_count: guilds.len(),
        guilds,
    }))
}

// ============================================================================
// OAUTH FLOW
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub guild_id: Option<String>,
}

fn parse_platform(raw: &str) -> ApiResult<Platform> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Unknown platform: {}", raw)))
}

/// 302 to the verification page with the given query parameters
fn verify_redirect(frontend_url: &str, params: &[(&str, &str)]) -> Response {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let location = format!("{}/verify?{}", frontend_url, query);
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn auth_start_handler(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    query: KeyQuery,
) -> ApiResult<Response> {
    let platform = parse_platform(&platform)?;
    let public_key = required_key(&query)?;
    let user = find_user(&state, public_key).await?;

    match state
        .verifier
        .authorization_url(platform, &user.public_key)
        .await?
    {
        Some(url) => Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response()),
        None => Err(ApiError::NotConfigured(format!(
            "{} OAuth is not configured",
            platform
        ))),
    }
}

async fn auth_callback_handler(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let platform = parse_platform(&platform)?;
    let frontend = state.frontend_url.as_str();

    let Ok(Query(query)) = query else {
        warn!("Malformed {} callback query", platform);
        return Ok(verify_redirect(frontend, &[("error", ERROR_MISSING_PARAMETERS)]));
    };

    if let Some(error) = query.error.as_deref() {
        warn!("{} authorization returned error: {}", platform, error);
        return Ok(verify_redirect(frontend, &[("error", error)]));
    }

    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
    let (Some(code), Some(oauth_state)) = (non_empty(&query.code), non_empty(&query.state)) else {
        return Ok(verify_redirect(frontend, &[("error", ERROR_MISSING_PARAMETERS)]));
    };

    let request = CallbackRequest {
        code,
        state: oauth_state,
        guild_id: query.guild_id.clone(),
    };

    let response = match state.verifier.verify(platform, &request).await {
        Ok(VerificationOutcome::Verified { username, score }) => {
            let score = score.to_string();
            verify_redirect(
                frontend,
                &[
                    ("platform", platform.as_str()),
                    ("success", "true"),
                    ("username", username.as_str()),
                    ("score", score.as_str()),
                ],
            )
        }
        Ok(VerificationOutcome::Rejected { error }) => {
            let code = error.as_deref().unwrap_or(ERROR_VERIFICATION_FAILED);
            verify_redirect(frontend, &[("error", code)])
        }
        Err(e) => {
            error!("{} OAuth callback failed: {:#}", platform, e);
            verify_redirect(frontend, &[("error", ERROR_SERVER)])
        }
    };

    Ok(response)
}

/// Run the server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Wallet Reputation server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::models::OAuthState;
    use crate::sqlite_store::SqliteStore;

    /// Counts every call that reaches the store
    struct CountingStore {
        inner: SqliteStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::in_memory().unwrap(),
                calls: AtomicUsize::new(0),
            }
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn upsert_user(&self, public_key: &str) -> anyhow::Result<User> {
            self.hit();
            self.inner.upsert_user(public_key).await
        }

        async fn get_user(&self, public_key: &str) -> anyhow::Result<Option<User>> {
            self.hit();
            self.inner.get_user(public_key).await
        }

        async fn record_verification(
            &self,
            public_key: &str,
            platform: Platform,
            username: &str,
            ratings: &Ratings,
        ) -> anyhow::Result<Option<User>> {
            self.hit();
            self.inner
                .record_verification(public_key, platform, username, ratings)
                .await
        }

        async fn list_guilds(&self) -> anyhow::Result<Vec<Guild>> {
            self.hit();
            self.inner.list_guilds().await
        }

        async fn get_user_guilds(&self, public_key: &str) -> anyhow::Result<Vec<Guild>> {
            self.hit();
            self.inner.get_user_guilds(public_key).await
        }

        async fn add_guild(&self, public_key: &str, guild_id: &str) -> anyhow::Result<Guild> {
            self.hit();
            self.inner.add_guild(public_key, guild_id).await
        }

        async fn save_oauth_state(&self, state: &OAuthState) -> anyhow::Result<()> {
            self.hit();
            self.inner.save_oauth_state(state).await
        }

        async fn take_oauth_state(&self, state: &str) -> anyhow::Result<Option<OAuthState>> {
            self.hit();
            self.inner.take_oauth_state(state).await
        }

        async fn purge_oauth_states(&self, older_than: DateTime<Utc>) -> anyhow::Result<u64> {
            self.hit();
            self.inner.purge_oauth_states(older_than).await
        }
    }

    /// Accepts the code "good", fails on "boom", rejects everything else
    struct StubVerifier {
        seen: Mutex<Vec<(Platform, String, Option<String>)>>,
    }

    impl StubVerifier {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Verifier for StubVerifier {
        async fn authorization_url(
            &self,
            platform: Platform,
            public_key: &str,
        ) -> anyhow::Result<Option<String>> {
            if platform == Platform::GitHub {
                return Ok(None);
            }
            Ok(Some(format!(
                "https://provider.example/authorize?for={}",
                public_key
            )))
        }

        async fn verify(
            &self,
            platform: Platform,
            request: &CallbackRequest,
        ) -> anyhow::Result<VerificationOutcome> {
            self.seen.lock().unwrap().push((
                platform,
                request.state.clone(),
                request.guild_id.clone(),
            ));
            match request.code.as_str() {
                "good" => Ok(VerificationOutcome::Verified {
                    username: "alice bob".to_string(),
                    score: 13.0,
                }),
                "boom" => anyhow::bail!("provider exploded"),
                "silent" => Ok(VerificationOutcome::Rejected { error: None }),
                _ => Ok(VerificationOutcome::Rejected {
                    error: Some("invalid_grant".to_string()),
                }),
            }
        }
    }

    struct Harness {
        store: Arc<CountingStore>,
        verifier: Arc<StubVerifier>,
        app: Router,
    }

    fn harness() -> Harness {
        let store = Arc::new(CountingStore::new());
        let verifier = Arc::new(StubVerifier::new());
        let state = Arc::new(AppState {
            store: store.clone(),
            verifier: verifier.clone(),
            frontend_url: String::new(),
            started_at: Instant::now(),
        });
        Harness {
            store,
            verifier,
            app: create_router(state),
        }
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_json(app: &Router, uri: &str, body: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_missing_public_key_skips_store() {
        let h = harness();

        for uri in [
            "/api/user/profile",
            "/api/get-reputation",
            "/api/user/bot-status",
            "/api/user/profile?publicKey=",
            "/api/get-reputation?publicKey=%20%20",
        ] {
            let response = get(&h.app, uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = json_body(response).await;
            assert_eq!(body["error"], MISSING_PUBLIC_KEY);
        }

        let response = post_json(&h.app, "/api/user/register", "{}").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_404() {
        let h = harness();

        for uri in [
            "/api/user/profile?publicKey=0xnobody",
            "/api/get-reputation?publicKey=0xnobody",
            "/api/user/bot-status?publicKey=0xnobody",
        ] {
            let response = get(&h.app, uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
            let body = json_body(response).await;
            assert_eq!(body["error"], USER_NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let h = harness();

        let first = post_json(&h.app, "/api/user/register", r#"{"publicKey":"0xabc"}"#).await;
        assert_eq!(first.status(), StatusCode::OK);
        let first = json_body(first).await;
        assert_eq!(first["user"]["publicKey"], "0xabc");
        assert_eq!(first["user"]["twitterVerified"], false);

        // Fields set in between must survive a second registration
        let ratings = Ratings {
            social: Some(40.0),
            reputation_score: Some(13.0),
            ..Ratings::default()
        };
        h.store
            .record_verification("0xabc", Platform::Twitter, "alice", &ratings)
            .await
            .unwrap();

        let second = post_json(&h.app, "/api/user/register", r#"{"publicKey":"0xabc"}"#).await;
        assert_eq!(second.status(), StatusCode::OK);
        let second = json_body(second).await;
        assert_eq!(second["user"]["createdAt"], first["user"]["createdAt"]);
        assert_eq!(second["user"]["twitterUsername"], "alice");
        assert_eq!(second["user"]["reputationScore"], 13.0);
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_body() {
        let h = harness();
        let response = post_json(&h.app, "/api/user/register", "not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], INVALID_JSON_BODY);
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_public_key_is_json_400() {
        let h = harness();

        for uri in [
            "/api/user/profile?publicKey=a&publicKey=b",
            "/api/get-reputation?publicKey=a&publicKey=b",
            "/api/user/bot-status?publicKey=a&publicKey=b",
            "/api/auth/twitter?publicKey=a&publicKey=b",
        ] {
            let response = get(&h.app, uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = json_body(response).await;
            assert_eq!(body["error"], MISSING_PUBLIC_KEY, "{}", uri);
        }
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn test_profile_and_reputation() {
        let h = harness();
        h.store.upsert_user("0xabc").await.unwrap();
        let ratings = Ratings {
            dev: Some(50.0),
            social: Some(40.0),
            overall: Some(22.5),
            reputation_score: Some(28.0),
            ..Ratings::default()
        };
        h.store
            .record_verification("0xabc", Platform::GitHub, "octocat", &ratings)
            .await
            .unwrap();

        let profile = json_body(get(&h.app, "/api/user/profile?publicKey=0xabc").await).await;
        assert_eq!(profile["publicKey"], "0xabc");
        assert_eq!(profile["githubUsername"], "octocat");
        assert_eq!(profile["githubVerified"], true);
        assert_eq!(profile["discordVerified"], false);
        assert_eq!(profile["reputationScore"], 28.0);
        assert!(profile.get("devRating").is_none());

        let reputation = json_body(get(&h.app, "/api/get-reputation?publicKey=0xabc").await).await;
        assert_eq!(reputation["publicKey"], "0xabc");
        assert_eq!(reputation["reputation"]["dev"], 50.0);
        assert_eq!(reputation["reputation"]["community"], serde_json::Value::Null);
        assert_eq!(reputation["reputation"]["overall"], 22.5);
        assert_eq!(reputation["reputation"]["score"], 28.0);
    }

    #[tokio::test]
    async fn test_empty_guild_list() {
        let h = harness();
        let response = get(&h.app, "/api/guilds/list").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["totalGuilds"], 0);
        assert_eq!(body["guilds"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_bot_status_with_two_guilds() {
        let h = harness();
        h.store.upsert_user("0xabc").await.unwrap();
        h.store.upsert_user("0xdef").await.unwrap();
        h.store.add_guild("0xabc", "111").await.unwrap();
        h.store.add_guild("0xabc", "222").await.unwrap();
        h.store.add_guild("0xdef", "333").await.unwrap();

        let body = json_body(get(&h.app, "/api/user/bot-status?publicKey=0xabc").await).await;
        assert_eq!(body["hasBotInvited"], true);
        assert_eq!(body["guildCount"], 2);
        assert_eq!(body["guilds"].as_array().unwrap().len(), 2);

        let list = json_body(get(&h.app, "/api/guilds/list").await).await;
        assert_eq!(list["totalGuilds"], 3);
        assert!(list["guilds"][0]["userPublicKey"].is_string());
    }

    #[tokio::test]
    async fn test_bot_status_without_guilds() {
        let h = harness();
        h.store.upsert_user("0xabc").await.unwrap();

        let body = json_body(get(&h.app, "/api/user/bot-status?publicKey=0xabc").await).await;
        assert_eq!(body["hasBotInvited"], false);
        assert_eq!(body["guildCount"], 0);
    }

    #[tokio::test]
    async fn test_callback_provider_error() {
        let h = harness();
        let response = get(&h.app, "/api/auth/twitter/callback?error=access_denied").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/verify?error=access_denied");
        assert!(h.verifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_missing_parameters() {
        let h = harness();
        for uri in [
            "/api/auth/twitter/callback",
            "/api/auth/twitter/callback?state=abc",
            "/api/auth/twitter/callback?code=good",
            "/api/auth/twitter/callback?code=&state=abc",
            "/api/auth/twitter/callback?code=a&state=b&state=c",
            "/api/auth/twitter/callback?error=x&error=y",
        ] {
            let response = get(&h.app, uri).await;
            assert_eq!(response.status(), StatusCode::FOUND);
            assert_eq!(location(&response), "/verify?error=missing_parameters", "{}", uri);
        }
        assert!(h.verifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_success() {
        let h = harness();
        let response = get(&h.app, "/api/auth/twitter/callback?code=good&state=abc").await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = location(&response);
        assert!(location.contains("platform=twitter&success=true"));
        assert_eq!(
            location,
            "/verify?platform=twitter&success=true&username=alice%20bob&score=13"
        );

        let seen = h.verifier.seen.lock().unwrap();
        assert_eq!(seen[0], (Platform::Twitter, "abc".to_string(), None));
    }

    #[tokio::test]
    async fn test_callback_rejections() {
        let h = harness();

        let response = get(&h.app, "/api/auth/twitter/callback?code=bad&state=abc").await;
        assert_eq!(location(&response), "/verify?error=invalid_grant");

        let response = get(&h.app, "/api/auth/twitter/callback?code=silent&state=abc").await;
        assert_eq!(location(&response), "/verify?error=verification_failed");

        let response = get(&h.app, "/api/auth/twitter/callback?code=boom&state=abc").await;
        assert_eq!(location(&response), "/verify?error=server_error");
    }

    #[tokio::test]
    async fn test_discord_callback_passes_guild() {
        let h = harness();
        let response = get(
            &h.app,
            "/api/auth/discord/callback?code=good&state=abc&guild_id=999",
        )
        .await;
        assert!(location(&response).starts_with("/verify?platform=discord&success=true"));

        let seen = h.verifier.seen.lock().unwrap();
        assert_eq!(seen[0].2.as_deref(), Some("999"));
    }

    #[tokio::test]
    async fn test_redirect_uses_frontend_url() {
        let store = Arc::new(CountingStore::new());
        let state = Arc::new(AppState {
            store,
            verifier: Arc::new(StubVerifier::new()),
            frontend_url: "https://app.example.com".to_string(),
            started_at: Instant::now(),
        });
        let app = create_router(state);

        let response = get(&app, "/api/auth/twitter/callback?error=access_denied").await;
        assert_eq!(
            location(&response),
            "https://app.example.com/verify?error=access_denied"
        );
    }

    #[tokio::test]
    async fn test_unknown_platform() {
        let h = harness();
        let response = get(&h.app, "/api/auth/myspace/callback?code=good&state=abc").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auth_start() {
        let h = harness();

        let response = get(&h.app, "/api/auth/twitter").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&h.app, "/api/auth/twitter?publicKey=0xabc").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        h.store.upsert_user("0xabc").await.unwrap();
        let response = get(&h.app, "/api/auth/twitter?publicKey=0xabc").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            "https://provider.example/authorize?for=0xabc"
        );

        let response = get(&h.app, "/api/auth/github?publicKey=0xabc").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "github OAuth is not configured");
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let body = json_body(get(&h.app, "/health").await).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
