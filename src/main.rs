//! Wallet Reputation Server
//!
//! Serves the registration, reputation and verification endpoints

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wallet_reputation::server::{self, AppState};
use wallet_reputation::{open_store, Config, OAuthVerifier, Store};

const STATE_PURGE_INTERVAL_SECS: u64 = 300; // 5 minutes

#[derive(Parser)]
#[command(name = "reputation-server")]
#[command(version)]
#[command(about = "Wallet Reputation - link wallets to verified social accounts", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        env = "REPUTATION_CONFIG",
        default_value = "config.toml",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    #[command(visible_alias = "s")]
    Serve {
        /// Host to bind (overrides config)
        #[arg(long, env = "SERVER_HOST")]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long, env = "SERVER_PORT")]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Record a guild the bot joined for a registered user
    AddGuild {
        /// Wallet public key of the owning user
        #[arg(short = 'k', long)]
        public_key: String,

        /// Discord guild ID
        #[arg(short, long)]
        guild_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;

    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    });

    let store = open_store(&config.database_url()).await?;

    match command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(&config, store, &host, port).await
        }
        Commands::Migrate => {
            info!("Database schema is up to date");
            Ok(())
        }
        Commands::AddGuild {
            public_key,
            guild_id,
        } => add_guild(store.as_ref(), &public_key, &guild_id).await,
    }
}

async fn serve(config: &Config, store: Arc<dyn Store>, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Starting Wallet Reputation Server");

    let verifier = Arc::new(OAuthVerifier::new(store.clone(), config.oauth.clone())?);

    // Drop abandoned authorization requests
    let purge_store = store.clone();
    let ttl = chrono::Duration::seconds(config.oauth.state_ttl_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(STATE_PURGE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match purge_store.purge_oauth_states(chrono::Utc::now() - ttl).await {
                Ok(0) => {}
                Ok(count) => info!("Purged {} expired OAuth states", count),
                Err(e) => error!("OAuth state purge failed: {:#}", e),
            }
        }
    });

    let state = Arc::new(AppState {
        store,
        verifier,
        frontend_url: config.frontend_url(),
        started_at: Instant::now(),
    });

    server::run_server(host, port, state).await
}

async fn add_guild(store: &dyn Store, public_key: &str, guild_id: &str) -> anyhow::Result<()> {
    store
        .get_user(public_key)
        .await?
        .with_context(|| format!("User {} is not registered", public_key))?;

    let guild = store.add_guild(public_key, guild_id).await?;
    info!(
        "Guild {} recorded for {} at {}",
        guild.guild_id, guild.user_public_key, guild.invited_at
    );
    Ok(())
}
