//! Parley API server binary.
//!
//! Usage:
//!   parley-api --config parley.toml
//!   parley-api --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `PARLEY_CONFIG` - Path to a TOML config file
//! - `PARLEY_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `PARLEY_PORT` - Server port (default: 8080)
//! - `PARLEY_CORS_ORIGINS` - CORS allowed origins (comma-separated)
//! - `PARLEY_*` engine settings, see `MemoryConfig::apply_env_overrides`

use clap::Parser;
use parley_api::{serve, AppState};
use parley_memory::MemoryConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "parley-api", version, about = "Conversational context engine over HTTP")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(short, long, env = "PARLEY_BIND_ADDR", default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, env = "PARLEY_PORT", default_value_t = 8080)]
    port: u16,

    /// Allowed CORS origins, comma-separated
    #[arg(long, env = "PARLEY_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Option<Vec<String>>,

    /// Skip loading the embedding model at startup
    #[arg(long)]
    no_warmup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parley_api=debug,parley_memory=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.bind == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0. The API has no authentication; \
             put it behind a firewall or an authenticating proxy."
        );
    }

    let mut config = if let Some(path) = &cli.config {
        tracing::info!(path = %path.display(), "Loading configuration");
        MemoryConfig::from_file(path)?
    } else {
        tracing::info!("Using default configuration");
        MemoryConfig::default()
    };
    config.apply_env_overrides()?;

    tracing::info!(
        model = %config.embedding_model,
        vector_backend = ?config.vector_backend,
        cache_backend = ?config.cache_backend,
        "Initializing context engine"
    );

    let state = AppState::new(config)?;

    if !cli.no_warmup {
        if let Err(e) = state.engine.warmup().await {
            tracing::warn!(error = %e, "Warmup failed; the model will load on first use");
        }
    }

    let cors_origins = cli
        .cors_origins
        .map(|origins| origins.into_iter().map(|o| o.trim().to_string()).collect());

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    serve(Arc::new(state), addr, cors_origins).await?;

    Ok(())
}
