//! Wharf server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wharf_core::config::AppConfig;
use wharf_server::{AppState, create_router};

/// Wharf - a multi-tenant OCI artifact registry with upstream proxying
#[derive(Parser, Debug)]
#[command(name = "wharfd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "WHARF_CONFIG", default_value = "config/wharf.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("wharf v{}", env!("CARGO_PKG_VERSION"));

    // File config is optional; WHARF_ env vars can provide or override
    // everything, nested keys split on "__".
    let mut figment = Figment::new();
    let config_path = std::path::Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("no config file found at {}", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("WHARF_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    wharf_server::metrics::register_metrics();

    let storage = wharf_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    // Surface storage misconfiguration before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("storage backend initialized");

    let metadata = wharf_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("metadata store initialized");

    let bind = config.server.bind.clone();
    let state = AppState::new(config, storage, metadata);

    let _sweeper = wharf_server::sweeper::spawn(state.clone());
    tracing::info!("upload session sweeper spawned");

    let app = create_router(state);
    let addr: SocketAddr = bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
