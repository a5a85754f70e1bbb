//! keypool server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use keypool_core::config::AppConfig;
use keypool_metadata::{CredentialRepo, KeyStore, SqliteStore};
use keypool_server::{create_router, AppState};
use keypool_vault::{EncryptionKey, Vault};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// keypool - a credential-pooling reverse proxy
#[derive(Parser, Debug)]
#[command(name = "keypoold")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "KEYPOOL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("keypool v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("KEYPOOL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("Configuration warning: {}", warning);
            }
        }
        Err(error) => anyhow::bail!("invalid configuration: {error}"),
    }

    // Load the at-rest encryption key: environment, config, or a persisted
    // key file beside the database.
    let key_file = config.database.path.with_file_name("encryption.key");
    let (key, source) = EncryptionKey::load(config.encryption_key.as_deref(), &key_file)
        .context("failed to load encryption key")?;
    tracing::info!(source = ?source, "Encryption key loaded");
    let vault = Vault::new(&key);

    // Open the credential store
    let store: Arc<dyn KeyStore> = Arc::new(
        SqliteStore::new(&config.database.path, vault)
            .await
            .context("failed to open credential store")?,
    );
    store
        .health_check()
        .await
        .context("credential store health check failed")?;
    tracing::info!(
        path = %config.database.path.display(),
        keys = store.count().await.unwrap_or(0),
        "Credential store opened"
    );

    let stats_config = config.stats.clone();
    let bind_host = config.server.host.clone();
    let bind_port = config.server.port;

    // Create application state (resolves the provider, builds the hot
    // cache, lifecycle manager, balancer, forwarder, response cache)
    let state = AppState::new(config, store.clone());
    match &state.provider {
        Some(provider) => tracing::info!(provider = %provider.name, base_url = %provider.base_url, "Provider resolved"),
        None => tracing::warn!("No provider resolved; proxied requests will 404"),
    }

    // Spawn the statistics janitor
    let janitor = if stats_config.auto_cleanup {
        let handle = keypool_server::janitor::spawn_janitor(
            store,
            stats_config.retention_days,
            stats_config.cleanup_interval(),
        );
        tracing::info!(
            retention_days = stats_config.retention_days,
            interval_minutes = stats_config.cleanup_interval_minutes,
            "Statistics janitor spawned"
        );
        Some(handle)
    } else {
        tracing::info!("Statistics auto-cleanup disabled");
        None
    };

    // Create router
    let app = create_router(state);

    // Bind and serve
    let addr: SocketAddr = format!("{bind_host}:{bind_port}")
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop background work after the listener drains. In-flight upstream
    // calls are bounded by the provider timeout.
    if let Some(handle) = janitor {
        handle.abort();
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received, draining");
}
