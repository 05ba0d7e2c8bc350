//! focusroomd - focus session server
//!
//! Usage:
//!   focusroomd [CONFIG]             run the server
//!   focusroomd hash-token <TOKEN>   print a `token_hash` value for the config

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use focusroom_core::{Database, IdentityHasher, SessionService};
use focusroom_net::{Hub, Server, ServerContext};

mod auth;
mod config;
mod sweeper;

use auth::TokenAuthenticator;
use config::{ConfigError, ServerConfig};

/// Anything that stops the server from starting
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to prepare {path}: {source}")]
    DataDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] focusroom_core::Error),
    #[error("Network error: {0}")]
    Network(#[from] focusroom_net::Error),
    #[error("Signal handler failed: {0}")]
    Signal(std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let first = args.next();

    if first.as_deref() == Some("hash-token") {
        return match args.next().map(|token| auth::hash_token(&token)) {
            Some(Ok(hash)) => {
                println!("{}", hash);
                ExitCode::SUCCESS
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Could not hash token");
                ExitCode::FAILURE
            }
            None => {
                eprintln!("usage: focusroomd hash-token <TOKEN>");
                ExitCode::FAILURE
            }
        };
    }

    match run(first).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "focusroomd failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_arg: Option<String>) -> Result<(), StartupError> {
    let config_path = config::resolve_path(config_arg)?;
    tracing::info!(path = %config_path.display(), "Loading config");
    let config = ServerConfig::load(&config_path)?;

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StartupError::DataDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let db = Database::open(&db_path)?;
    tracing::info!(path = %db_path.display(), version = db.schema_version()?, "Database ready");

    let hub = Arc::new(Hub::new());
    let service = Arc::new(
        SessionService::new(db, IdentityHasher::new(&config.identity_secret))
            .with_events(hub.clone()),
    );

    let auth = TokenAuthenticator::new(config.users.clone());
    if auth.user_count() == 0 {
        tracing::warn!("No users configured; every connection will be rejected");
    }

    let mut ctx = ServerContext::new(service.clone(), hub, Arc::new(auth));
    ctx.max_connections = config.max_connections;
    let server = Server::start(config.listen_addr, ctx).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper = config
        .sweeper
        .enabled
        .then(|| sweeper::spawn(service, &config.sweeper, shutdown_tx.subscribe()));

    tracing::info!(addr = %server.addr(), "focusroomd listening");

    tokio::signal::ctrl_c().await.map_err(StartupError::Signal)?;
    tracing::info!("Shutdown requested");

    server.shutdown();
    let _ = shutdown_tx.send(());
    // Let connections flush their ShuttingDown frame
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    Ok(())
}
