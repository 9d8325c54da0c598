use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use completion_bridge::backend::replicate::ReplicateBackend;
use completion_bridge::config::{Cli, Config};
use completion_bridge::server::openai_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "completion_bridge=debug,tower_http=debug"
    } else {
        "completion_bridge=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("completion-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        api_base = config.backend.api_base,
        default_model = ?config.backend.default_model,
        model_name = config.server.model_name,
        max_interval_ms = config.streaming.max_interval_ms,
        "Configuration loaded"
    );

    let backend = ReplicateBackend::new(&config.backend)
        .context("failed to initialize generation backend")?;

    // Build application state.
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(Arc::new(backend), config.clone()));

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
