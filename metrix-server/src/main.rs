use anyhow::Context;
use clap::Parser;
use metrix_core::{init_observability, install_prometheus, shutdown_signal};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod api;
mod backend;
mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    // Initialize observability FIRST
    init_observability("metrix-server")?;
    config.validate()?;

    if let Some(addr) = config.metrics_address {
        install_prometheus(addr)?;
    }

    info!("metrix server starting");

    let token = CancellationToken::new();
    shutdown_signal(token.clone());

    let backend = backend::select_backend(&config, token.clone()).await;
    let app = api::router(api::AppState::new(backend.repo.clone(), config.signing_key()));

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!(address = %address, backend = backend.repo.name(), "metrix server ready");

    axum::serve(listener, app).with_graceful_shutdown(token.clone().cancelled_owned()).await?;

    // The server may also stop on its own; make sure background tasks see it.
    token.cancel();
    backend.join().await;

    info!("metrix server shut down");
    Ok(())
}
