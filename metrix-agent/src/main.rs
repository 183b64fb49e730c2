use anyhow::Context;
use clap::Parser;
use metrix_core::{init_observability, shutdown_signal};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod client;
mod collector;
mod config;
mod reporter;

use client::{DeliveryPool, MetrixClient};
use collector::{HostSampler, RuntimeSampler, Sampler};
use config::AgentConfig;
use reporter::Reporter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse();

    init_observability("metrix-agent")?;
    config.validate()?;

    info!(
        mode = %config.mode,
        workers = config.rate_limit,
        "metrix agent starting"
    );

    let token = CancellationToken::new();
    shutdown_signal(token.clone());

    let samplers: Vec<Box<dyn Sampler>> =
        vec![Box::new(RuntimeSampler::new()), Box::new(HostSampler::new())];
    let snapshot = collector::snapshot_for(&samplers);

    let client = MetrixClient::new(&config.address, config.signing_key())
        .context("failed to build HTTP client")?;
    info!(server = client.base_url(), "Reporting to collector");
    let pool = DeliveryPool::spawn(Arc::new(client), config.rate_limit);

    let mut tasks: Vec<_> = samplers
        .into_iter()
        .map(|sampler| {
            collector::spawn_collector(
                sampler,
                snapshot.clone(),
                config.poll_interval(),
                token.clone(),
            )
        })
        .collect();

    let reporter = Reporter::new(snapshot, config.mode, config.gzip, config.signing_key());
    tasks.push(reporter.spawn(config.report_interval(), pool.sender(), token.clone()));

    token.cancelled().await;
    info!("Stopping collectors and reporter");
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Agent task failed");
        }
    }

    let failed = pool.shutdown().await;
    info!(failed, "metrix agent shut down");
    Ok(())
}
