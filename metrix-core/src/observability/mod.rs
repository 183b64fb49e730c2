//! Observability infrastructure: tracing and self-metrics.
//!
//! Both binaries call [`init`] once at start-up. The Prometheus exporter is optional
//! and only installed when a listen address is configured.

use crate::error::{MetrixError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this more than
/// once returns an error rather than panicking.
pub fn init(service: &'static str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()
        .map_err(MetrixError::internal)?;

    metrics::register_core_metrics();

    tracing::info!(service, version = env!("CARGO_PKG_VERSION"), "Observability initialized");
    Ok(())
}

/// Serve the `metrics` registry in Prometheus text format on `addr`.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install().map_err(MetrixError::internal)?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
