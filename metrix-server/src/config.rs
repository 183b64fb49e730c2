//! Server configuration.
//!
//! Every flag can be overridden by the environment variable named next to it.

use clap::{ArgAction, Parser};
use metrix_core::{MetrixError, SnapshotMode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "metrix-server",
    version,
    about = "Collector server for the metrix telemetry pipeline"
)]
pub struct ServerConfig {
    /// Listen address (`host:port`, or `:port` for all interfaces).
    #[arg(short = 'a', long = "address", env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Snapshot file for the file backend; empty disables it.
    #[arg(
        short = 'f',
        long = "file-storage-path",
        env = "FILE_STORAGE_PATH",
        default_value = "/tmp/metrics-db.json"
    )]
    pub file_storage_path: String,

    /// Load the snapshot file at start-up.
    #[arg(
        short = 'r',
        long = "restore",
        env = "RESTORE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub restore: bool,

    /// Seconds between snapshots; 0 writes after every update.
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL", default_value_t = 300)]
    pub store_interval: u64,

    /// SQL backend DSN, e.g. `sqlite:///var/lib/metrix/metrics.db`.
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Shared HMAC-SHA256 signing key.
    #[arg(short = 'k', long = "key", env = "KEY")]
    pub key: Option<String>,

    /// Serve Prometheus self-metrics on this address.
    #[arg(long = "metrics-address", env = "METRICS_ADDRESS")]
    pub metrics_address: Option<SocketAddr>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), MetrixError> {
        if self.address.trim().is_empty() {
            return Err(MetrixError::InvalidConfig { reason: "listen address is empty".into() });
        }
        Ok(())
    }

    /// Address to bind; a bare `:port` listens on every interface.
    pub fn listen_address(&self) -> String {
        match self.address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.address.clone(),
        }
    }

    pub fn database_dsn(&self) -> Option<&str> {
        self.database_dsn.as_deref().filter(|dsn| !dsn.is_empty())
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.file_storage_path.is_empty()).then(|| PathBuf::from(&self.file_storage_path))
    }

    pub fn snapshot_mode(&self) -> SnapshotMode {
        SnapshotMode::from_interval(Duration::from_secs(self.store_interval))
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        ServerConfig::try_parse_from(std::iter::once("metrix-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_flags() {
        let config = parse(&["-a", ":9090", "-f", "", "-r", "false", "-i", "0", "-k", "secret"]);

        assert_eq!(config.listen_address(), "0.0.0.0:9090");
        assert_eq!(config.snapshot_path(), None);
        assert!(!config.restore);
        assert_eq!(config.snapshot_mode(), SnapshotMode::OnChange);
        assert_eq!(config.signing_key(), Some("secret"));
        assert_eq!(config.database_dsn(), None);
    }

    #[test]
    fn test_empty_values_disable() {
        let config = parse(&["-d", "", "-k", ""]);

        assert_eq!(config.database_dsn(), None);
        assert_eq!(config.signing_key(), None);
        assert!(config.validate().is_ok());
    }
}
