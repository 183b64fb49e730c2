//! Agent configuration.
//!
//! Every flag can be overridden by the environment variable named next to it.

use clap::{ArgAction, Parser, ValueEnum};
use metrix_core::MetrixError;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Request shape used to report gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportMode {
    /// One `POST /update/gauge/{name}/{value}` per gauge.
    Path,
    /// One JSON `POST /update/` per gauge.
    Json,
    /// A single JSON `POST /updates/` carrying every gauge.
    Batch,
}

impl ReportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Json => "json",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "metrix-agent",
    version,
    about = "Sampling agent for the metrix telemetry pipeline"
)]
pub struct AgentConfig {
    /// Collector server address (`host:port` or a full `http://` URL).
    #[arg(short = 'a', long = "address", env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Seconds between samples.
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL", default_value_t = 2)]
    pub poll_interval: u64,

    /// Seconds between reports.
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL", default_value_t = 10)]
    pub report_interval: u64,

    /// Number of concurrent delivery workers.
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT", default_value_t = 1)]
    pub rate_limit: usize,

    /// Shared HMAC-SHA256 signing key.
    #[arg(short = 'k', long = "key", env = "KEY")]
    pub key: Option<String>,

    /// Gzip JSON request bodies.
    #[arg(long = "gzip", env = "USE_GZIP", default_value_t = true, action = ArgAction::Set)]
    pub gzip: bool,

    #[arg(long = "mode", env = "REPORT_MODE", value_enum, default_value_t = ReportMode::Batch)]
    pub mode: ReportMode,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), MetrixError> {
        if self.poll_interval == 0 || self.report_interval == 0 {
            return Err(MetrixError::InvalidConfig {
                reason: "poll and report intervals must be positive".into(),
            });
        }
        if self.rate_limit == 0 {
            return Err(MetrixError::InvalidConfig {
                reason: "rate limit must be at least 1".into(),
            });
        }
        if self.report_interval < self.poll_interval {
            warn!(
                poll = self.poll_interval,
                report = self.report_interval,
                "Report interval is shorter than poll interval, reports will repeat samples"
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AgentConfig {
        AgentConfig::try_parse_from(std::iter::once("metrix-agent").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);

        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert_eq!(config.rate_limit, 1);
        assert!(config.gzip);
        assert_eq!(config.mode, ReportMode::Batch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "-a", "collector:9090", "-l", "4", "-k", "", "--gzip", "false", "--mode", "path",
        ]);

        assert_eq!(config.address, "collector:9090");
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.signing_key(), None);
        assert!(!config.gzip);
        assert_eq!(config.mode, ReportMode::Path);
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(parse(&["-p", "0"]).validate().is_err());
        assert!(parse(&["-r", "0"]).validate().is_err());
        assert!(parse(&["-l", "0"]).validate().is_err());
        // Shorter report interval only warns.
        assert!(parse(&["-p", "5", "-r", "1"]).validate().is_ok());
    }

    #[test]
    fn test_unknown_mode() {
        let args = ["metrix-agent", "--mode", "carrier-pigeon"];
        assert!(AgentConfig::try_parse_from(args).is_err());
    }
}
