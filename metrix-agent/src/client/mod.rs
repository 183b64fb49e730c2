//! HTTP client for the metrix collector server

use crate::config::ReportMode;
use metrix_core::envelope::verify;
use metrix_core::{Backoff, Envelope, HASH_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

pub mod pool;

pub use pool::DeliveryPool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One HTTP request the reporter wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryJob {
    pub mode: ReportMode,
    /// Request path, e.g. `/updates/`.
    pub path: String,
    /// JSON body; path-form updates carry none.
    pub envelope: Option<Envelope>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Response signature does not match")]
    BadSignature,
}

impl DeliveryError {
    /// Only connectivity problems are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Short label for the failure counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected { .. } => "rejected",
            Self::BadSignature => "signature",
        }
    }
}

/// Collector server client
pub struct MetrixClient {
    http: Client,
    base_url: String,
    key: Option<String>,
    backoff: Backoff,
}

impl MetrixClient {
    /// Client for the server at `address` (`host:port` or a full URL).
    pub fn new(address: &str, key: Option<&str>) -> Result<Self, DeliveryError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        Ok(Self { http, base_url, key: key.map(str::to_string), backoff: Backoff::default() })
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Deliver `job`, retrying connectivity failures on the shared schedule.
    pub async fn deliver(&self, job: &DeliveryJob) -> Result<(), DeliveryError> {
        self.backoff.retry("deliver", || self.send(job), DeliveryError::is_retriable).await
    }

    async fn send(&self, job: &DeliveryJob) -> Result<(), DeliveryError> {
        let mut request = self.http.post(format!("{}{}", self.base_url, job.path));
        if let Some(envelope) = &job.envelope {
            request = request.header(CONTENT_TYPE, "application/json");
            if envelope.gzip {
                request = request.header(CONTENT_ENCODING, "gzip");
            }
            if let Some(signature) = &envelope.signature {
                request = request.header(HASH_HEADER, signature.as_str());
            }
            request = request.body(envelope.body.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        let declared = response
            .headers()
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).trim().to_string();
            return Err(DeliveryError::Rejected { status, body });
        }

        if let (Some(key), Some(declared)) = (self.key.as_deref(), declared) {
            if !verify(&body, key, &declared) {
                return Err(DeliveryError::BadSignature);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
