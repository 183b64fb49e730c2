//! Report building.
//!
//! On every report tick the reporter copies the snapshot, turns its gauges into
//! delivery jobs for the configured mode and queues them. Counters, including the
//! agent's own `PollCount`, never leave the process.

use crate::client::DeliveryJob;
use crate::config::ReportMode;
use metrix_core::{Envelope, MemoryStorage, Metrics, MetrixError, Repository, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Reporter {
    snapshot: Arc<MemoryStorage>,
    mode: ReportMode,
    gzip: bool,
    key: Option<String>,
}

impl Reporter {
    pub fn new(
        snapshot: Arc<MemoryStorage>,
        mode: ReportMode,
        gzip: bool,
        key: Option<&str>,
    ) -> Self {
        Self { snapshot, mode, gzip, key: key.map(str::to_string) }
    }

    /// Jobs describing the current snapshot.
    pub async fn build_jobs(&self) -> Result<Vec<DeliveryJob>> {
        let data = self.snapshot.get_all().await?;
        let gauges = data.gauges.iter();

        match self.mode {
            ReportMode::Path => Ok(gauges
                .map(|(name, gauge)| DeliveryJob {
                    mode: self.mode,
                    path: format!("/update/gauge/{}/{}", name, gauge),
                    envelope: None,
                })
                .collect()),
            ReportMode::Json => gauges
                .map(|(name, gauge)| {
                    self.job("/update/", serde_json::to_vec(&Metrics::gauge(name, gauge.0)))
                })
                .collect(),
            ReportMode::Batch => {
                let batch: Vec<Metrics> =
                    gauges.map(|(name, gauge)| Metrics::gauge(name, gauge.0)).collect();
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![self.job("/updates/", serde_json::to_vec(&batch))?])
            }
        }
    }

    fn job(&self, path: &str, json: serde_json::Result<Vec<u8>>) -> Result<DeliveryJob> {
        let json = json.map_err(MetrixError::internal)?;
        let envelope = Envelope::seal(json, self.gzip, self.key.as_deref())?;
        Ok(DeliveryJob { mode: self.mode, path: path.to_string(), envelope: Some(envelope) })
    }

    /// Queue one report. Returns `false` once the delivery queue is closed.
    pub async fn report_once(&self, queue: &mpsc::Sender<DeliveryJob>) -> bool {
        let jobs = match self.build_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Could not build report");
                return true;
            }
        };

        debug!(mode = %self.mode, jobs = jobs.len(), "Queueing report");
        for job in jobs {
            if queue.send(job).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Report on every tick until `token` is cancelled.
    ///
    /// Cancellation is observed between reports; a report that has started queueing
    /// is finished first.
    pub fn spawn(
        self,
        interval: Duration,
        queue: mpsc::Sender<DeliveryJob>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(mode = %self.mode, ?interval, "Reporter started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !self.report_once(&queue).await {
                            warn!("Delivery queue closed");
                            break;
                        }
                    }
                }
            }

            info!("Reporter stopped");
        })
    }
}
