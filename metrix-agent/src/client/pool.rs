//! Delivery worker pool.
//!
//! A fixed number of workers share the receiving end of a capacity-1 queue, so a
//! reporter blocks as soon as every worker is busy. Failures go to an error channel
//! drained by a single logging task.

use super::{DeliveryError, DeliveryJob, MetrixClient};
use metrix_core::observability::metrics::{record_delivery, record_delivery_failure};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A job that could not be delivered.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub path: String,
    pub error: DeliveryError,
}

pub struct DeliveryPool {
    jobs: mpsc::Sender<DeliveryJob>,
    workers: Vec<JoinHandle<()>>,
    errors: JoinHandle<usize>,
}

impl DeliveryPool {
    /// Start `workers` delivery workers (at least one).
    pub fn spawn(client: Arc<MetrixClient>, workers: usize) -> Self {
        let (jobs, receiver) = mpsc::channel::<DeliveryJob>(1);
        let receiver = Arc::new(Mutex::new(receiver));
        let (failures, failure_rx) = mpsc::unbounded_channel();

        let workers = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker(id, client.clone(), receiver.clone(), failures.clone()))
            })
            .collect();
        let errors = tokio::spawn(log_failures(failure_rx));

        Self { jobs, workers, errors }
    }

    /// Queue handle for reporters.
    pub fn sender(&self) -> mpsc::Sender<DeliveryJob> {
        self.jobs.clone()
    }

    /// Close the queue, let the workers drain it and return the number of failed jobs.
    ///
    /// Every sender handed out by [`DeliveryPool::sender`] must be dropped first or the
    /// workers keep waiting for more jobs.
    pub async fn shutdown(self) -> usize {
        drop(self.jobs);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Delivery worker panicked");
            }
        }
        self.errors.await.unwrap_or_default()
    }
}

async fn worker(
    id: usize,
    client: Arc<MetrixClient>,
    jobs: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
) {
    debug!(worker = id, "Delivery worker started");
    loop {
        // Hold the lock only while waiting, not while delivering.
        let Some(job) = jobs.lock().await.recv().await else {
            break;
        };

        let started = Instant::now();
        match client.deliver(&job).await {
            Ok(()) => {
                record_delivery(job.mode.as_str(), started.elapsed());
                debug!(worker = id, path = %job.path, "Delivered");
            }
            Err(error) => {
                // The logger only stops once every worker is gone.
                let _ = failures.send(DeliveryFailure { path: job.path, error });
            }
        }
    }
    debug!(worker = id, "Delivery worker stopped");
}

async fn log_failures(mut failures: mpsc::UnboundedReceiver<DeliveryFailure>) -> usize {
    let mut count = 0;
    while let Some(failure) = failures.recv().await {
        count += 1;
        record_delivery_failure(failure.error.reason());
        error!(path = %failure.path, error = %failure.error, "Report not delivered");
    }
    if count > 0 {
        info!(failed = count, "Delivery error log closed");
    }
    count
}
