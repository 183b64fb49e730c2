//! File-snapshotted backend.
//!
//! Owns a [`MemoryStorage`] and persists the full [`Data`] as pretty JSON at a single
//! path, either after every successful update or from a background ticker. Snapshots
//! are written to a sibling temporary file and renamed over the target, so a crash
//! mid-write leaves the previous snapshot intact.

use super::memory::MemoryStorage;
use super::{Pingable, Repository};
use crate::error::{MetrixError, Result};
use crate::types::{Counter, Data, Gauge, Metrics};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// When snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// After every successful update.
    OnChange,
    /// Periodically, whether or not anything changed.
    Interval(Duration),
}

impl SnapshotMode {
    /// Zero means on-change, anything else is the ticker period.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            SnapshotMode::OnChange
        } else {
            SnapshotMode::Interval(interval)
        }
    }
}

/// Memory backend with durable JSON snapshots.
#[derive(Debug)]
pub struct FileStorage {
    memory: MemoryStorage,
    path: PathBuf,
    mode: SnapshotMode,
    /// Serializes snapshot writers.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>, mode: SnapshotMode) -> Self {
        Self::with_memory(MemoryStorage::new(), path, mode)
    }

    pub fn with_memory(
        memory: MemoryStorage,
        path: impl Into<PathBuf>,
        mode: SnapshotMode,
    ) -> Self {
        Self { memory, path: path.into(), mode, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> SnapshotMode {
        self.mode
    }

    /// Replace the in-memory content with the snapshot on disk.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load_from_file(&self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| MetrixError::Io { path: self.path.clone(), source: e })?;
        let mut data: Data = serde_json::from_slice(&bytes)
            .map_err(|e| MetrixError::Snapshot { path: self.path.clone(), source: e })?;
        data.ensure_poll_count();

        info!(
            gauges = data.gauges.len(),
            counters = data.counters.len(),
            "Restored metrics from snapshot"
        );
        self.memory.restore(data).await;
        Ok(())
    }

    /// Write a full snapshot, replacing whatever is on disk.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn store_to_file(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let data = self.memory.get_all().await?;
        let bytes = serde_json::to_vec_pretty(&data)
            .map_err(|e| MetrixError::Snapshot { path: self.path.clone(), source: e })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MetrixError::Io { path: parent.to_path_buf(), source: e })?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| MetrixError::Io { path: tmp.clone(), source: e })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MetrixError::Io { path: self.path.clone(), source: e })?;

        metrics::counter!("metrix_snapshot_writes_total").increment(1);
        debug!(bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    /// Spawn the periodic snapshot task for interval mode.
    ///
    /// On cancellation one last snapshot is written before the task exits. Returns
    /// `None` in on-change mode.
    pub fn spawn_snapshotter(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let SnapshotMode::Interval(period) = self.mode else {
            return None;
        };
        let storage = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!(path = %storage.path.display(), ?period, "Starting snapshot ticker");
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = storage.store_to_file().await {
                            error!(error = %e, "Periodic snapshot failed");
                        }
                    }
                }
            }

            if let Err(e) = storage.store_to_file().await {
                error!(error = %e, "Final snapshot failed");
            } else {
                info!("Final snapshot written");
            }
        }))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// The update has already been applied; a failed write is only logged so that
    /// a retried request cannot apply it twice.
    async fn after_update(&self) {
        if self.mode == SnapshotMode::OnChange {
            if let Err(e) = self.store_to_file().await {
                error!(error = %e, "On-change snapshot failed");
            }
        }
    }
}

#[async_trait]
impl Pingable for FileStorage {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for FileStorage {
    async fn update_gauge(&self, name: &str, value: f64) -> Result<Gauge> {
        let gauge = self.memory.update_gauge(name, value).await?;
        self.after_update().await;
        Ok(gauge)
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<Counter> {
        let counter = self.memory.update_counter(name, delta).await?;
        self.after_update().await;
        Ok(counter)
    }

    async fn update_many(&self, batch: &[Metrics]) -> Result<Vec<Metrics>> {
        let applied = self.memory.update_many(batch).await?;
        self.after_update().await;
        Ok(applied)
    }

    async fn get_gauge(&self, name: &str) -> Result<Gauge> {
        self.memory.get_gauge(name).await
    }

    async fn get_counter(&self, name: &str) -> Result<Counter> {
        self.memory.get_counter(name).await
    }

    async fn get_all(&self) -> Result<Data> {
        self.memory.get_all().await
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
