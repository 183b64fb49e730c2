//! Backend selection.
//!
//! Resolved once at start-up: SQL when a DSN is configured and reachable, otherwise
//! the file backend when a snapshot path is configured, otherwise memory.

use crate::config::ServerConfig;
use metrix_core::{FileStorage, MemoryStorage, Repository, RetryingRepository, SqlStorage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The active repository plus the background tasks serving it.
pub struct Backend {
    pub repo: Arc<dyn Repository>,
    /// Awaited on shutdown so the last snapshot reaches disk.
    pub tasks: Vec<JoinHandle<()>>,
}

impl Backend {
    fn new(inner: Arc<dyn Repository>, tasks: Vec<JoinHandle<()>>) -> Self {
        info!(backend = inner.name(), "Storage backend selected");
        Self { repo: Arc::new(RetryingRepository::new(inner)), tasks }
    }

    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background storage task failed");
            }
        }
    }
}

pub async fn select_backend(config: &ServerConfig, token: CancellationToken) -> Backend {
    if let Some(dsn) = config.database_dsn() {
        match SqlStorage::connect(dsn).await {
            Ok(sql) => return Backend::new(Arc::new(sql), Vec::new()),
            Err(e) => warn!(error = %e, "SQL backend unavailable, falling back"),
        }
    }

    if let Some(path) = config.snapshot_path() {
        let storage = Arc::new(FileStorage::new(path, config.snapshot_mode()));
        if config.restore {
            if let Err(e) = storage.load_from_file().await {
                warn!(error = %e, "Could not restore metrics snapshot, starting empty");
            }
        }
        let tasks = storage.spawn_snapshotter(token).into_iter().collect();
        return Backend::new(storage, tasks);
    }

    Backend::new(Arc::new(MemoryStorage::new()), Vec::new())
}
