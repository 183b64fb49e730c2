//! Metric storage backends.
//!
//! Every backend implements [`Repository`]:
//! - [`MemoryStorage`]: lock-guarded map pair, the base of the others
//! - [`FileStorage`]: memory plus JSON snapshots on disk
//! - [`SqlStorage`]: transactional upserts into `gauges` / `counters` tables
//!
//! [`RetryingRepository`] decorates any of them with the shared retry schedule.
//!
//! Cancellation follows the usual async rule: dropping an in-flight call abandons
//! it, and a dropped SQL transaction is rolled back.

use crate::error::Result;
use crate::types::{Counter, Data, Gauge, Metrics};
use async_trait::async_trait;

pub mod file;
pub mod memory;
pub mod retrying;
pub mod sql;

pub use file::{FileStorage, SnapshotMode};
pub use memory::MemoryStorage;
pub use retrying::RetryingRepository;
pub use sql::SqlStorage;

/// Liveness probe.
///
/// Backends without a live connection report success.
#[async_trait]
pub trait Pingable: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Uniform update/read contract shared by every backend.
#[async_trait]
pub trait Repository: Pingable {
    /// Replace a gauge; returns the stored value.
    async fn update_gauge(&self, name: &str, value: f64) -> Result<Gauge>;

    /// Add to a counter (unseen counters start at zero); returns the new total.
    async fn update_counter(&self, name: &str, delta: i64) -> Result<Counter>;

    /// Apply a batch as one unit: either every entry is applied or none is.
    ///
    /// Each entry counts as one update for `PollCount`. Returns the post-update
    /// value of every entry, in batch order.
    async fn update_many(&self, batch: &[Metrics]) -> Result<Vec<Metrics>>;

    /// Read a gauge; `MetricNotFound` when absent.
    async fn get_gauge(&self, name: &str) -> Result<Gauge>;

    /// Read a counter; `MetricNotFound` when absent.
    async fn get_counter(&self, name: &str) -> Result<Counter>;

    /// Independent copy of every metric.
    async fn get_all(&self) -> Result<Data>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
