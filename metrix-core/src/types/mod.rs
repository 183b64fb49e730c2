//! Core domain types for metrix.

pub mod metric;
pub mod snapshot;

// Re-exports
pub use metric::{validate_batch, Counter, Gauge, MetricKind, MetricUpdate, Metrics};
pub(crate) use snapshot::checked_total;
pub use snapshot::{Data, POLL_COUNT};
