//! metrix core library
//!
//! Metric model, storage backends, retry policy and delivery envelope shared by the
//! metrix collector server and agent.

pub mod envelope;
pub mod error;
pub mod observability;
pub mod retry;
pub mod shutdown;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub use envelope::{Envelope, HASH_HEADER};
pub use error::{MetrixError, Result};
pub use observability::{init as init_observability, install_prometheus};
pub use retry::{Backoff, RETRY_INTERVALS};
pub use shutdown::shutdown_signal;
pub use storage::{
    FileStorage, MemoryStorage, Pingable, Repository, RetryingRepository, SnapshotMode, SqlStorage,
};
pub use types::{Counter, Data, Gauge, MetricKind, Metrics, POLL_COUNT};
