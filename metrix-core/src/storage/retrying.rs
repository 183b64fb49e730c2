//! Retry decorator for any [`Repository`].

use super::{Pingable, Repository};
use crate::error::{MetrixError, Result};
use crate::retry::Backoff;
use crate::types::{Counter, Data, Gauge, Metrics};
use async_trait::async_trait;
use std::sync::Arc;

/// Runs every call against the inner backend through a [`Backoff`] schedule,
/// retrying only errors classified by [`MetrixError::is_retriable`].
#[derive(Clone)]
pub struct RetryingRepository {
    inner: Arc<dyn Repository>,
    backoff: Backoff,
}

impl RetryingRepository {
    /// Wrap with the default 1s/3s/5s schedule.
    pub fn new(inner: Arc<dyn Repository>) -> Self {
        Self::with_backoff(inner, Backoff::default())
    }

    pub fn with_backoff(inner: Arc<dyn Repository>, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }

    pub fn inner(&self) -> &Arc<dyn Repository> {
        &self.inner
    }
}

#[async_trait]
impl Pingable for RetryingRepository {
    async fn ping(&self) -> Result<()> {
        self.backoff.retry("ping", || self.inner.ping(), MetrixError::is_retriable).await
    }
}

#[async_trait]
impl Repository for RetryingRepository {
    async fn update_gauge(&self, name: &str, value: f64) -> Result<Gauge> {
        let gauge = self
            .backoff
            .retry(
                "update_gauge",
                || self.inner.update_gauge(name, value),
                MetrixError::is_retriable,
            )
            .await?;
        metrics::counter!("metrix_updates_total", "kind" => "gauge").increment(1);
        Ok(gauge)
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<Counter> {
        let counter = self
            .backoff
            .retry(
                "update_counter",
                || self.inner.update_counter(name, delta),
                MetrixError::is_retriable,
            )
            .await?;
        metrics::counter!("metrix_updates_total", "kind" => "counter").increment(1);
        Ok(counter)
    }

    async fn update_many(&self, batch: &[Metrics]) -> Result<Vec<Metrics>> {
        let applied = self
            .backoff
            .retry("update_many", || self.inner.update_many(batch), MetrixError::is_retriable)
            .await?;
        for metric in &applied {
            metrics::counter!("metrix_updates_total", "kind" => metric.kind.as_str()).increment(1);
        }
        Ok(applied)
    }

    async fn get_gauge(&self, name: &str) -> Result<Gauge> {
        self.backoff
            .retry("get_gauge", || self.inner.get_gauge(name), MetrixError::is_retriable)
            .await
    }

    async fn get_counter(&self, name: &str) -> Result<Counter> {
        self.backoff
            .retry("get_counter", || self.inner.get_counter(name), MetrixError::is_retriable)
            .await
    }

    async fn get_all(&self) -> Result<Data> {
        self.backoff.retry("get_all", || self.inner.get_all(), MetrixError::is_retriable).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::POLL_COUNT;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Fails the first `failures` writes with a path error, then delegates.
    struct Flaky {
        memory: MemoryStorage,
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self { memory: MemoryStorage::new(), failures, calls: AtomicUsize::new(0) }
        }

        fn check(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(MetrixError::Io {
                    path: "/var/lib/metrix/metrics.json".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk busy"),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Pingable for Flaky {
        async fn ping(&self) -> Result<()> {
            self.check()
        }
    }

    #[async_trait]
    impl Repository for Flaky {
        async fn update_gauge(&self, name: &str, value: f64) -> Result<Gauge> {
            self.check()?;
            self.memory.update_gauge(name, value).await
        }

        async fn update_counter(&self, name: &str, delta: i64) -> Result<Counter> {
            self.check()?;
            self.memory.update_counter(name, delta).await
        }

        async fn update_many(&self, batch: &[Metrics]) -> Result<Vec<Metrics>> {
            self.check()?;
            self.memory.update_many(batch).await
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
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_returns_on_first_attempt() {
        let repo = RetryingRepository::new(Arc::new(MemoryStorage::new()));
        let start = Instant::now();

        assert!(repo.get_gauge("missing").await.unwrap_err().is_not_found());
        repo.update_gauge("temp", 36.6).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(repo.name(), "memory");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_path_errors() {
        let flaky = Arc::new(Flaky::new(2));
        let repo = RetryingRepository::new(flaky.clone());
        let start = Instant::now();

        let total = repo.update_counter("hits", 5).await.unwrap();

        assert_eq!(total, Counter(5));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        // Failed attempts never reached the store.
        assert_eq!(repo.get_counter(POLL_COUNT).await.unwrap(), Counter(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_final_attempt() {
        let flaky = Arc::new(Flaky::new(usize::MAX));
        let repo = RetryingRepository::new(flaky.clone());

        let err = repo.ping().await.unwrap_err();

        assert!(matches!(err, MetrixError::Io { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_batch_is_not_retried() {
        let flaky = Arc::new(Flaky::new(0));
        let repo = RetryingRepository::new(flaky.clone());
        let batch = vec![Metrics { id: String::new(), ..Metrics::gauge("x", 1.0) }];

        let err = repo.update_many(&batch).await.unwrap_err();

        assert!(matches!(err, MetrixError::InvalidMetric { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
