//! In-memory backend.
//!
//! A single read/write lock guards the gauge and counter maps. Writers hold the
//! exclusive lock across the value change and the `PollCount` bump, so readers never
//! see one without the other. Reads hand out copies, never references into the maps.

use super::{Pingable, Repository};
use crate::error::{MetrixError, Result};
use crate::types::{validate_batch, Counter, Data, Gauge, MetricKind, MetricUpdate, Metrics};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Lock-guarded metric maps.
#[derive(Debug)]
pub struct MemoryStorage {
    data: RwLock<Data>,
}

impl MemoryStorage {
    /// Create an empty store holding only `PollCount`.
    pub fn new() -> Self {
        Self::from_data(Data::new())
    }

    /// Create a store pre-populated with a catalogue of zero-valued gauges.
    pub fn with_gauges<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_data(Data::with_gauges(names))
    }

    pub fn from_data(mut data: Data) -> Self {
        data.ensure_poll_count();
        Self { data: RwLock::new(data) }
    }

    /// Replace the whole content, e.g. with a snapshot restored from disk.
    pub async fn restore(&self, mut data: Data) {
        data.ensure_poll_count();
        *self.data.write().await = data;
    }

    /// Apply every entry of an already validated batch under one write lock.
    ///
    /// Entries go onto a copy that replaces the live maps only once all of them
    /// applied, so an overflowing counter leaves nothing behind.
    fn apply_batch(data: &mut Data, updates: &[MetricUpdate<'_>]) -> Result<Vec<Metrics>> {
        let mut next = data.clone();
        let applied = updates
            .iter()
            .map(|update| next.apply(*update))
            .collect::<Result<Vec<_>>>()?;
        *data = next;
        Ok(applied)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pingable for MemoryStorage {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryStorage {
    #[instrument(skip(self))]
    async fn update_gauge(&self, name: &str, value: f64) -> Result<Gauge> {
        let mut data = self.data.write().await;
        data.set_gauge(name, value)
    }

    #[instrument(skip(self))]
    async fn update_counter(&self, name: &str, delta: i64) -> Result<Counter> {
        let mut data = self.data.write().await;
        data.add_counter(name, delta)
    }

    #[instrument(skip(self, batch), fields(len = batch.len()))]
    async fn update_many(&self, batch: &[Metrics]) -> Result<Vec<Metrics>> {
        let updates = validate_batch(batch)?;
        let mut data = self.data.write().await;
        let applied = Self::apply_batch(&mut data, &updates)?;
        debug!(applied = applied.len(), "Batch applied");
        Ok(applied)
    }

    async fn get_gauge(&self, name: &str) -> Result<Gauge> {
        let data = self.data.read().await;
        data.gauges.get(name).copied().ok_or_else(|| MetrixError::MetricNotFound {
            kind: MetricKind::Gauge,
            name: name.to_string(),
        })
    }

    async fn get_counter(&self, name: &str) -> Result<Counter> {
        let data = self.data.read().await;
        data.counters.get(name).copied().ok_or_else(|| MetrixError::MetricNotFound {
            kind: MetricKind::Counter,
            name: name.to_string(),
        })
    }

    async fn get_all(&self) -> Result<Data> {
        Ok(self.data.read().await.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
