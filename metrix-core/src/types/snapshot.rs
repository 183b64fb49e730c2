//! Point-in-time set of every known metric.

use super::metric::{Counter, Gauge, MetricUpdate, Metrics};
use crate::error::{MetrixError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved counter bumped once for every applied gauge or counter update.
pub const POLL_COUNT: &str = "PollCount";

/// Current value of every gauge and cumulative value of every counter.
///
/// This is also the on-disk snapshot format of the file backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    #[serde(rename = "Gauges", default)]
    pub gauges: BTreeMap<String, Gauge>,

    #[serde(rename = "Counters", default)]
    pub counters: BTreeMap<String, Counter>,
}

impl Data {
    /// Empty snapshot holding only the seeded `PollCount`.
    pub fn new() -> Self {
        let mut counters = BTreeMap::new();
        counters.insert(POLL_COUNT.to_string(), Counter(0));
        Self { gauges: BTreeMap::new(), counters }
    }

    /// Snapshot pre-populated with a catalogue of gauges, all zero.
    pub fn with_gauges<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut data = Self::new();
        data.gauges.extend(names.into_iter().map(|name| (name.into(), Gauge::default())));
        data
    }

    pub fn poll_count(&self) -> Counter {
        self.counters.get(POLL_COUNT).copied().unwrap_or_default()
    }

    /// Seed `PollCount` at zero if the snapshot lacks it.
    pub fn ensure_poll_count(&mut self) {
        self.counters.entry(POLL_COUNT.to_string()).or_default();
    }

    /// Replace a gauge and count the update.
    pub fn set_gauge(&mut self, name: &str, value: f64) -> Result<Gauge> {
        let poll = checked_total(POLL_COUNT, self.poll_count().0, 1)?;
        let gauge = Gauge(value);
        self.gauges.insert(name.to_string(), gauge);
        self.counters.insert(POLL_COUNT.to_string(), Counter(poll));
        Ok(gauge)
    }

    /// Add a delta to a counter (unseen counters start at zero) and count the update.
    ///
    /// Nothing changes when either the counter or `PollCount` would overflow.
    pub fn add_counter(&mut self, name: &str, delta: i64) -> Result<Counter> {
        let current = self.counters.get(name).copied().unwrap_or_default().0;
        let total = checked_total(name, current, delta)?;
        let poll_before = if name == POLL_COUNT { total } else { self.poll_count().0 };
        let poll = checked_total(POLL_COUNT, poll_before, 1)?;

        self.counters.insert(name.to_string(), Counter(total));
        self.counters.insert(POLL_COUNT.to_string(), Counter(poll));
        // Read back: PollCount itself may have been the target.
        Ok(self.counters[name])
    }

    /// Apply one validated update and report the resulting value.
    pub fn apply(&mut self, update: MetricUpdate<'_>) -> Result<Metrics> {
        match update {
            MetricUpdate::Gauge { name, value } => {
                Ok(Metrics::gauge(name, self.set_gauge(name, value)?.0))
            }
            MetricUpdate::Counter { name, delta } => {
                Ok(Metrics::counter(name, self.add_counter(name, delta)?.0))
            }
        }
    }

    /// Every metric as `name: value` lines, gauges first, each group sorted by name.
    pub fn lines(&self) -> Vec<String> {
        let gauges = self.gauges.iter().map(|(name, v)| format!("{}: {}", name, v));
        let counters = self.counters.iter().map(|(name, v)| format!("{}: {}", name, v));
        gauges.chain(counters).collect()
    }
}

/// `current + delta`, or an invalid-metric error naming `name` on overflow.
pub(crate) fn checked_total(name: &str, current: i64, delta: i64) -> Result<i64> {
    current.checked_add(delta).ok_or_else(|| MetrixError::invalid(name, "counter overflow"))
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}
