//! Metric domain types and wire shape.

use crate::error::{MetrixError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of metric, which also decides its update semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Floating-point value, replaced on every update.
    Gauge,
    /// Integer value, each update adds a delta.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetrixError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetrixError::invalid(other, "unknown metric type")),
        }
    }
}

/// Current value of a gauge.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gauge(pub f64);

/// Cumulative value of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counter(pub i64);

impl fmt::Display for Gauge {
    /// Shortest representation, switching to exponent form below 1e-4 and from 1e6 up.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if !v.is_finite() {
            return match v {
                v if v.is_nan() => f.write_str("NaN"),
                v if v > 0.0 => f.write_str("+Inf"),
                _ => f.write_str("-Inf"),
            };
        }
        if v == 0.0 {
            return f.write_str(if v.is_sign_negative() { "-0" } else { "0" });
        }

        let sci = format!("{:e}", v);
        let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let exp: i32 = exp.parse().unwrap_or(0);

        if (-4..6).contains(&exp) {
            write!(f, "{}", v)
        } else {
            let sign = if exp < 0 { '-' } else { '+' };
            write!(f, "{}e{}{:02}", mantissa, sign, exp.abs())
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire form of a single metric.
///
/// Exactly one of `value` (gauge) or `delta` (counter) is meaningful; the other is
/// omitted when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metrics {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self { id: id.into(), kind: MetricKind::Gauge, delta: None, value: Some(value) }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self { id: id.into(), kind: MetricKind::Counter, delta: Some(delta), value: None }
    }

    /// Check the metric carries what its kind needs and turn it into an update.
    pub fn to_update(&self) -> Result<MetricUpdate<'_>> {
        if self.id.is_empty() {
            return Err(MetrixError::invalid("", "metric id is empty"));
        }
        match self.kind {
            MetricKind::Gauge => match self.value {
                Some(value) if value.is_finite() => {
                    Ok(MetricUpdate::Gauge { name: &self.id, value })
                }
                Some(_) => Err(MetrixError::invalid(&self.id, "gauge value is not finite")),
                None => Err(MetrixError::invalid(&self.id, "gauge without value")),
            },
            MetricKind::Counter => self
                .delta
                .map(|delta| MetricUpdate::Counter { name: &self.id, delta })
                .ok_or_else(|| MetrixError::invalid(&self.id, "counter without delta")),
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MetricKind::Gauge => match self.value {
                Some(v) => write!(f, "{} ({}) = {}", self.id, self.kind, Gauge(v)),
                None => write!(f, "{} ({})", self.id, self.kind),
            },
            MetricKind::Counter => match self.delta {
                Some(d) => write!(f, "{} ({}) += {}", self.id, self.kind, d),
                None => write!(f, "{} ({})", self.id, self.kind),
            },
        }
    }
}

/// A validated update borrowed from a [`Metrics`] entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricUpdate<'a> {
    Gauge { name: &'a str, value: f64 },
    Counter { name: &'a str, delta: i64 },
}

/// Validate every entry of a batch before any of it is applied.
pub fn validate_batch(batch: &[Metrics]) -> Result<Vec<MetricUpdate<'_>>> {
    batch.iter().map(Metrics::to_update).collect()
}
