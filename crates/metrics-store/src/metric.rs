// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric data model and its JSON wire form.
//!
//! In memory a [`Metric`] is a tagged union: the kind is carried by the
//! [`MetricValue`] variant, so a counter without a delta cannot exist once a
//! metric has been constructed. On the wire the same metric travels as a
//! [`MetricPayload`]:
//!
//! ```json
//! {"id": "PollCount", "type": "counter", "delta": 1}
//! {"id": "Alloc", "type": "gauge", "value": 1024.5}
//! ```

use crate::errors::StoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const GAUGE: &str = "gauge";
pub const COUNTER: &str = "counter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => GAUGE,
            MetricKind::Counter => COUNTER,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GAUGE => Ok(MetricKind::Gauge),
            COUNTER => Ok(MetricKind::Counter),
            other => Err(StoreError::InvalidMetric(format!(
                "unknown metric type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Last write wins.
    Gauge(f64),
    /// Accumulates every applied delta.
    Counter(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricPayload", into = "MetricPayload")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Metric {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Metric {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Builds a metric from its path-encoded form (`/update/{type}/{name}/{value}`).
    ///
    /// Gauges take any finite float, counters a signed 64-bit integer.
    pub fn parse(kind: &str, id: &str, raw: &str) -> Result<Self, StoreError> {
        let kind = MetricKind::from_str(kind)?;
        match kind {
            MetricKind::Gauge => {
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        StoreError::InvalidMetric(format!("gauge {id} has invalid value '{raw}'"))
                    })?;
                Ok(Metric::gauge(id, value))
            }
            MetricKind::Counter => {
                let delta = raw.parse::<i64>().map_err(|_| {
                    StoreError::InvalidMetric(format!("counter {id} has invalid delta '{raw}'"))
                })?;
                Ok(Metric::counter(id, delta))
            }
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self.value {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Plain-text rendering of the scalar, e.g. `50`, `0.25` or `2`.
    pub fn format_value(&self) -> String {
        match self.value {
            MetricValue::Gauge(v) => v.to_string(),
            MetricValue::Counter(d) => d.to_string(),
        }
    }
}

/// JSON representation of a single metric, see module docs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<MetricPayload> for Metric {
    type Error = StoreError;

    fn try_from(payload: MetricPayload) -> Result<Self, Self::Error> {
        if payload.id.is_empty() {
            return Err(StoreError::InvalidMetric("metric id is empty".to_string()));
        }
        match MetricKind::from_str(&payload.kind)? {
            MetricKind::Gauge => match payload.value {
                Some(value) if value.is_finite() => Ok(Metric::gauge(payload.id, value)),
                Some(_) => Err(StoreError::InvalidMetric(format!(
                    "gauge {} has a non-finite value",
                    payload.id
                ))),
                None => Err(StoreError::InvalidMetric(format!(
                    "gauge {} has no value",
                    payload.id
                ))),
            },
            MetricKind::Counter => match payload.delta {
                Some(delta) => Ok(Metric::counter(payload.id, delta)),
                None => Err(StoreError::InvalidMetric(format!(
                    "counter {} has no delta",
                    payload.id
                ))),
            },
        }
    }
}

impl From<Metric> for MetricPayload {
    fn from(metric: Metric) -> Self {
        let kind = metric.kind().as_str().to_string();
        let (delta, value) = match metric.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        MetricPayload {
            id: metric.id,
            kind,
            delta,
            value,
        }
    }
}

/// Lookup body of `POST /value/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Independent copy of a store: `kind -> id -> Metric`.
///
/// Serializes transparently, which makes it the persisted document format too.
/// Decoding rejects entries filed under a kind or id other than their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricsSnapshot(BTreeMap<MetricKind, BTreeMap<String, Metric>>);

impl TryFrom<BTreeMap<MetricKind, BTreeMap<String, Metric>>> for MetricsSnapshot {
    type Error = StoreError;

    fn try_from(nested: BTreeMap<MetricKind, BTreeMap<String, Metric>>) -> Result<Self, Self::Error> {
        for (kind, metrics) in &nested {
            for (id, metric) in metrics {
                if metric.kind() != *kind || metric.id != *id {
                    return Err(StoreError::InvalidMetric(format!(
                        "{} {} is filed under {kind}/{id}",
                        metric.kind(),
                        metric.id
                    )));
                }
            }
        }
        Ok(MetricsSnapshot(nested))
    }
}

impl<'de> Deserialize<'de> for MetricsSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nested = BTreeMap::<MetricKind, BTreeMap<String, Metric>>::deserialize(deserializer)?;
        MetricsSnapshot::try_from(nested).map_err(serde::de::Error::custom)
    }
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: MetricKind, id: &str) -> Option<&Metric> {
        self.0.get(&kind).and_then(|metrics| metrics.get(id))
    }

    /// Stores `metric` as-is, replacing any entry with the same kind and id.
    pub fn insert(&mut self, metric: Metric) -> Option<Metric> {
        self.0
            .entry(metric.kind())
            .or_default()
            .insert(metric.id.clone(), metric)
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Gauges first, then counters, each ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.0.values().flat_map(BTreeMap::values)
    }

    pub fn kinds(&self) -> impl Iterator<Item = (MetricKind, &BTreeMap<String, Metric>)> {
        self.0.iter().map(|(kind, metrics)| (*kind, metrics))
    }

    /// Flattens the snapshot into the batch shape sent over the wire.
    pub fn into_batch(self) -> Vec<Metric> {
        self.0
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect()
    }
}

impl FromIterator<Metric> for MetricsSnapshot {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        let mut snapshot = MetricsSnapshot::new();
        for metric in iter {
            snapshot.insert(metric);
        }
        snapshot
    }
}
