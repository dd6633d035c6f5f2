// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory metric accumulation.
//!
//! A single [`RwLock`] guards the whole `kind -> id -> Metric` mapping: lookups
//! and snapshots share the lock, every mutation takes it exclusively. The map
//! stays small and writes arrive at poll/report cadence, so there is no
//! per-entry locking.

use crate::errors::StoreError;
use crate::metric::{Metric, MetricKind, MetricValue, MetricsSnapshot};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: RwLock<MetricsSnapshot>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, typically with a snapshot rehydrated from disk.
    pub fn from_snapshot(snapshot: MetricsSnapshot) -> Self {
        MetricStore {
            metrics: RwLock::new(snapshot),
        }
    }

    /// Merges one metric: gauges overwrite, counters add their delta.
    ///
    /// Returns the entry as stored after the merge.
    pub fn add(&self, metric: Metric) -> Result<Metric, StoreError> {
        let mut metrics = self.write();
        let merged = merge(metrics.get(metric.kind(), &metric.id), metric)?;
        metrics.insert(merged.clone());
        Ok(merged)
    }

    /// Merges every metric in input order, or none of them.
    ///
    /// The batch is staged against the current state under the write lock and
    /// committed only once every element merged, so readers never observe a
    /// partially applied batch and a failure leaves the store untouched.
    pub fn add_batch(&self, batch: Vec<Metric>) -> Result<(), StoreError> {
        let mut metrics = self.write();
        let mut staged = MetricsSnapshot::new();
        for metric in batch {
            let current = staged
                .get(metric.kind(), &metric.id)
                .or_else(|| metrics.get(metric.kind(), &metric.id));
            let merged = merge(current, metric)?;
            staged.insert(merged);
        }
        for metric in staged.into_batch() {
            metrics.insert(metric);
        }
        Ok(())
    }

    pub fn get(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        self.read()
            .get(kind, id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, id))
    }

    /// Independent copy of the full mapping; later writes never show through it.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.read().clone()
    }

    pub fn clear(&self) {
        *self.write() = MetricsSnapshot::new();
    }

    /// Takes the current contents and leaves the store empty, atomically.
    pub fn drain(&self) -> MetricsSnapshot {
        std::mem::take(&mut *self.write())
    }

    /// Puts an undelivered batch back.
    ///
    /// Counter deltas are added to whatever accumulated since the batch was
    /// drained. A gauge is only reinstated when no newer sample exists.
    pub fn restore(&self, batch: Vec<Metric>) {
        let mut metrics = self.write();
        let mut restored = 0usize;
        for metric in batch {
            let current = metrics.get(metric.kind(), &metric.id);
            let merged = match (metric.value, current) {
                (MetricValue::Gauge(_), Some(_)) => continue,
                (MetricValue::Gauge(_), None) => Ok(metric),
                (MetricValue::Counter(_), current) => merge(current, metric),
            };
            match merged {
                Ok(merged) => {
                    metrics.insert(merged);
                    restored += 1;
                }
                Err(e) => warn!("Dropping undeliverable metric: {e}"),
            }
        }
        debug!("Restored {restored} metrics into the store");
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a half-merged entry behind:
    // every mutation computes its result before touching the map.
    fn read(&self) -> RwLockReadGuard<'_, MetricsSnapshot> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetricsSnapshot> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Computes the entry that results from applying `incoming` on top of `current`.
pub(crate) fn merge(current: Option<&Metric>, incoming: Metric) -> Result<Metric, StoreError> {
    match (incoming.value, current.map(|m| m.value)) {
        (MetricValue::Gauge(_), _) => Ok(incoming),
        (MetricValue::Counter(delta), Some(MetricValue::Counter(total))) => {
            let sum = total.checked_add(delta).ok_or_else(|| {
                StoreError::InvalidMetric(format!(
                    "counter {} overflows: {total} + {delta}",
                    incoming.id
                ))
            })?;
            Ok(Metric::counter(incoming.id, sum))
        }
        (MetricValue::Counter(_), _) => Ok(incoming),
    }
}
