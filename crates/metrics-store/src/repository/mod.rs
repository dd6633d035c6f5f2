// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Storage backends behind the server.
//!
//! Every backend honours the same merge rules as [`MetricStore`]: gauges
//! overwrite, counters accumulate, batches apply all-or-nothing.

use crate::errors::StoreError;
use crate::metric::{Metric, MetricKind, MetricsSnapshot};
use crate::store::MetricStore;
use async_trait::async_trait;

pub mod sql;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Merges one metric and returns the entry as stored afterwards.
    async fn add(&self, metric: Metric) -> Result<Metric, StoreError>;

    async fn add_batch(&self, batch: Vec<Metric>) -> Result<(), StoreError>;

    async fn get(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError>;

    async fn get_all(&self) -> Result<MetricsSnapshot, StoreError>;

    /// Backend health. In-memory storage is always reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

#[async_trait]
impl Repository for MetricStore {
    async fn add(&self, metric: Metric) -> Result<Metric, StoreError> {
        MetricStore::add(self, metric)
    }

    async fn add_batch(&self, batch: Vec<Metric>) -> Result<(), StoreError> {
        MetricStore::add_batch(self, batch)
    }

    async fn get(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        MetricStore::get(self, kind, id)
    }

    async fn get_all(&self) -> Result<MetricsSnapshot, StoreError> {
        Ok(self.snapshot())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
