// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod errors;
pub mod metric;
pub mod persister;
pub mod repository;
pub mod store;

pub use errors::StoreError;
pub use metric::{Metric, MetricKind, MetricPayload, MetricQuery, MetricValue, MetricsSnapshot};
pub use persister::FilePersister;
pub use repository::{sql::SqlRepository, Repository};
pub use store::MetricStore;
