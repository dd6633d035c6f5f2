// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::metric::MetricKind;

/// Errors raised by the metric store, its repositories and the persister.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The metric cannot be merged: unknown type, missing value for its type,
    /// unparsable value or a counter that would overflow.
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    #[error("Metric {kind}/{id} not found")]
    NotFound { kind: MetricKind, id: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(kind: MetricKind, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the failure was caused by the caller's input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidMetric(_) | StoreError::NotFound { .. }
        )
    }
}
