// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed repository.
//!
//! One row per `(id, kind)`. Single adds and whole batches each run in their
//! own transaction; counters are upserted by adding to the stored delta.

use crate::errors::StoreError;
use crate::metric::{Metric, MetricKind, MetricPayload, MetricValue, MetricsSnapshot, COUNTER, GAUGE};
use crate::repository::Repository;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    id    TEXT    NOT NULL,
    kind  TEXT    NOT NULL,
    delta INTEGER,
    value REAL,
    PRIMARY KEY (id, kind)
)
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqlRepository {
    pool: SqlitePool,
}

impl SqlRepository {
    /// Opens (creating if needed) the database named by `dsn` and ensures the schema.
    ///
    /// Accepts `sqlite::memory:`, `sqlite://path` or a bare file path.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        // Each connection to an in-memory database gets a database of its
        // own, so the pool must hold on to exactly one.
        let pool = if is_in_memory(dsn) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(options)
        .await?;

        let repository = SqlRepository { pool };
        repository.migrate().await?;
        info!("Connected metrics database");
        Ok(repository)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

/// Applies one metric inside an open transaction and returns the stored entry.
///
/// Every statement here writes before it reads, so the transaction takes the
/// write lock on its first statement and waits out other writers through the
/// busy timeout instead of failing to upgrade a read lock.
async fn upsert(conn: &mut SqliteConnection, metric: Metric) -> Result<Metric, StoreError> {
    match metric.value {
        MetricValue::Gauge(value) => {
            sqlx::query(
                r#"
                INSERT INTO metrics (id, kind, value) VALUES (?, ?, ?)
                ON CONFLICT (id, kind) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(&metric.id)
            .bind(GAUGE)
            .bind(value)
            .execute(&mut *conn)
            .await?;
            Ok(metric)
        }
        MetricValue::Counter(delta) => {
            // Only rows that can absorb `delta` without leaving the i64 range
            // are updated; any other conflict returns no row.
            let (lower, upper) = if delta >= 0 {
                (i64::MIN, i64::MAX - delta)
            } else {
                (i64::MIN - delta, i64::MAX)
            };
            let total: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO metrics (id, kind, delta) VALUES (?1, ?2, ?3)
                ON CONFLICT (id, kind) DO UPDATE SET delta = metrics.delta + excluded.delta
                WHERE metrics.delta BETWEEN ?4 AND ?5
                RETURNING delta
                "#,
            )
            .bind(&metric.id)
            .bind(COUNTER)
            .bind(delta)
            .bind(lower)
            .bind(upper)
            .fetch_optional(&mut *conn)
            .await?;

            let total = total.ok_or_else(|| {
                StoreError::InvalidMetric(format!("counter {} overflows adding {delta}", metric.id))
            })?;
            Ok(Metric::counter(metric.id, total))
        }
    }
}

fn row_to_metric(row: &SqliteRow) -> Result<Metric, StoreError> {
    let payload = MetricPayload {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        delta: row.try_get("delta")?,
        value: row.try_get("value")?,
    };
    Metric::try_from(payload)
}

#[async_trait]
impl Repository for SqlRepository {
    async fn add(&self, metric: Metric) -> Result<Metric, StoreError> {
        let mut tx = self.pool.begin().await?;
        let merged = upsert(&mut *tx, metric).await?;
        tx.commit().await?;
        Ok(merged)
    }

    async fn add_batch(&self, batch: Vec<Metric>) -> Result<(), StoreError> {
        let len = batch.len();
        let mut tx = self.pool.begin().await?;
        for metric in batch {
            // Dropping the transaction on error rolls every earlier row back.
            upsert(&mut *tx, metric).await?;
        }
        tx.commit().await?;
        debug!("Committed batch of {len} metrics");
        Ok(())
    }

    async fn get(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        let row = sqlx::query("SELECT id, kind, delta, value FROM metrics WHERE id = ? AND kind = ?")
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(kind, id))?;
        row_to_metric(&row)
    }

    async fn get_all(&self) -> Result<MetricsSnapshot, StoreError> {
        let rows = sqlx::query("SELECT id, kind, delta, value FROM metrics")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
