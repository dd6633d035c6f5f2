// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use metrics_store::{Metric, MetricKind, MetricStore, Repository, SqlRepository, StoreError};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

async fn backends() -> Vec<Box<dyn Repository>> {
    vec![
        Box::new(MetricStore::new()),
        Box::new(
            SqlRepository::connect("sqlite::memory:")
                .await
                .expect("in-memory database"),
        ),
    ]
}

#[tokio::test]
async fn test_gauge_overwrites_and_counter_accumulates() {
    for repository in backends().await {
        repository.add(Metric::gauge("Alloc", 100.0)).await.unwrap();
        repository.add(Metric::gauge("Alloc", 50.0)).await.unwrap();
        repository.add(Metric::counter("PollCount", 1)).await.unwrap();
        repository.add(Metric::counter("PollCount", 1)).await.unwrap();

        assert_eq!(
            repository.get(MetricKind::Gauge, "Alloc").await.unwrap(),
            Metric::gauge("Alloc", 50.0),
            "backend {}",
            repository.name()
        );
        assert_eq!(
            repository.get(MetricKind::Counter, "PollCount").await.unwrap(),
            Metric::counter("PollCount", 2),
            "backend {}",
            repository.name()
        );
    }
}

#[tokio::test]
async fn test_batch_merges_in_order() {
    for repository in backends().await {
        repository
            .add_batch(vec![
                Metric::counter("PollCount", 2),
                Metric::gauge("Alloc", 1.0),
                Metric::counter("PollCount", 3),
                Metric::gauge("Alloc", 7.5),
            ])
            .await
            .unwrap();

        let all = repository.get_all().await.unwrap();
        assert_eq!(all.len(), 2, "backend {}", repository.name());
        assert_eq!(
            all.get(MetricKind::Counter, "PollCount"),
            Some(&Metric::counter("PollCount", 5))
        );
        assert_eq!(
            all.get(MetricKind::Gauge, "Alloc"),
            Some(&Metric::gauge("Alloc", 7.5))
        );
    }
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    for repository in backends().await {
        repository.add_batch(Vec::new()).await.unwrap();
        assert!(repository.get_all().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_kinds_do_not_collide() {
    for repository in backends().await {
        repository.add(Metric::gauge("x", 1.5)).await.unwrap();
        repository.add(Metric::counter("x", 4)).await.unwrap();

        assert_eq!(
            repository.get(MetricKind::Gauge, "x").await.unwrap(),
            Metric::gauge("x", 1.5)
        );
        assert_eq!(
            repository.get(MetricKind::Counter, "x").await.unwrap(),
            Metric::counter("x", 4)
        );
    }
}

#[tokio::test]
async fn test_missing_metric() {
    for repository in backends().await {
        let err = repository
            .get(MetricKind::Gauge, "unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(err.to_string(), "Metric gauge/unknown not found");
    }
}

#[tokio::test]
async fn test_failed_batch_leaves_no_trace() {
    for repository in backends().await {
        repository
            .add(Metric::counter("big", i64::MAX - 1))
            .await
            .unwrap();
        let before = repository.get_all().await.unwrap();

        let result = repository
            .add_batch(vec![
                Metric::gauge("g", 1.0),
                Metric::counter("big", 1),
                Metric::counter("big", 1),
            ])
            .await;

        assert!(
            matches!(result, Err(StoreError::InvalidMetric(_))),
            "backend {}",
            repository.name()
        );
        assert_eq!(repository.get_all().await.unwrap(), before);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_on_file_database() {
    let dir = tempdir().unwrap();
    let dsn = dir.path().join("metrics.db");
    let file_backed: Arc<dyn Repository> = Arc::new(
        SqlRepository::connect(dsn.to_str().unwrap())
            .await
            .unwrap(),
    );

    for repository in [Arc::new(MetricStore::new()) as Arc<dyn Repository>, file_backed] {
        let mut writers = tokio::task::JoinSet::new();
        for writer in 0..16 {
            let repository = Arc::clone(&repository);
            writers.spawn(async move {
                for i in 0..20 {
                    repository
                        .add_batch(vec![
                            Metric::counter("PollCount", 1),
                            Metric::gauge("g", f64::from(writer * 100 + i)),
                        ])
                        .await?;
                    repository.add(Metric::counter("hits", 2)).await?;
                }
                Ok::<(), StoreError>(())
            });
        }
        while let Some(result) = writers.join_next().await {
            result.unwrap().unwrap_or_else(|e| {
                panic!("backend {} rejected a write: {e}", repository.name())
            });
        }

        assert_eq!(
            repository.get(MetricKind::Counter, "PollCount").await.unwrap(),
            Metric::counter("PollCount", 320),
            "backend {}",
            repository.name()
        );
        assert_eq!(
            repository.get(MetricKind::Counter, "hits").await.unwrap(),
            Metric::counter("hits", 640)
        );
    }
}

#[derive(Debug, Clone)]
enum Op {
    Add(Metric),
    Batch(Vec<Metric>),
}

fn metric_strategy() -> impl Strategy<Value = Metric> {
    let id = prop::sample::select(vec!["Alloc", "PollCount", "RandomValue"]);
    prop_oneof![
        (id.clone(), -1.0e9f64..1.0e9).prop_map(|(id, v)| Metric::gauge(id, v)),
        (id, -1_000i64..1_000).prop_map(|(id, d)| Metric::counter(id, d)),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        metric_strategy().prop_map(Op::Add),
        prop::collection::vec(metric_strategy(), 0..6).prop_map(Op::Batch),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_backends_agree(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (memory, sql) = runtime.block_on(async {
            let memory = MetricStore::new();
            let sql = SqlRepository::connect("sqlite::memory:").await.unwrap();
            for op in ops {
                match op {
                    Op::Add(metric) => {
                        Repository::add(&memory, metric.clone()).await.unwrap();
                        sql.add(metric).await.unwrap();
                    }
                    Op::Batch(batch) => {
                        Repository::add_batch(&memory, batch.clone()).await.unwrap();
                        sql.add_batch(batch).await.unwrap();
                    }
                }
            }
            (
                memory.get_all().await.unwrap(),
                sql.get_all().await.unwrap(),
            )
        });

        prop_assert_eq!(memory, sql);
    }

    #[test]
    fn prop_counter_is_sum_of_deltas(deltas in prop::collection::vec(-1_000_000i64..1_000_000, 1..50)) {
        let store = MetricStore::new();
        for delta in &deltas {
            store.add(Metric::counter("c", *delta)).unwrap();
        }
        prop_assert_eq!(
            store.get(MetricKind::Counter, "c").unwrap(),
            Metric::counter("c", deltas.iter().sum::<i64>())
        );
    }
}
