// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use metrics_agent::collector::{Collector, POLL_COUNT};
use metrics_agent::sender::{sign, MetricsSender, HASH_HEADER};
use metrics_agent::{Agent, AgentConfig, RetryPolicy};
use metrics_store::{Metric, MetricKind, MetricStore};
use mockito::{Matcher, Server};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

fn config_for(url: String) -> AgentConfig {
    AgentConfig {
        address: url,
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn short_retries() -> RetryPolicy {
    RetryPolicy::new(vec![Duration::from_millis(5), Duration::from_millis(5)])
}

#[tokio::test]
async fn test_sender_posts_signed_gzip_batch() {
    let mut server = Server::new_async().await;
    let batch = vec![Metric::gauge("Alloc", 2048.0), Metric::counter("PollCount", 5)];
    let expected_hash = sign("secret", &serde_json::to_vec(&batch).unwrap()).unwrap();

    let mock = server
        .mock("POST", "/updates/")
        .match_header("Content-Type", "application/json")
        .match_header("Content-Encoding", "gzip")
        .match_header(HASH_HEADER, expected_hash.as_str())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = AgentConfig {
        key: Some("secret".to_string()),
        ..config_for(server.url())
    };
    MetricsSender::new(&config)
        .unwrap()
        .send(&batch)
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_unsigned_when_no_key() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/updates/")
        .match_header(HASH_HEADER, Matcher::Missing)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    MetricsSender::new(&config_for(server.url()))
        .unwrap()
        .send(&[Metric::counter("PollCount", 1)])
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_deliver_retries_server_errors() {
    let mut server = Server::new_async().await;
    let failure = server
        .mock("POST", "/updates/")
        .with_status(500)
        .with_body("Internal Server Error")
        .expect(1)
        .create_async()
        .await;
    let success = server
        .mock("POST", "/updates/")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = MetricStore::new();
    let sender = MetricsSender::new(&config_for(server.url())).unwrap();
    let delivered = sender
        .deliver(
            vec![Metric::counter("PollCount", 3)],
            &short_retries(),
            &store,
            &CancellationToken::new(),
        )
        .await;

    assert!(delivered);
    assert!(store.is_empty());
    failure.assert_async().await;
    success.assert_async().await;
}

#[tokio::test]
async fn test_deliver_keeps_batch_after_exhausting_retries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/updates/")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let store = MetricStore::new();
    // sampled while the batch was in flight
    store.add(Metric::counter("PollCount", 1)).unwrap();
    store.add(Metric::gauge("Alloc", 20.0)).unwrap();

    let sender = MetricsSender::new(&config_for(server.url())).unwrap();
    let delivered = sender
        .deliver(
            vec![Metric::counter("PollCount", 4), Metric::gauge("Alloc", 10.0)],
            &short_retries(),
            &store,
            &CancellationToken::new(),
        )
        .await;

    assert!(!delivered);
    mock.assert_async().await;
    assert_eq!(
        store.get(MetricKind::Counter, "PollCount").unwrap(),
        Metric::counter("PollCount", 5)
    );
    assert_eq!(
        store.get(MetricKind::Gauge, "Alloc").unwrap(),
        Metric::gauge("Alloc", 20.0)
    );
}

#[tokio::test]
async fn test_deliver_drops_rejected_batch() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/updates/")
        .with_status(400)
        .with_body("Incorrect metric type")
        .expect(1)
        .create_async()
        .await;

    let store = MetricStore::new();
    let sender = MetricsSender::new(&config_for(server.url())).unwrap();
    let delivered = sender
        .deliver(
            vec![Metric::counter("PollCount", 1)],
            &short_retries(),
            &store,
            &CancellationToken::new(),
        )
        .await;

    assert!(!delivered);
    assert!(store.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_collector_keeps_batch() {
    // nothing listens on the discard port
    let config = config_for("127.0.0.1:9".to_string());
    let store = MetricStore::new();
    let delivered = MetricsSender::new(&config)
        .unwrap()
        .deliver(
            vec![Metric::counter("PollCount", 2)],
            &RetryPolicy::none(),
            &store,
            &CancellationToken::new(),
        )
        .await;

    assert!(!delivered);
    assert_eq!(
        store.get(MetricKind::Counter, "PollCount").unwrap(),
        Metric::counter("PollCount", 2)
    );
}

#[tokio::test]
async fn test_agent_reports_periodically() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/updates/")
        .with_status(200)
        .expect_at_least(2)
        .create_async()
        .await;

    let config = AgentConfig {
        poll_interval: Duration::from_millis(10),
        report_interval: Duration::from_millis(50),
        rate_limit: 2,
        ..config_for(server.url())
    };
    let agent = Agent::new(Arc::new(config))
        .unwrap()
        .with_collector(Collector::new(Vec::new()))
        .with_retry_policy(short_retries());
    let cancel = CancellationToken::new();
    let running = tokio::spawn(agent.run(cancel.clone()));

    let wait = async {
        while !mock.matched() {
            sleep(Duration::from_millis(20)).await;
        }
    };
    let result = timeout(Duration::from_secs(5), async {
        wait.await;
        // one more report on top of the first
        sleep(Duration::from_millis(120)).await;
    })
    .await;
    cancel.cancel();
    running.await.unwrap();

    match result {
        Ok(()) => mock.assert_async().await,
        Err(_) => panic!("timed out before the collector received a report"),
    }
}

#[tokio::test]
async fn test_agent_final_delivery_on_shutdown() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/updates/")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = AgentConfig {
        poll_interval: Duration::from_millis(10),
        report_interval: Duration::from_secs(3600),
        ..config_for(server.url())
    };
    let agent = Agent::new(Arc::new(config))
        .unwrap()
        .with_collector(Collector::new(Vec::new()));
    let store = agent.store();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(agent.run(cancel.clone()));

    sleep(Duration::from_millis(60)).await;
    assert!(store.get(MetricKind::Counter, POLL_COUNT).is_ok());
    cancel.cancel();
    running.await.unwrap();

    mock.assert_async().await;
    assert!(store.is_empty());
}
