// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of metric batches to the collector.
//!
//! A batch travels as one gzip-compressed JSON array to `{address}/updates/`.
//! When a key is configured the request carries a `HashSHA256` header holding
//! the hex HMAC-SHA256 of the uncompressed JSON.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::retry::{RetryError, RetryPolicy};
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use metrics_store::{Metric, MetricStore};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use sha2::Sha256;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const HASH_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body` under `key`.
pub fn sign(key: &str, body: &[u8]) -> Result<String, AgentError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| AgentError::Encode(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Request body and signature for one batch.
#[derive(Debug)]
pub struct EncodedBatch {
    pub body: Vec<u8>,
    pub hash: Option<String>,
}

pub fn encode(batch: &[Metric], key: Option<&str>) -> Result<EncodedBatch, AgentError> {
    let json = serde_json::to_vec(batch)?;
    let hash = key.map(|key| sign(key, &json)).transpose()?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json)?;
    let body = encoder.finish()?;
    Ok(EncodedBatch { body, hash })
}

#[derive(Debug, Clone)]
pub struct MetricsSender {
    client: reqwest::Client,
    url: String,
    key: Option<String>,
}

impl MetricsSender {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::Client(e.to_string()))?;
        Ok(MetricsSender {
            client,
            url: format!("{}/updates/", config.base_url()),
            key: config.key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, batch: &[Metric]) -> Result<(), AgentError> {
        let encoded = encode(batch, self.key.as_deref())?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(encoded.body);
        if let Some(hash) = encoded.hash {
            request = request.header(HASH_HEADER, hash);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Sends `batch` under `retry`. Undelivered batches go back into `store`
    /// unless the collector rejected them outright.
    pub async fn deliver(
        &self,
        batch: Vec<Metric>,
        retry: &RetryPolicy,
        store: &MetricStore,
        cancel: &CancellationToken,
    ) -> bool {
        let len = batch.len();
        let result = retry
            .run_when(cancel, AgentError::is_retryable, || self.send(&batch))
            .await;
        match result {
            Ok(()) => {
                debug!("Delivered {len} metrics to {}", self.url);
                true
            }
            Err(RetryError::Exhausted { attempts, last }) if !last.is_retryable() => {
                warn!("Dropping {len} metrics rejected after {attempts} attempt(s): {last}");
                false
            }
            Err(e) => {
                warn!("Failed to deliver {len} metrics, keeping them for the next report: {e}");
                store.restore(batch);
                false
            }
        }
    }
}

pub type BatchReceiver = Arc<Mutex<mpsc::Receiver<Vec<Metric>>>>;

/// Long-lived sender worker. Workers share one receiver, so at most one of
/// them waits on the channel at a time while the others deliver.
pub async fn run_worker(
    id: usize,
    sender: Arc<MetricsSender>,
    receiver: BatchReceiver,
    store: Arc<MetricStore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    debug!("Sender worker {id} started");
    loop {
        let batch = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                batch = receiver.recv() => batch,
                () = cancel.cancelled() => None,
            }
        };
        let Some(batch) = batch else {
            break;
        };
        sender.deliver(batch, &retry, &store, &cancel).await;
    }
    debug!("Sender worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use metrics_store::MetricKind;
    use std::io::Read;
    use tracing_test::traced_test;

    #[test]
    fn test_sign_is_hex_hmac() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_encode_compresses_json_array() {
        let batch = vec![Metric::gauge("Alloc", 1.5), Metric::counter("PollCount", 2)];
        let encoded = encode(&batch, Some("secret")).unwrap();

        let mut json = String::new();
        GzDecoder::new(encoded.body.as_slice())
            .read_to_string(&mut json)
            .unwrap();
        assert_eq!(
            json,
            r#"[{"id":"Alloc","type":"gauge","value":1.5},{"id":"PollCount","type":"counter","delta":2}]"#
        );
        assert_eq!(encoded.hash.unwrap(), sign("secret", json.as_bytes()).unwrap());
    }

    #[test]
    fn test_encode_without_key_is_unsigned() {
        let encoded = encode(&[Metric::counter("c", 1)], None).unwrap();
        assert!(encoded.hash.is_none());
    }

    #[test]
    fn test_retryable_errors() {
        let status = |status| AgentError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!AgentError::InvalidConfig("x".into()).is_retryable());
    }

    #[test]
    fn test_url_from_address() {
        let config = AgentConfig {
            address: "localhost:8080".to_string(),
            ..Default::default()
        };
        assert_eq!(
            MetricsSender::new(&config).unwrap().url(),
            "http://localhost:8080/updates/"
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_collector_logs_and_restores() {
        let config = AgentConfig {
            address: "127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let store = MetricStore::new();
        let delivered = MetricsSender::new(&config)
            .unwrap()
            .deliver(
                vec![Metric::counter("PollCount", 1)],
                &RetryPolicy::none(),
                &store,
                &CancellationToken::new(),
            )
            .await;

        assert!(!delivered);
        assert!(logs_contain("keeping them for the next report"));
        assert!(store.get(MetricKind::Counter, "PollCount").is_ok());
    }
}
