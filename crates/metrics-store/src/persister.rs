// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Snapshot persistence to a single JSON document.

use crate::errors::StoreError;
use crate::metric::MetricsSnapshot;
use crate::store::MetricStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Clones share one save lock, so saves through any clone never overlap.
#[derive(Debug, Clone)]
pub struct FilePersister {
    path: PathBuf,
    save_lock: Arc<Mutex<()>>,
    tmp_seq: Arc<AtomicU64>,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePersister {
            path: path.into(),
            save_lock: Arc::new(Mutex::new(())),
            tmp_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted snapshot.
    ///
    /// A missing or blank file is an empty snapshot, not an error.
    pub async fn load(&self) -> Result<MetricsSnapshot, StoreError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", self.path.display());
                return Ok(MetricsSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(MetricsSnapshot::new());
        }
        let snapshot: MetricsSnapshot = serde_json::from_slice(&contents)?;
        info!(
            "Loaded {} metrics from {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(snapshot)
    }

    /// Replaces the persisted document with `snapshot`.
    ///
    /// The document is written next to the target and renamed over it, so a
    /// crash mid-write leaves the previous snapshot intact.
    pub async fn save(&self, snapshot: &MetricsSnapshot) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        self.write(snapshot).await
    }

    async fn write(&self, snapshot: &MetricsSnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_vec(snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.tmp_path();
        if let Err(e) = tokio::fs::write(&tmp, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Saved {} metrics to {}", snapshot.len(), self.path.display());
        Ok(())
    }

    /// Saves `store` every `period` until `cancel` fires, then flushes once more.
    ///
    /// Failed saves are logged and retried on the next tick. A zero `period`
    /// disables the periodic saves and only the final flush happens.
    pub async fn run(&self, store: Arc<MetricStore>, period: Duration, cancel: CancellationToken) {
        if period.is_zero() {
            cancel.cancelled().await;
            self.flush(&store).await;
            return;
        }

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush(&store).await;
                }
                () = cancel.cancelled() => {
                    debug!("Persister cancelled, running final flush");
                    self.flush(&store).await;
                    break;
                }
            }
        }
    }

    /// Saves the current contents of `store`.
    ///
    /// The snapshot is taken after the save lock is acquired, so the last
    /// flush to finish always writes the newest state.
    pub async fn flush(&self, store: &MetricStore) {
        let _guard = self.save_lock.lock().await;
        if let Err(e) = self.write(&store.snapshot()).await {
            error!("PersistenceError: failed to save {}: {e}", self.path.display());
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.{seq}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}
