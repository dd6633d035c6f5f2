// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use metrics_store::{Metric, MetricStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Moves the store's contents to the sender workers on every report tick.
///
/// The store is drained when a batch is handed off, so samples taken while the
/// batch is in flight start a fresh accumulation. Handing off waits for
/// channel capacity, which blocks the dispatcher while every worker is busy.
pub struct Dispatcher {
    store: Arc<MetricStore>,
    tx: mpsc::Sender<Vec<Metric>>,
}

impl Dispatcher {
    pub fn new(store: Arc<MetricStore>, tx: mpsc::Sender<Vec<Metric>>) -> Self {
        Dispatcher { store, tx }
    }

    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately, report one full period later
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.dispatch(&cancel).await {
                        break;
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("Dispatcher shutting down");
    }

    /// Hands the current contents to a worker. Returns `false` once the
    /// dispatcher should stop, in which case the batch is back in the store.
    pub async fn dispatch(&self, cancel: &CancellationToken) -> bool {
        let snapshot = self.store.drain();
        if snapshot.is_empty() {
            debug!("Nothing to report");
            return true;
        }
        let batch = snapshot.into_batch();

        tokio::select! {
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    debug!("Dispatching {} metrics", batch.len());
                    permit.send(batch);
                    true
                }
                Err(_) => {
                    warn!("No sender workers left, keeping metrics in the store");
                    self.store.restore(batch);
                    false
                }
            },
            () = cancel.cancelled() => {
                self.store.restore(batch);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_store::MetricKind;

    #[tokio::test]
    async fn test_empty_store_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(Arc::new(MetricStore::new()), tx);

        assert!(dispatcher.dispatch(&CancellationToken::new()).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_drains_store() {
        let store = Arc::new(MetricStore::new());
        store.add(Metric::gauge("Alloc", 5.0)).unwrap();
        store.add(Metric::counter("PollCount", 2)).unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(Arc::clone(&store), tx);

        assert!(dispatcher.dispatch(&CancellationToken::new()).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            vec![Metric::gauge("Alloc", 5.0), Metric::counter("PollCount", 2)]
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_blocked_restores_batch() {
        let store = Arc::new(MetricStore::new());
        let (tx, _rx) = mpsc::channel(1);
        // occupy the only slot
        tx.send(vec![Metric::counter("earlier", 1)]).await.unwrap();

        store.add(Metric::counter("PollCount", 4)).unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&store), tx);
        let cancel = CancellationToken::new();

        let blocked = {
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.dispatch(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(!blocked.await.unwrap());
        assert_eq!(
            store.get(MetricKind::Counter, "PollCount").unwrap(),
            Metric::counter("PollCount", 4)
        );
    }

    #[tokio::test]
    async fn test_closed_channel_restores_batch() {
        let store = Arc::new(MetricStore::new());
        store.add(Metric::gauge("g", 1.0)).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let dispatcher = Dispatcher::new(Arc::clone(&store), tx);
        assert!(!dispatcher.dispatch(&CancellationToken::new()).await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_report_after_one_period() {
        let store = Arc::new(MetricStore::new());
        store.add(Metric::counter("PollCount", 1)).unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&store), tx).run(Duration::from_secs(10), cancel.clone()),
        );

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), vec![Metric::counter("PollCount", 1)]);

        cancel.cancel();
        task.await.unwrap();
    }
}
