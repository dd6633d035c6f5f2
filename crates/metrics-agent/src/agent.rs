// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collector::Collector;
use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::error::AgentError;
use crate::retry::RetryPolicy;
use crate::sender::{run_worker, BatchReceiver, MetricsSender};
use metrics_store::MetricStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Wires the collector, dispatcher and sender workers around one store.
pub struct Agent {
    config: Arc<AgentConfig>,
    store: Arc<MetricStore>,
    collector: Collector,
    sender: Arc<MetricsSender>,
    retry: RetryPolicy,
}

impl Agent {
    pub fn new(config: Arc<AgentConfig>) -> Result<Self, AgentError> {
        let sender = MetricsSender::new(&config)?;
        Ok(Agent {
            config,
            store: Arc::new(MetricStore::new()),
            collector: Collector::default(),
            sender: Arc::new(sender),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_collector(mut self, collector: Collector) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> Arc<MetricStore> {
        Arc::clone(&self.store)
    }

    /// Runs until `cancel` fires, then makes one last delivery attempt for
    /// whatever is still buffered.
    pub async fn run(self, cancel: CancellationToken) {
        let Agent {
            config,
            store,
            collector,
            sender,
            retry,
        } = self;

        info!(
            "Reporting to {} every {:?}, polling every {:?}, {} sender worker(s)",
            sender.url(),
            config.report_interval,
            config.poll_interval,
            config.rate_limit
        );

        let (tx, rx) = mpsc::channel(1);
        let receiver: BatchReceiver = Arc::new(Mutex::new(rx));
        let mut tasks = JoinSet::new();

        tasks.spawn(collector.run(Arc::clone(&store), config.poll_interval, cancel.clone()));
        tasks.spawn(
            Dispatcher::new(Arc::clone(&store), tx).run(config.report_interval, cancel.clone()),
        );
        for id in 0..config.rate_limit {
            tasks.spawn(run_worker(
                id,
                Arc::clone(&sender),
                Arc::clone(&receiver),
                Arc::clone(&store),
                retry.clone(),
                cancel.clone(),
            ));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Agent task failed: {e}");
            }
        }

        // a batch may still sit in the channel if no worker picked it up
        {
            let mut receiver = receiver.lock().await;
            while let Ok(batch) = receiver.try_recv() {
                store.restore(batch);
            }
        }

        let batch = store.drain().into_batch();
        if batch.is_empty() {
            debug!("Nothing left to deliver on shutdown");
            return;
        }
        info!("Delivering {} buffered metrics before exit", batch.len());
        sender
            .deliver(batch, &RetryPolicy::none(), &store, &cancel)
            .await;
    }
}
